//! HTML timeline of closed events.
//!
//! Produces a self-contained page driving the Google Charts timeline
//! package. Each event is one row `[ 'context' , 'id' , startMs , endMs ]`
//! grouped by its context label.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventType};
use crate::experiment::EPISODES_DIR;
use crate::OwlError;

/// Suffix of the timeline file.
pub const TIMELINE_FILE_SUFFIX: &str = "_TL.html";

/// One timeline row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub context: String,
    pub event_id: String,
    pub start_ms: f64,
    pub end_ms: f64,
    pub tooltip: String,
}

impl TimelineEntry {
    pub fn from_event(event: &Event) -> Self {
        let tooltip = event
            .tooltip()
            .into_iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join(" | ");
        Self {
            context: event.context(),
            event_id: event.id.clone(),
            start_ms: event.start * 1000.0,
            end_ms: event.end * 1000.0,
            tooltip,
        }
    }
}

/// Rendering switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineOptions {
    /// Add an `Episode` row over this `(start, end)` span in seconds of
    /// simulation time, the same clock the event rows use.
    pub episode_span: Option<(f64, f64)>,
    /// Include a tooltip column.
    pub tooltips: bool,
    /// Only render these event types; `None` renders all.
    pub event_types: Option<Vec<EventType>>,
}

/// Timeline rows for `events`, honoring the type filter.
pub fn timeline<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    options: &TimelineOptions,
) -> Vec<TimelineEntry> {
    events
        .into_iter()
        .filter(|event| {
            options
                .event_types
                .as_ref()
                .map_or(true, |types| types.contains(&event.event_type()))
        })
        .map(TimelineEntry::from_event)
        .collect()
}

fn escape_js(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Render the HTML page.
pub fn render_html(entries: &[TimelineEntry], options: &TimelineOptions) -> String {
    let mut rows = String::new();
    let mut push_row = |context: &str, id: &str, start: f64, end: f64, tooltip: &str| {
        let _ = write!(rows, "\t\t\t[ '{}' , '{}' , ", escape_js(context), escape_js(id));
        if options.tooltips {
            let _ = write!(rows, "'{}' , ", escape_js(tooltip));
        }
        let _ = writeln!(rows, "{start:.3} , {end:.3} ],");
    };
    if let Some((start, end)) = options.episode_span {
        push_row("Episode", "Episode", start * 1000.0, end * 1000.0, "");
    }
    for entry in entries {
        push_row(
            &entry.context,
            &entry.event_id,
            entry.start_ms,
            entry.end_ms,
            &entry.tooltip,
        );
    }

    let tooltip_column = if options.tooltips {
        "\t\tdataTable.addColumn({ type: 'string', role: 'tooltip' });\n"
    } else {
        ""
    };

    format!(
        "<html>\n\
         <head>\n\
         \t<script type=\"text/javascript\" src=\"https://www.gstatic.com/charts/loader.js\"></script>\n\
         \t<script type=\"text/javascript\">\n\
         \tgoogle.charts.load('current', {{'packages':['timeline']}});\n\
         \tgoogle.charts.setOnLoadCallback(drawChart);\n\
         \tfunction drawChart() {{\n\
         \t\tvar container = document.getElementById('sl_timeline');\n\
         \t\tvar chart = new google.visualization.Timeline(container);\n\
         \t\tvar dataTable = new google.visualization.DataTable();\n\
         \t\tdataTable.addColumn({{ type: 'string', id: 'Context' }});\n\
         \t\tdataTable.addColumn({{ type: 'string', id: 'Id' }});\n\
         {tooltip_column}\
         \t\tdataTable.addColumn({{ type: 'number', id: 'Start' }});\n\
         \t\tdataTable.addColumn({{ type: 'number', id: 'End' }});\n\
         \t\tdataTable.addRows([\n\
         {rows}\
         \t\t]);\n\
         \t\tchart.draw(dataTable);\n\
         \t}}\n\
         \t</script>\n\
         </head>\n\
         <body>\n\
         \t<div id=\"sl_timeline\" style=\"height: 100%;\"></div>\n\
         </body>\n\
         </html>\n"
    )
}

/// `{log_dir}/Episodes/{episode}_TL.html`
pub fn timeline_path(log_dir: &Path, episode_id: &str) -> PathBuf {
    log_dir
        .join(EPISODES_DIR)
        .join(format!("{episode_id}{TIMELINE_FILE_SUFFIX}"))
}

/// Render and write the timeline page.
pub fn write_timeline(
    log_dir: &Path,
    episode_id: &str,
    entries: &[TimelineEntry],
    options: &TimelineOptions,
    overwrite: bool,
) -> Result<PathBuf, OwlError> {
    let path = timeline_path(log_dir, episode_id);
    crate::write_output(&path, &render_html(entries, options), overwrite)?;
    tracing::info!(path = %path.display(), rows = entries.len(), "timeline written");
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
