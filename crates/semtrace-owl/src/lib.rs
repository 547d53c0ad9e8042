//! semtrace owl -- interval events and their OWL/RDF-XML experiment document.
//!
//! Detectors report begin and end conditions between individuals. The
//! [`EventAssembler`](assembler::EventAssembler) correlates them by pair id
//! into closed [`Event`](event::Event)s and registers each one, with its
//! timepoints and participants, into an
//! [`ExperimentDocument`](experiment::ExperimentDocument) that serializes to
//! a single RDF/XML file.
//!
//! # Modules
//!
//! - [`node`]: XML element tree and rendering rules.
//! - [`document`]: generic document with DTD, namespaces and definitions.
//! - [`experiment`]: the experiment vocabulary and deduplicating registries.
//! - [`event`]: event kinds, pair ids and the ontology mapping.
//! - [`journal`]: open/closed event bookkeeping.
//! - [`assembler`]: journal plus document.
//! - [`timeline`]: HTML timeline projection of closed events.

#![deny(unsafe_code)]

pub mod assembler;
pub mod document;
pub mod event;
pub mod experiment;
pub mod journal;
pub mod node;
pub mod timeline;

use std::path::{Path, PathBuf};

use semtrace_individuals::handle::IndividualId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Rejected detector signals. All of them are recoverable: the signal is
/// discarded and no existing event changes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventError {
    /// An event with this pair id is already open.
    #[error("pair {pair_id} already has open event '{open_id}'")]
    DuplicatePair { pair_id: u64, open_id: String },

    /// No open event matches the close signal.
    #[error("no open event for pair {pair_id}")]
    UnmatchedClose { pair_id: u64 },

    #[error("pair {pair_id} would end at {end} before its start {start}")]
    EndBeforeStart { pair_id: u64, start: f64, end: f64 },

    #[error("pair {pair_id} signalled with non-finite time {time}")]
    InvalidTime { pair_id: u64, time: f64 },

    /// Only loaded individuals can take part in events.
    #[error("individual {individual:?} is not loaded")]
    ParticipantNotLoaded { individual: IndividualId },
}

/// Failures writing output files.
#[derive(Debug, thiserror::Error)]
pub enum OwlError {
    #[error("failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target exists and overwriting was not requested.
    #[error("'{}' already exists", path.display())]
    AlreadyExists { path: PathBuf },
}

/// Write `contents` to `path`, creating parent directories.
pub(crate) fn write_output(path: &Path, contents: &str, overwrite: bool) -> Result<(), OwlError> {
    if path.exists() && !overwrite {
        return Err(OwlError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    let io_err = |source| OwlError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, contents).map_err(io_err)
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::assembler::{participant, EventAssembler};
    pub use crate::document::OwlDocument;
    pub use crate::event::{pair_id, timepoint_id, Event, EventKind, EventType, OpenEvent, Participant};
    pub use crate::experiment::ExperimentDocument;
    pub use crate::journal::{EventHandle, EventJournal};
    pub use crate::node::{Attribute, AttributeValue, EntityDtd, OwlNode, PrefixName};
    pub use crate::timeline::{TimelineEntry, TimelineOptions};
    pub use crate::{EventError, OwlError};
}
