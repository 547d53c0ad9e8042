//! The session: one recorded episode.
//!
//! A [`Session`] owns the host view, the [`IndividualManager`], the
//! [`EventAssembler`] and the snapshot worker, replacing any process-wide
//! registry. The embedding engine drives it:
//!
//! 1. [`attach`](Session::attach) / [`detach`](Session::detach) as entities
//!    enter and leave the world.
//! 2. [`handle_signal`](Session::handle_signal) for every detector report.
//! 3. [`tick`](Session::tick) once per frame with the simulation time.
//! 4. [`finish`](Session::finish) once, which writes the episode files.
//!
//! Detector-driven failures are logged and never abort the run.
//!
//! # Example
//!
//! ```
//! use semtrace_individuals::prelude::*;
//! use semtrace_runtime::config::SessionConfig;
//! use semtrace_runtime::detector::{DetectorSignal, SignalKind};
//! use semtrace_runtime::session::Session;
//!
//! let mut host = SceneHost::new();
//! let cup = host.add(HostEntity::named("Cup").with_mesh("SM_Cup").with_tag("SemLog;Id,obj1;Class,Cup;"));
//! let table = host.add(HostEntity::named("Table").with_mesh("SM_Table").with_tag("SemLog;Id,obj2;Class,Table;"));
//!
//! let config = SessionConfig {
//!     log_directory: std::env::temp_dir().join("semtrace-doc-session"),
//!     episode_id: "doc".to_owned(),
//!     overwrite: true,
//!     ..SessionConfig::default()
//! };
//! let mut session = Session::without_snapshots(config, host).unwrap();
//! session.attach(cup, IndividualType::Visible).unwrap();
//! session.attach(table, IndividualType::Visible).unwrap();
//!
//! assert!(session.handle_signal(DetectorSignal::begin(SignalKind::Contact, cup, table, 1.0)));
//! assert!(session.handle_signal(DetectorSignal::end(SignalKind::Contact, table, cup, 3.5)));
//!
//! let report = session.finish(4.0).unwrap();
//! assert_eq!(report.events, 1);
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use semtrace_individuals::handle::IndividualId;
use semtrace_individuals::host::{Host, OwnerId};
use semtrace_individuals::individual::IndividualType;
use semtrace_individuals::manager::IndividualManager;
use semtrace_owl::assembler::{participant, EventAssembler};
use semtrace_owl::event::pair_id;
use semtrace_owl::experiment::{ExperimentDocument, EPISODES_DIR};
use semtrace_owl::journal::EventJournal;
use semtrace_owl::timeline::TimelineOptions;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::detector::{DetectorSignal, Subject};
use crate::snapshot::{PoseFilter, SnapshotWorker, WorldStateSnapshot};
use crate::{SessionError, SnapshotError};

/// Suffix of the world-state snapshot file.
pub const SNAPSHOT_FILE_SUFFIX: &str = "_WS.jsonl";

type SnapshotSink = Box<dyn Write + Send>;

/// Outcome of [`Session::finish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishReport {
    pub episode_id: String,
    pub document_path: PathBuf,
    pub timeline_path: Option<PathBuf>,
    /// Closed events in the document.
    pub events: usize,
    /// Events that were still open and got closed at the finish time.
    pub closed_at_finish: usize,
    pub snapshots_written: u64,
    pub snapshots_dropped: u64,
}

/// Generate an episode id from the wall clock and `seed`.
pub fn generate_episode_id(seed: u64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&seed.to_le_bytes());
    hasher.finalize().to_hex()[..16].to_owned()
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session<H: Host> {
    config: SessionConfig,
    episode_id: String,
    host: H,
    manager: IndividualManager,
    assembler: EventAssembler,
    snapshots: Option<SnapshotWorker<SnapshotSink>>,
    pose_filter: PoseFilter,
    start_time: Option<f64>,
    last_time: f64,
    next_snapshot_at: f64,
    snapshot_sequence: u64,
}

impl<H: Host> Session<H> {
    /// Start a session. When snapshots are enabled the snapshot file is
    /// created under the episodes directory.
    pub fn new(config: SessionConfig, host: H) -> Result<Self, SessionError> {
        config.validate()?;
        let episode_id = resolve_episode_id(&config);
        let sink: Option<SnapshotSink> = if config.snapshot.enabled {
            Some(Box::new(open_snapshot_file(&config, &episode_id)?))
        } else {
            None
        };
        Ok(Self::assemble(config, episode_id, host, sink))
    }

    /// Start a session writing snapshots into `sink` instead of a file.
    pub fn with_snapshot_sink(
        config: SessionConfig,
        host: H,
        sink: impl Write + Send + 'static,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let episode_id = resolve_episode_id(&config);
        Ok(Self::assemble(config, episode_id, host, Some(Box::new(sink))))
    }

    /// Start a session without the background snapshot worker.
    pub fn without_snapshots(config: SessionConfig, host: H) -> Result<Self, SessionError> {
        config.validate()?;
        let episode_id = resolve_episode_id(&config);
        Ok(Self::assemble(config, episode_id, host, None))
    }

    fn assemble(
        config: SessionConfig,
        episode_id: String,
        host: H,
        sink: Option<SnapshotSink>,
    ) -> Self {
        let manager =
            IndividualManager::with_seed(config.seed).with_mask_generator(config.mask.generator());
        let mut document = ExperimentDocument::new(episode_id.clone());
        if !config.task_id.is_empty() {
            document.set_task_context(config.task_id.clone());
        }
        let assembler = EventAssembler::with_parts(
            EventJournal::with_min_duration(config.contact_min_duration),
            document,
        );
        tracing::info!(episode = %episode_id, log_directory = %config.log_directory.display(), "session started");
        Self {
            pose_filter: PoseFilter::new(config.snapshot.pose_tolerance),
            snapshots: sink.map(SnapshotWorker::new),
            config,
            episode_id,
            host,
            manager,
            assembler,
            start_time: None,
            last_time: 0.0,
            next_snapshot_at: 0.0,
            snapshot_sequence: 0,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn manager(&self) -> &IndividualManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut IndividualManager {
        &mut self.manager
    }

    pub fn assembler(&self) -> &EventAssembler {
        &self.assembler
    }

    /// Whether the snapshot worker is idle (always true without a worker).
    pub fn snapshots_idle(&self) -> bool {
        self.snapshots.as_ref().map_or(true, SnapshotWorker::is_done)
    }

    // -- world membership ---------------------------------------------------

    /// Annotate `owner` and bring the individual up: Init, then Load with
    /// tag import. Init or Load failures are logged and leave the
    /// individual inert until [`retry_uninitialized`](Self::retry_uninitialized)
    /// or a new identity value.
    pub fn attach(
        &mut self,
        owner: OwnerId,
        individual_type: IndividualType,
    ) -> Result<IndividualId, SessionError> {
        let id = self.manager.spawn(owner, individual_type)?;
        self.bring_up(id);
        Ok(id)
    }

    fn bring_up(&mut self, id: IndividualId) -> bool {
        // The manager logs the failure reason.
        self.manager.init(&self.host, id, false).is_ok()
            && self.manager.load(&self.host, id, false, true).is_ok()
    }

    /// Remove the individual annotating `owner`. Open events that involve it
    /// or its bones are discarded. Returns `false` if `owner` was unknown.
    pub fn detach(&mut self, owner: OwnerId) -> Result<bool, SessionError> {
        let Some(id) = self.manager.find_by_owner(owner) else {
            return Ok(false);
        };
        let mut involved = vec![id];
        if let Some(individual) = self.manager.individual(id) {
            involved.extend_from_slice(individual.kind().bones());
        }
        for individual in involved {
            self.assembler.discard_involving(individual);
            self.pose_filter.forget(individual);
        }
        self.manager.despawn(id)?;
        Ok(true)
    }

    /// Retry individuals whose Init failed, e.g. after the host finished
    /// building their mesh. Identity failures are not retried here; they
    /// wait for a new Id or Class value. Returns how many became loaded.
    pub fn retry_uninitialized(&mut self) -> usize {
        let waiting: Vec<IndividualId> = self
            .manager
            .iter()
            .filter(|(_, individual)| individual.individual_type().is_root() && !individual.is_init())
            .map(|(id, _)| id)
            .collect();
        waiting.into_iter().filter(|id| self.bring_up(*id)).count()
    }

    // -- detector signals ---------------------------------------------------

    fn resolve(&self, subject: Subject) -> Option<IndividualId> {
        let root = self.manager.find_by_owner(subject.owner)?;
        match subject.bone {
            None => Some(root),
            Some(bone) => self.manager.bone_individual(root, bone),
        }
    }

    /// Feed one detector report. Returns whether it changed the event
    /// state; rejected signals are logged.
    pub fn handle_signal(&mut self, signal: DetectorSignal) -> bool {
        let time = signal.time();
        if time.is_finite() {
            self.observe_time(time);
        }
        let (first, second) = signal.subjects();
        let (Some(a), Some(b)) = (self.resolve(first), self.resolve(second)) else {
            tracing::warn!(
                first = %first.owner,
                second = %second.owner,
                "signal names an unannotated subject"
            );
            return false;
        };
        let pair = pair_id(signal.kind().event_type(), a, b);
        match signal {
            DetectorSignal::Begin { kind, .. } => {
                let participants = participant(&self.manager, a)
                    .and_then(|pa| participant(&self.manager, b).map(|pb| (pa, pb)));
                match participants {
                    Ok((pa, pb)) => self
                        .assembler
                        .open_event(kind.into_event_kind(pa, pb), time, pair)
                        .is_ok(),
                    Err(err) => {
                        tracing::warn!(reason = %err, "begin signal ignored");
                        false
                    }
                }
            }
            DetectorSignal::End { .. } => self.assembler.close_event(pair, time).is_ok(),
        }
    }

    fn observe_time(&mut self, time: f64) {
        if self.start_time.is_none() {
            self.start_time = Some(time);
            self.next_snapshot_at = time;
        }
        self.last_time = self.last_time.max(time);
    }

    // -- per frame ----------------------------------------------------------

    /// Advance to `sim_time`: run deferred reloads and, when due, hand a
    /// snapshot to the worker.
    pub fn tick(&mut self, sim_time: f64) {
        if !sim_time.is_finite() {
            tracing::warn!(sim_time, "tick ignored, non-finite time");
            return;
        }
        self.observe_time(sim_time);
        let reloaded = self.manager.process_pending_reloads(&self.host);
        if reloaded > 0 {
            tracing::debug!(reloaded, "deferred reloads completed");
        }

        let Some(worker) = self.snapshots.as_mut() else {
            return;
        };
        if sim_time < self.next_snapshot_at {
            return;
        }
        self.next_snapshot_at = sim_time + self.config.snapshot.interval;
        // Capturing under a busy worker would advance the pose filter for a
        // snapshot that gets dropped.
        if !worker.is_done() {
            worker.request(WorldStateSnapshot {
                time: sim_time,
                sequence: self.snapshot_sequence,
                individuals: Vec::new(),
            });
            return;
        }
        let snapshot = WorldStateSnapshot::capture(
            &self.host,
            &self.manager,
            sim_time,
            self.snapshot_sequence,
            &mut self.pose_filter,
        );
        self.snapshot_sequence += 1;
        worker.request(snapshot);
    }

    // -- finish -------------------------------------------------------------

    /// Close every open event at `end_time`, write the document (and the
    /// timeline when configured) and wait for the snapshot worker.
    pub fn finish(mut self, end_time: f64) -> Result<FinishReport, SessionError> {
        let end_time = if end_time.is_finite() {
            end_time.max(self.last_time)
        } else {
            self.last_time
        };
        let closed_at_finish = self.assembler.finish(end_time);
        let start_time = self.start_time.unwrap_or(end_time).min(end_time);
        self.assembler
            .document_mut()
            .set_episode_span(start_time, end_time);

        let log_dir = self.config.log_directory.clone();
        let document_path = self.assembler.write_to_file(&log_dir, self.config.overwrite)?;
        let timeline_path = if self.config.write_timelines {
            let options = TimelineOptions {
                episode_span: self
                    .config
                    .timeline_episode_row
                    .then_some((start_time, end_time)),
                ..TimelineOptions::default()
            };
            Some(
                self.assembler
                    .write_timeline(&log_dir, &options, self.config.overwrite)?,
            )
        } else {
            None
        };

        let (snapshots_written, snapshots_dropped) = match self.snapshots.as_mut() {
            Some(worker) => {
                worker.ensure_completion()?;
                worker.with_sink(|sink| sink.flush().map_err(SnapshotError::from))??;
                (worker.completed(), worker.dropped())
            }
            None => (0, 0),
        };

        let report = FinishReport {
            episode_id: self.episode_id.clone(),
            document_path,
            timeline_path,
            events: self.assembler.document().event_count(),
            closed_at_finish,
            snapshots_written,
            snapshots_dropped,
        };
        tracing::info!(
            episode = %report.episode_id,
            events = report.events,
            closed_at_finish,
            snapshots = snapshots_written,
            dropped = snapshots_dropped,
            "session finished"
        );
        Ok(report)
    }
}

fn resolve_episode_id(config: &SessionConfig) -> String {
    if config.episode_id.is_empty() {
        generate_episode_id(config.seed)
    } else {
        config.episode_id.clone()
    }
}

fn open_snapshot_file(
    config: &SessionConfig,
    episode_id: &str,
) -> Result<BufWriter<File>, SessionError> {
    let dir = config.log_directory.join(EPISODES_DIR);
    let path = dir.join(format!("{episode_id}{SNAPSHOT_FILE_SUFFIX}"));
    if path.exists() && !config.overwrite {
        return Err(SessionError::OutputExists { path });
    }
    let io_err = |source| SessionError::Io {
        path: path.clone(),
        source,
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;
    let file = File::create(&path).map_err(io_err)?;
    Ok(BufWriter::new(file))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::SignalKind;
    use semtrace_individuals::prelude::*;

    // -- helpers ------------------------------------------------------------

    fn config(name: &str) -> SessionConfig {
        SessionConfig {
            log_directory: std::env::temp_dir()
                .join(format!("semtrace-session-unit-{name}-{}", std::process::id())),
            episode_id: name.to_owned(),
            overwrite: true,
            ..SessionConfig::default()
        }
    }

    fn tagged(host: &mut SceneHost, name: &str, id: &str, class: &str) -> OwnerId {
        host.add(
            HostEntity::named(name)
                .with_mesh(format!("SM_{name}"))
                .with_tag(format!("SemLog;Id,{id};Class,{class};")),
        )
    }

    // -- 1. Membership ------------------------------------------------------

    #[test]
    fn attach_loads_from_tags() {
        let mut host = SceneHost::new();
        let cup = tagged(&mut host, "Cup", "obj1", "Cup");
        let mut session = Session::without_snapshots(config("attach"), host).unwrap();
        let id = session.attach(cup, IndividualType::Visible).unwrap();
        let individual = session.manager().individual(id).unwrap();
        assert!(individual.is_loaded());
        assert_eq!(individual.id(), "obj1");
    }

    #[test]
    fn attach_twice_is_an_error() {
        let mut host = SceneHost::new();
        let cup = tagged(&mut host, "Cup", "obj1", "Cup");
        let mut session = Session::without_snapshots(config("twice"), host).unwrap();
        session.attach(cup, IndividualType::Visible).unwrap();
        assert!(matches!(
            session.attach(cup, IndividualType::Visible),
            Err(SessionError::Individual(IndividualError::OwnerAlreadyAnnotated { .. }))
        ));
    }

    #[test]
    fn structural_failures_can_be_retried() {
        let mut host = SceneHost::new();
        let cup = host.add(HostEntity::named("Cup").with_tag("SemLog;Id,obj1;Class,Cup;"));
        let mut session = Session::without_snapshots(config("retry"), host).unwrap();
        let id = session.attach(cup, IndividualType::Visible).unwrap();
        assert!(!session.manager().individual(id).unwrap().is_init());

        if let Some(entity) = session.host_mut().entity_mut(cup) {
            entity.mesh = Some("SM_Cup".to_owned());
        }
        assert_eq!(session.retry_uninitialized(), 1);
        assert!(session.manager().individual(id).unwrap().is_loaded());
        assert_eq!(session.retry_uninitialized(), 0);
    }

    #[test]
    fn detach_discards_open_events() {
        let mut host = SceneHost::new();
        let cup = tagged(&mut host, "Cup", "obj1", "Cup");
        let table = tagged(&mut host, "Table", "obj2", "Table");
        let mut session = Session::without_snapshots(config("detach"), host).unwrap();
        session.attach(cup, IndividualType::Visible).unwrap();
        session.attach(table, IndividualType::Visible).unwrap();

        assert!(session.handle_signal(DetectorSignal::begin(SignalKind::Contact, cup, table, 0.0)));
        assert!(session.detach(cup).unwrap());
        assert!(!session.detach(cup).unwrap());
        assert!(session.assembler().journal().open_events().is_empty());
        assert!(!session.handle_signal(DetectorSignal::end(SignalKind::Contact, cup, table, 1.0)));
    }

    // -- 2. Signals ---------------------------------------------------------

    #[test]
    fn contact_end_may_name_subjects_in_either_order() {
        let mut host = SceneHost::new();
        let cup = tagged(&mut host, "Cup", "obj1", "Cup");
        let table = tagged(&mut host, "Table", "obj2", "Table");
        let mut session = Session::without_snapshots(config("order"), host).unwrap();
        session.attach(cup, IndividualType::Visible).unwrap();
        session.attach(table, IndividualType::Visible).unwrap();

        assert!(session.handle_signal(DetectorSignal::begin(SignalKind::Contact, cup, table, 1.0)));
        assert!(session.handle_signal(DetectorSignal::end(SignalKind::Contact, table, cup, 2.0)));
        assert_eq!(session.assembler().journal().len(), 1);
    }

    #[test]
    fn unknown_and_unloaded_subjects_are_ignored() {
        let mut host = SceneHost::new();
        let cup = tagged(&mut host, "Cup", "obj1", "Cup");
        let anonymous = host.add(HostEntity::named("Box").with_mesh("SM_Box"));
        let mut session = Session::without_snapshots(config("unknown"), host).unwrap();
        session.attach(cup, IndividualType::Visible).unwrap();
        session.attach(anonymous, IndividualType::Visible).unwrap();

        assert!(!session.handle_signal(DetectorSignal::begin(
            SignalKind::Contact,
            cup,
            OwnerId(999),
            0.0
        )));
        assert!(!session.handle_signal(DetectorSignal::begin(SignalKind::Contact, cup, anonymous, 0.0)));
        assert!(!session.handle_signal(DetectorSignal::end(SignalKind::Contact, cup, anonymous, 1.0)));
        assert!(session.assembler().journal().open_events().is_empty());
    }

    // -- 3. Episode ids -----------------------------------------------------

    #[test]
    fn empty_episode_id_is_generated() {
        let mut cfg = config("generated");
        cfg.episode_id.clear();
        let session = Session::without_snapshots(cfg, SceneHost::new()).unwrap();
        assert_eq!(session.episode_id().len(), 16);
        assert!(session.episode_id().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
