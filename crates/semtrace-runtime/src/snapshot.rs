//! Background world-state snapshots.
//!
//! The main thread captures a [`WorldStateSnapshot`] (an owned copy of the
//! loaded individuals and their poses) and hands it to the
//! [`SnapshotWorker`], which hashes and serializes it on a background thread
//! as one JSON line. The worker never touches live individuals.
//!
//! At most one task is in flight. A request arriving while the previous task
//! is still running is dropped, not queued.
//!
//! # Example
//!
//! ```
//! use semtrace_runtime::snapshot::{SnapshotWorker, WorldStateSnapshot};
//!
//! let mut worker = SnapshotWorker::new(Vec::<u8>::new());
//! assert!(worker.is_done());
//!
//! let snapshot = WorldStateSnapshot { time: 0.5, sequence: 0, individuals: Vec::new() };
//! assert!(worker.request(snapshot));
//! worker.ensure_completion().unwrap();
//!
//! let written = worker.with_sink(|sink| sink.len()).unwrap();
//! assert!(written > 0);
//! assert_eq!(worker.completed(), 1);
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use semtrace_individuals::handle::IndividualId;
use semtrace_individuals::host::{Host, Pose};
use semtrace_individuals::manager::IndividualManager;
use serde::{Deserialize, Serialize};

use crate::SnapshotError;

// ---------------------------------------------------------------------------
// WorldStateSnapshot
// ---------------------------------------------------------------------------

/// State of one loaded individual at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualState {
    pub individual: IndividualId,
    pub id: String,
    pub class: String,
    pub pose: Pose,
}

/// Immutable copy of the world state handed to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldStateSnapshot {
    /// Simulation time in seconds.
    pub time: f64,
    pub sequence: u64,
    pub individuals: Vec<IndividualState>,
}

impl WorldStateSnapshot {
    /// Capture every loaded root individual whose owner has a pose and
    /// passes `filter`.
    pub fn capture<H: Host + ?Sized>(
        host: &H,
        manager: &IndividualManager,
        time: f64,
        sequence: u64,
        filter: &mut PoseFilter,
    ) -> Self {
        let mut individuals = Vec::new();
        for (handle, individual) in manager.loaded() {
            if !individual.individual_type().is_root() {
                continue;
            }
            let Some(pose) = host.pose(individual.owner()) else {
                continue;
            };
            if filter.accept(handle, pose) {
                individuals.push(IndividualState {
                    individual: handle,
                    id: individual.id().to_owned(),
                    class: individual.class().to_owned(),
                    pose,
                });
            }
        }
        Self {
            time,
            sequence,
            individuals,
        }
    }

    /// BLAKE3 hex digest of the canonical JSON encoding.
    pub fn digest(&self) -> Result<String, SnapshotError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// One written line: the snapshot plus its digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    #[serde(flatten)]
    pub snapshot: WorldStateSnapshot,
    pub hash: String,
}

impl SnapshotRecord {
    pub fn new(snapshot: WorldStateSnapshot) -> Result<Self, SnapshotError> {
        let hash = snapshot.digest()?;
        Ok(Self { snapshot, hash })
    }

    /// Whether `hash` still matches the snapshot contents.
    pub fn verify(&self) -> bool {
        self.snapshot
            .digest()
            .map(|digest| digest == self.hash)
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// PoseFilter
// ---------------------------------------------------------------------------

/// Remembers the last emitted pose per individual. The first observation
/// always passes; later ones only when the location moved by more than the
/// tolerance or the orientation changed noticeably.
#[derive(Debug, Clone, Default)]
pub struct PoseFilter {
    tolerance: f64,
    last: HashMap<IndividualId, Pose>,
}

/// Orientation change (`1 - |q1 . q2|`) that counts as movement.
const ROTATION_TOLERANCE: f64 = 1e-4;

impl PoseFilter {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            last: HashMap::new(),
        }
    }

    pub fn accept(&mut self, individual: IndividualId, pose: Pose) -> bool {
        let moved = match self.last.get(&individual) {
            None => true,
            Some(previous) => {
                previous.distance(&pose) > self.tolerance
                    || previous.rotation_delta(&pose) > ROTATION_TOLERANCE
            }
        };
        if moved {
            self.last.insert(individual, pose);
        }
        moved
    }

    pub fn forget(&mut self, individual: IndividualId) {
        self.last.remove(&individual);
    }
}

// ---------------------------------------------------------------------------
// SnapshotWorker
// ---------------------------------------------------------------------------

/// Single-slot background writer of snapshot records.
pub struct SnapshotWorker<W: Write + Send + 'static> {
    sink: Arc<Mutex<W>>,
    in_flight: Option<JoinHandle<Result<(), SnapshotError>>>,
    completed: u64,
    dropped: u64,
    failed: u64,
}

impl<W: Write + Send + 'static> SnapshotWorker<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            in_flight: None,
            completed: 0,
            dropped: 0,
            failed: 0,
        }
    }

    /// `true` when no task is running.
    pub fn is_done(&self) -> bool {
        self.in_flight
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Start writing `snapshot` in the background.
    ///
    /// Returns `false` and drops the snapshot if the previous task has not
    /// finished yet.
    pub fn request(&mut self, snapshot: WorldStateSnapshot) -> bool {
        if !self.is_done() {
            self.dropped += 1;
            tracing::warn!(
                sequence = snapshot.sequence,
                time = snapshot.time,
                dropped = self.dropped,
                "snapshot worker busy, request dropped"
            );
            return false;
        }
        self.collect_finished();
        let sink = Arc::clone(&self.sink);
        self.in_flight = Some(std::thread::spawn(move || write_record(&sink, snapshot)));
        true
    }

    /// Block until the in-flight task, if any, has finished and return its
    /// outcome.
    pub fn ensure_completion(&mut self) -> Result<(), SnapshotError> {
        let Some(handle) = self.in_flight.take() else {
            return Ok(());
        };
        let outcome = handle.join().unwrap_or(Err(SnapshotError::WorkerPanicked));
        self.account(&outcome);
        outcome
    }

    fn collect_finished(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            let outcome = handle.join().unwrap_or(Err(SnapshotError::WorkerPanicked));
            self.account(&outcome);
        }
    }

    fn account(&mut self, outcome: &Result<(), SnapshotError>) {
        match outcome {
            Ok(()) => self.completed += 1,
            Err(err) => {
                self.failed += 1;
                tracing::warn!(reason = %err, "snapshot task failed");
            }
        }
    }

    /// Run `f` on the sink. Waits for nothing; call
    /// [`ensure_completion`](Self::ensure_completion) first to see every
    /// requested record.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut W) -> R) -> Result<R, SnapshotError> {
        let mut sink = self.sink.lock().map_err(|_| SnapshotError::SinkPoisoned)?;
        Ok(f(&mut sink))
    }

    /// Snapshots written successfully.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Requests dropped because the worker was busy.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

impl<W: Write + Send + 'static> Drop for SnapshotWorker<W> {
    fn drop(&mut self) {
        let _ = self.ensure_completion();
    }
}

impl<W: Write + Send + 'static> std::fmt::Debug for SnapshotWorker<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWorker")
            .field("in_flight", &self.in_flight.is_some())
            .field("completed", &self.completed)
            .field("dropped", &self.dropped)
            .field("failed", &self.failed)
            .finish()
    }
}

fn write_record<W: Write>(sink: &Mutex<W>, snapshot: WorldStateSnapshot) -> Result<(), SnapshotError> {
    let record = SnapshotRecord::new(snapshot)?;
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    let mut sink = sink.lock().map_err(|_| SnapshotError::SinkPoisoned)?;
    sink.write_all(&line)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use semtrace_individuals::prelude::*;
    use std::sync::mpsc;

    // -- helpers ------------------------------------------------------------

    fn empty_snapshot(sequence: u64) -> WorldStateSnapshot {
        WorldStateSnapshot {
            time: sequence as f64,
            sequence,
            individuals: Vec::new(),
        }
    }

    /// A sink that blocks every write until the test releases it.
    struct GatedSink {
        gate: mpsc::Receiver<()>,
        written: Vec<u8>,
    }

    impl Write for GatedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let _ = self.gate.recv();
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    // -- 1. Records ---------------------------------------------------------

    #[test]
    fn records_carry_a_verifiable_digest() {
        let record = SnapshotRecord::new(empty_snapshot(3)).unwrap();
        assert_eq!(record.hash.len(), 64);
        assert!(record.verify());

        let mut tampered = record.clone();
        tampered.snapshot.time = 99.0;
        assert!(!tampered.verify());

        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains("\"sequence\":3"));
        assert!(line.contains("\"hash\""));
        let parsed: SnapshotRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn capture_includes_loaded_roots_only() {
        let mut host = SceneHost::new();
        let cup_owner = host.add(
            HostEntity::named("Cup")
                .with_mesh("SM_Cup")
                .with_pose(Pose::at(1.0, 2.0, 3.0)),
        );
        let table_owner = host.add(HostEntity::named("Table").with_mesh("SM_Table"));
        let mut manager = IndividualManager::with_seed(1);
        let cup = manager.spawn(cup_owner, IndividualType::Visible).unwrap();
        manager.spawn(table_owner, IndividualType::Visible).unwrap();
        manager.set_id(cup, "cup").unwrap();
        manager.set_class(cup, "Cup").unwrap();
        manager.load(&host, cup, false, false).unwrap();

        let mut filter = PoseFilter::new(0.5);
        let snapshot = WorldStateSnapshot::capture(&host, &manager, 0.0, 0, &mut filter);
        assert_eq!(snapshot.individuals.len(), 1);
        assert_eq!(snapshot.individuals[0].id, "cup");
        assert_eq!(snapshot.individuals[0].pose.location, [1.0, 2.0, 3.0]);

        let unchanged = WorldStateSnapshot::capture(&host, &manager, 0.1, 1, &mut filter);
        assert!(unchanged.individuals.is_empty(), "pose did not change");

        host.set_pose(cup_owner, Pose::at(1.0, 2.0, 4.0));
        let moved = WorldStateSnapshot::capture(&host, &manager, 0.2, 2, &mut filter);
        assert_eq!(moved.individuals.len(), 1);
    }

    #[test]
    fn pose_filter_tolerance() {
        let mut filter = PoseFilter::new(0.5);
        let id = IndividualId::new(0, 0);
        assert!(filter.accept(id, Pose::at(0.0, 0.0, 0.0)));
        assert!(!filter.accept(id, Pose::at(0.4, 0.0, 0.0)));
        assert!(filter.accept(id, Pose::at(0.6, 0.0, 0.0)));
        filter.forget(id);
        assert!(filter.accept(id, Pose::at(0.6, 0.0, 0.0)));
    }

    // -- 2. Worker ----------------------------------------------------------

    #[test]
    fn requests_while_busy_are_dropped() {
        let (release, gate) = mpsc::channel();
        let mut worker = SnapshotWorker::new(GatedSink {
            gate,
            written: Vec::new(),
        });

        assert!(worker.request(empty_snapshot(0)));
        assert!(!worker.is_done());
        assert!(!worker.request(empty_snapshot(1)));
        assert_eq!(worker.dropped(), 1);

        release.send(()).unwrap();
        worker.ensure_completion().unwrap();
        assert!(worker.is_done());
        assert_eq!(worker.completed(), 1);

        // Only the first snapshot made it to the sink.
        let text = worker
            .with_sink(|sink| String::from_utf8(sink.written.clone()).unwrap())
            .unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"sequence\":0"));
    }

    #[test]
    fn sequential_requests_produce_json_lines() {
        let mut worker = SnapshotWorker::new(Vec::new());
        for sequence in 0..5 {
            worker.ensure_completion().unwrap();
            assert!(worker.request(empty_snapshot(sequence)));
        }
        worker.ensure_completion().unwrap();
        assert_eq!(worker.completed(), 5);
        assert_eq!(worker.dropped(), 0);

        let lines: Vec<SnapshotRecord> = worker
            .with_sink(|sink| {
                String::from_utf8(sink.clone())
                    .unwrap()
                    .lines()
                    .map(|line| serde_json::from_str(line).unwrap())
                    .collect()
            })
            .unwrap();
        let sequences: Vec<u64> = lines.iter().map(|r| r.snapshot.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert!(lines.iter().all(SnapshotRecord::verify));
    }

    #[test]
    fn ensure_completion_without_task_is_ok() {
        let mut worker = SnapshotWorker::new(Vec::new());
        worker.ensure_completion().unwrap();
        assert_eq!(worker.completed(), 0);
    }
}
