//! Event assembly pipeline.
//!
//! The [`EventAssembler`] ties an [`EventJournal`] to an
//! [`ExperimentDocument`]: detectors open and close events through it, and
//! every event that closes is registered into the document immediately, so
//! the document always reflects exactly the closed events.
//!
//! # Example
//!
//! ```
//! use semtrace_individuals::prelude::*;
//! use semtrace_owl::assembler::{participant, EventAssembler};
//! use semtrace_owl::event::EventKind;
//!
//! let mut host = SceneHost::new();
//! let cup_owner = host.add(HostEntity::named("Cup").with_mesh("SM_Cup"));
//! let table_owner = host.add(HostEntity::named("Table").with_mesh("SM_Table"));
//!
//! let mut manager = IndividualManager::with_seed(7);
//! let cup = manager.spawn(cup_owner, IndividualType::Visible).unwrap();
//! let table = manager.spawn(table_owner, IndividualType::Visible).unwrap();
//! for (id, semantic, class) in [(cup, "obj1", "Cup"), (table, "obj2", "Table")] {
//!     manager.set_id(id, semantic).unwrap();
//!     manager.set_class(id, class).unwrap();
//!     manager.load(&host, id, false, false).unwrap();
//! }
//!
//! let mut assembler = EventAssembler::new("episode1");
//! let kind = EventKind::Contact {
//!     first: participant(&manager, cup).unwrap(),
//!     second: participant(&manager, table).unwrap(),
//! };
//! assembler.open_event(kind, 1.0, 42).unwrap();
//! assert!(assembler.close_event(42, 3.5).unwrap());
//!
//! let xml = assembler.serialize();
//! assert_eq!(xml.matches("&knowrob;TouchingSituation\"/>").count(), 1);
//! ```

use std::path::{Path, PathBuf};

use semtrace_individuals::handle::IndividualId;
use semtrace_individuals::manager::IndividualManager;

use crate::event::{EventKind, Participant};
use crate::experiment::ExperimentDocument;
use crate::journal::{EventHandle, EventJournal};
use crate::timeline::{self, TimelineEntry, TimelineOptions};
use crate::{EventError, OwlError};

/// Snapshot `individual` as an event participant. Only loaded individuals
/// can take part in events.
pub fn participant(
    manager: &IndividualManager,
    individual: IndividualId,
) -> Result<Participant, EventError> {
    match manager.individual(individual) {
        Some(record) if record.is_loaded() => {
            Ok(Participant::new(individual, record.id(), record.class()))
        }
        _ => Err(EventError::ParticipantNotLoaded { individual }),
    }
}

// ---------------------------------------------------------------------------
// EventAssembler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventAssembler {
    journal: EventJournal,
    document: ExperimentDocument,
}

impl EventAssembler {
    /// An assembler writing into a default document for `episode_id`.
    pub fn new(episode_id: impl Into<String>) -> Self {
        Self::with_parts(EventJournal::new(), ExperimentDocument::new(episode_id))
    }

    pub fn with_parts(journal: EventJournal, document: ExperimentDocument) -> Self {
        Self { journal, document }
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    pub fn document(&self) -> &ExperimentDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut ExperimentDocument {
        &mut self.document
    }

    pub fn open_event(
        &mut self,
        kind: EventKind,
        start: f64,
        pair_id: u64,
    ) -> Result<EventHandle, EventError> {
        self.journal.open_event(kind, start, pair_id).map_err(|err| {
            tracing::warn!(pair_id, reason = %err, "open signal rejected");
            err
        })
    }

    /// Close the event for `pair_id` and register it into the document.
    ///
    /// Returns `false` when the event was dropped by the short-event filter.
    /// Rejected closes are logged and leave every existing event unchanged.
    pub fn close_event(&mut self, pair_id: u64, end: f64) -> Result<bool, EventError> {
        match self.journal.close_event(pair_id, end) {
            Ok(Some(index)) => {
                self.document
                    .register_event(&self.journal.closed_events()[index]);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => {
                tracing::warn!(pair_id, reason = %err, "close signal discarded");
                Err(err)
            }
        }
    }

    /// Drop the open events of an individual that left the world.
    pub fn discard_involving(&mut self, individual: IndividualId) -> usize {
        let dropped = self.journal.discard_involving(individual);
        if dropped > 0 {
            tracing::debug!(individual = %individual, dropped, "open events discarded");
        }
        dropped
    }

    /// Close everything still open at `end` and register the results.
    /// Returns the number of events added to the document.
    pub fn finish(&mut self, end: f64) -> usize {
        let range = self.journal.finish_all(end);
        let count = range.len();
        for event in &self.journal.closed_events()[range] {
            self.document.register_event(event);
        }
        count
    }

    pub fn serialize(&self) -> String {
        self.document.serialize()
    }

    pub fn write_to_file(&self, log_dir: &Path, overwrite: bool) -> Result<PathBuf, OwlError> {
        self.document.write_to_file(log_dir, overwrite)
    }

    pub fn timeline(&self, options: &TimelineOptions) -> Vec<TimelineEntry> {
        timeline::timeline(self.journal.closed_events(), options)
    }

    pub fn write_timeline(
        &self,
        log_dir: &Path,
        options: &TimelineOptions,
        overwrite: bool,
    ) -> Result<PathBuf, OwlError> {
        timeline::write_timeline(
            log_dir,
            self.document.episode_id(),
            &self.timeline(options),
            options,
            overwrite,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn participant_at(index: u32, id: &str, class: &str) -> Participant {
        Participant::new(IndividualId::new(index, 0), id, class)
    }

    fn contact() -> EventKind {
        EventKind::Contact {
            first: participant_at(0, "obj1", "Cup"),
            second: participant_at(1, "obj2", "Table"),
        }
    }

    #[test]
    fn only_closed_events_reach_the_document() {
        let mut assembler = EventAssembler::new("ep");
        assembler.open_event(contact(), 1.0, 1).unwrap();
        assert_eq!(assembler.document().event_count(), 0);
        assert!(assembler.close_event(1, 2.0).unwrap());
        assert_eq!(assembler.document().event_count(), 1);
        assert_eq!(assembler.document().object_count(), 2);
    }

    #[test]
    fn unmatched_close_changes_nothing() {
        let mut assembler = EventAssembler::new("ep");
        assembler.open_event(contact(), 1.0, 1).unwrap();
        let before = assembler.serialize();
        assert!(assembler.close_event(2, 2.0).is_err());
        assert_eq!(assembler.serialize(), before);
        assert!(assembler.journal().is_open(1));
    }

    #[test]
    fn short_events_are_not_registered() {
        let mut assembler =
            EventAssembler::with_parts(EventJournal::with_min_duration(1.0), ExperimentDocument::new("ep"));
        assembler.open_event(contact(), 1.0, 1).unwrap();
        assert!(!assembler.close_event(1, 1.5).unwrap());
        assert_eq!(assembler.document().event_count(), 0);
        assert_eq!(assembler.document().timepoint_count(), 0);
    }

    #[test]
    fn finish_registers_open_events() {
        let mut assembler = EventAssembler::new("ep");
        assembler.open_event(contact(), 1.0, 1).unwrap();
        assembler
            .open_event(
                EventKind::SupportedBy {
                    supported: participant_at(0, "obj1", "Cup"),
                    supporting: participant_at(2, "obj3", "Shelf"),
                },
                2.0,
                2,
            )
            .unwrap();
        assert_eq!(assembler.finish(5.0), 2);
        assert_eq!(assembler.document().event_count(), 2);
        assert_eq!(assembler.document().object_count(), 3);
        assert_eq!(assembler.timeline(&TimelineOptions::default()).len(), 2);
    }

    #[test]
    fn discard_involving_prevents_registration() {
        let mut assembler = EventAssembler::new("ep");
        assembler.open_event(contact(), 1.0, 1).unwrap();
        assert_eq!(assembler.discard_involving(IndividualId::new(1, 0)), 1);
        assert_eq!(assembler.finish(2.0), 0);
    }
}
