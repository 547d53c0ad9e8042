//! Open/closed event bookkeeping.
//!
//! The [`EventJournal`] pairs begin and end signals by pair id. At most one
//! event is open per pair id; closing moves it to the closed list, which is
//! append-only and kept in closing order.
//!
//! # Example
//!
//! ```
//! use semtrace_individuals::handle::IndividualId;
//! use semtrace_owl::event::{EventKind, Participant};
//! use semtrace_owl::journal::EventJournal;
//!
//! let mut journal = EventJournal::new();
//! let kind = EventKind::Contact {
//!     first: Participant::new(IndividualId::new(0, 0), "obj1", "Cup"),
//!     second: Participant::new(IndividualId::new(1, 0), "obj2", "Table"),
//! };
//!
//! journal.open_event(kind, 1.0, 42).unwrap();
//! assert!(journal.is_open(42));
//!
//! let index = journal.close_event(42, 3.5).unwrap();
//! assert_eq!(index, Some(0));
//! assert_eq!(journal.closed_events()[0].context(), "Contact - 42");
//! ```

use std::ops::Range;

use semtrace_individuals::handle::IndividualId;
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind, EventType, OpenEvent};
use crate::EventError;

/// Returned by [`EventJournal::open_event`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventHandle {
    pub pair_id: u64,
    pub event_id: String,
}

/// Derive a stable event id from its type, pair and opening sequence number.
pub fn event_id(event_type: EventType, pair_id: u64, sequence: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&pair_id.to_le_bytes());
    hasher.update(&sequence.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{}_{}", event_type.name(), &hex.as_str()[..16])
}

// ---------------------------------------------------------------------------
// EventJournal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventJournal {
    open: Vec<OpenEvent>,
    closed: Vec<Event>,
    /// Closed contact-family events shorter than this (seconds) are dropped.
    min_duration: f64,
    next_sequence: u64,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A journal that drops contact, support and sliding events shorter
    /// than `min_duration` seconds. Grasp-family events are always kept.
    pub fn with_min_duration(min_duration: f64) -> Self {
        Self {
            min_duration: min_duration.max(0.0),
            ..Self::default()
        }
    }

    pub fn min_duration(&self) -> f64 {
        self.min_duration
    }

    /// Open a new event under `pair_id`.
    ///
    /// Fails if `start` is not finite or if an event with the same pair id is
    /// already open; the existing event is left untouched.
    pub fn open_event(
        &mut self,
        kind: EventKind,
        start: f64,
        pair_id: u64,
    ) -> Result<EventHandle, EventError> {
        if !start.is_finite() {
            return Err(EventError::InvalidTime { pair_id, time: start });
        }
        if let Some(existing) = self.open.iter().find(|e| e.pair_id == pair_id) {
            return Err(EventError::DuplicatePair {
                pair_id,
                open_id: existing.id.clone(),
            });
        }
        let id = event_id(kind.event_type(), pair_id, self.next_sequence);
        self.next_sequence += 1;
        tracing::debug!(pair_id, event = %id, start, "event opened");
        self.open.push(OpenEvent {
            id: id.clone(),
            kind,
            start,
            pair_id,
        });
        Ok(EventHandle {
            pair_id,
            event_id: id,
        })
    }

    /// Close the open event with `pair_id` at `end`.
    ///
    /// Returns the index of the new closed event, or `None` when a
    /// contact-family event was shorter than the minimum duration and got
    /// dropped. A close with
    /// no matching open event, a non-finite time, or an end before the start
    /// is rejected; in the latter two cases the event stays open.
    pub fn close_event(&mut self, pair_id: u64, end: f64) -> Result<Option<usize>, EventError> {
        let position = self
            .open
            .iter()
            .position(|e| e.pair_id == pair_id)
            .ok_or(EventError::UnmatchedClose { pair_id })?;
        if !end.is_finite() {
            return Err(EventError::InvalidTime { pair_id, time: end });
        }
        let start = self.open[position].start;
        if end < start {
            return Err(EventError::EndBeforeStart {
                pair_id,
                start,
                end,
            });
        }
        let event = self.open.remove(position).close(end);
        Ok(self.push_closed(event))
    }

    fn push_closed(&mut self, event: Event) -> Option<usize> {
        if event.event_type().is_contact_family() && event.duration() < self.min_duration {
            tracing::debug!(
                pair_id = event.pair_id,
                event = %event.id,
                duration = event.duration(),
                "event shorter than minimum duration dropped"
            );
            return None;
        }
        tracing::debug!(pair_id = event.pair_id, event = %event.id, end = event.end, "event closed");
        self.closed.push(event);
        Some(self.closed.len() - 1)
    }

    /// Drop the open event with `pair_id` without closing it.
    pub fn discard_open(&mut self, pair_id: u64) -> Option<OpenEvent> {
        let position = self.open.iter().position(|e| e.pair_id == pair_id)?;
        Some(self.open.remove(position))
    }

    /// Drop every open event involving `individual`. Returns how many.
    pub fn discard_involving(&mut self, individual: IndividualId) -> usize {
        let before = self.open.len();
        self.open.retain(|e| !e.kind.involves(individual));
        before - self.open.len()
    }

    /// Close every open event at `end` (or at its own start, whichever is
    /// later) in opening order. Returns the index range of the events added
    /// to the closed list.
    pub fn finish_all(&mut self, end: f64) -> Range<usize> {
        let first = self.closed.len();
        let open = std::mem::take(&mut self.open);
        for event in open {
            let close_at = if end.is_finite() { end.max(event.start) } else { event.start };
            let event = event.close(close_at);
            self.push_closed(event);
        }
        first..self.closed.len()
    }

    pub fn is_open(&self, pair_id: u64) -> bool {
        self.open.iter().any(|e| e.pair_id == pair_id)
    }

    pub fn open_events(&self) -> &[OpenEvent] {
        &self.open
    }

    /// Closed events in closing order.
    pub fn closed_events(&self) -> &[Event] {
        &self.closed
    }

    pub fn events_involving(&self, individual: IndividualId) -> impl Iterator<Item = &Event> {
        self.closed
            .iter()
            .filter(move |e| e.kind.involves(individual))
    }

    pub fn events_of_type(&self, event_type: EventType) -> impl Iterator<Item = &Event> {
        self.closed
            .iter()
            .filter(move |e| e.event_type() == event_type)
    }

    /// Number of closed events.
    pub fn len(&self) -> usize {
        self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
    }

    /// Forget all open and closed events.
    pub fn clear(&mut self) {
        self.open.clear();
        self.closed.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
