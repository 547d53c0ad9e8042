//! The narrow interface event producers talk to.
//!
//! Contact volumes, grasp detectors and support checks live in the host and
//! only know engine owners. They report [`DetectorSignal`]s naming the two
//! subjects; the session resolves them to individuals.

use semtrace_individuals::host::OwnerId;
use semtrace_owl::event::{EventKind, EventType, Participant};
use serde::{Deserialize, Serialize};

/// What a detector observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Contact,
    Grasp { grasp_type: Option<String> },
    PickUp,
    PreGraspPositioning,
    SupportedBy,
    Sliding,
}

impl SignalKind {
    pub fn event_type(&self) -> EventType {
        match self {
            SignalKind::Contact => EventType::Contact,
            SignalKind::Grasp { .. } => EventType::Grasp,
            SignalKind::PickUp => EventType::PickUp,
            SignalKind::PreGraspPositioning => EventType::PreGraspPositioning,
            SignalKind::SupportedBy => EventType::SupportedBy,
            SignalKind::Sliding => EventType::Sliding,
        }
    }

    /// Build the event payload. `first` is the manipulator for hand events
    /// and the supported item for support events.
    pub fn into_event_kind(self, first: Participant, second: Participant) -> EventKind {
        match self {
            SignalKind::Contact => EventKind::Contact { first, second },
            SignalKind::Grasp { grasp_type } => EventKind::Grasp {
                manipulator: first,
                item: second,
                grasp_type,
            },
            SignalKind::PickUp => EventKind::PickUp {
                manipulator: first,
                item: second,
            },
            SignalKind::PreGraspPositioning => EventKind::PreGraspPositioning {
                manipulator: first,
                item: second,
            },
            SignalKind::SupportedBy => EventKind::SupportedBy {
                supported: first,
                supporting: second,
            },
            SignalKind::Sliding => EventKind::Sliding {
                supported: first,
                supporting: second,
            },
        }
    }
}

/// An engine-side participant: an owner, or one bone of a skeletal owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub owner: OwnerId,
    pub bone: Option<usize>,
}

impl Subject {
    pub fn owner(owner: OwnerId) -> Self {
        Self { owner, bone: None }
    }

    pub fn bone(owner: OwnerId, bone: usize) -> Self {
        Self {
            owner,
            bone: Some(bone),
        }
    }
}

impl From<OwnerId> for Subject {
    fn from(owner: OwnerId) -> Self {
        Self::owner(owner)
    }
}

/// A begin or end report. Begin and end of the same occurrence name the
/// same kind and subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DetectorSignal {
    Begin {
        kind: SignalKind,
        first: Subject,
        second: Subject,
        time: f64,
    },
    End {
        kind: SignalKind,
        first: Subject,
        second: Subject,
        time: f64,
    },
}

impl DetectorSignal {
    pub fn begin(
        kind: SignalKind,
        first: impl Into<Subject>,
        second: impl Into<Subject>,
        time: f64,
    ) -> Self {
        DetectorSignal::Begin {
            kind,
            first: first.into(),
            second: second.into(),
            time,
        }
    }

    pub fn end(
        kind: SignalKind,
        first: impl Into<Subject>,
        second: impl Into<Subject>,
        time: f64,
    ) -> Self {
        DetectorSignal::End {
            kind,
            first: first.into(),
            second: second.into(),
            time,
        }
    }

    pub fn kind(&self) -> &SignalKind {
        match self {
            DetectorSignal::Begin { kind, .. } | DetectorSignal::End { kind, .. } => kind,
        }
    }

    pub fn subjects(&self) -> (Subject, Subject) {
        match self {
            DetectorSignal::Begin { first, second, .. }
            | DetectorSignal::End { first, second, .. } => (*first, *second),
        }
    }

    pub fn time(&self) -> f64 {
        match self {
            DetectorSignal::Begin { time, .. } | DetectorSignal::End { time, .. } => *time,
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(self, DetectorSignal::Begin { .. })
    }
}
