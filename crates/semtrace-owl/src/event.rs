//! Interval events between individuals.
//!
//! An [`OpenEvent`] is created when a detector reports a begin condition and
//! becomes an immutable [`Event`] once the matching end condition arrives.
//! The pair id correlates both halves: it is derived from the event type and
//! the participants, so the same physical contact always maps to the same id.

use serde::{Deserialize, Serialize};
use semtrace_individuals::handle::IndividualId;

use crate::node::{AttributeValue, OwlNode, PrefixName};

/// DTD entity that individual ids are relative to.
pub const LOG_ENTITY: &str = "log";
/// DTD entity of the ontology vocabulary.
pub const KNOWROB_ENTITY: &str = "knowrob";

/// Identifier of the timepoint individual for `time` (seconds).
///
/// Timestamps are rounded to microseconds and trailing zeros are trimmed, so
/// `1.0` becomes `timepoint_1.0` and `3.25` becomes `timepoint_3.25`.
pub fn timepoint_id(time: f64) -> String {
    format!("timepoint_{}", format_seconds(time))
}

fn format_seconds(time: f64) -> String {
    let mut rendered = format!("{time:.6}");
    while rendered.ends_with('0') && !rendered.ends_with(".0") {
        rendered.pop();
    }
    rendered
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// An individual taking part in an event, captured when the event opens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub individual: IndividualId,
    /// Semantic id of the individual.
    pub id: String,
    /// Ontology class of the individual.
    pub class: String,
}

impl Participant {
    pub fn new(individual: IndividualId, id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            individual,
            id: id.into(),
            class: class.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventType / EventKind
// ---------------------------------------------------------------------------

/// Discriminant of [`EventKind`], used for pair ids and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    Contact,
    Grasp,
    PickUp,
    PreGraspPositioning,
    SupportedBy,
    Sliding,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Contact,
        EventType::Grasp,
        EventType::PickUp,
        EventType::PreGraspPositioning,
        EventType::SupportedBy,
        EventType::Sliding,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventType::Contact => "Contact",
            EventType::Grasp => "Grasp",
            EventType::PickUp => "PickUp",
            EventType::PreGraspPositioning => "PreGraspPositioning",
            EventType::SupportedBy => "SupportedBy",
            EventType::Sliding => "Sliding",
        }
    }

    /// Ontology class of events of this type.
    pub fn owl_class(self) -> &'static str {
        match self {
            EventType::Contact => "TouchingSituation",
            EventType::Grasp => "GraspingSomething",
            EventType::PickUp => "PickUpSituation",
            EventType::PreGraspPositioning => "PreGraspSituation",
            EventType::SupportedBy => "SupportedBySituation",
            EventType::Sliding => "SlidingSituation",
        }
    }

    /// Contacts have no direction; every other type does.
    pub fn is_symmetric(self) -> bool {
        self == EventType::Contact
    }

    /// Two objects touching: contact, support and sliding. Only these are
    /// subject to the minimum-duration filter.
    pub fn is_contact_family(self) -> bool {
        matches!(
            self,
            EventType::Contact | EventType::SupportedBy | EventType::Sliding
        )
    }

    fn code(self) -> u8 {
        match self {
            EventType::Contact => 0,
            EventType::Grasp => 1,
            EventType::PickUp => 2,
            EventType::PreGraspPositioning => 3,
            EventType::SupportedBy => 4,
            EventType::Sliding => 5,
        }
    }
}

/// Correlation key for an event of `event_type` between `a` and `b`.
///
/// The BLAKE3 digest of the type and both handles, truncated to 64 bits.
/// For symmetric types the handles are sorted first, so `(a, b)` and
/// `(b, a)` collide on purpose.
pub fn pair_id(event_type: EventType, a: IndividualId, b: IndividualId) -> u64 {
    let (first, second) = if event_type.is_symmetric() && b < a {
        (b, a)
    } else {
        (a, b)
    };
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[event_type.code()]);
    hasher.update(&first.to_raw().to_le_bytes());
    hasher.update(&second.to_raw().to_le_bytes());
    let digest = hasher.finalize();
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(word)
}

/// What happened, and to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Contact {
        first: Participant,
        second: Participant,
    },
    Grasp {
        manipulator: Participant,
        item: Participant,
        /// Grasp taxonomy class, e.g. `PowerGrasp`.
        grasp_type: Option<String>,
    },
    PickUp {
        manipulator: Participant,
        item: Participant,
    },
    PreGraspPositioning {
        manipulator: Participant,
        item: Participant,
    },
    SupportedBy {
        supported: Participant,
        supporting: Participant,
    },
    Sliding {
        supported: Participant,
        supporting: Participant,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::Contact { .. } => EventType::Contact,
            EventKind::Grasp { .. } => EventType::Grasp,
            EventKind::PickUp { .. } => EventType::PickUp,
            EventKind::PreGraspPositioning { .. } => EventType::PreGraspPositioning,
            EventKind::SupportedBy { .. } => EventType::SupportedBy,
            EventKind::Sliding { .. } => EventType::Sliding,
        }
    }

    /// Relation properties in rendering order: `(property, participant)`.
    pub fn relations(&self) -> [(&'static str, &Participant); 2] {
        match self {
            EventKind::Contact { first, second } => [("inContact", first), ("inContact", second)],
            EventKind::Grasp {
                manipulator, item, ..
            }
            | EventKind::PickUp { manipulator, item }
            | EventKind::PreGraspPositioning { manipulator, item } => {
                [("performedBy", manipulator), ("objectActedOn", item)]
            }
            EventKind::SupportedBy {
                supported,
                supporting,
            }
            | EventKind::Sliding {
                supported,
                supporting,
            } => [("isSupported", supported), ("isSupporting", supporting)],
        }
    }

    pub fn participants(&self) -> [&Participant; 2] {
        let [(_, a), (_, b)] = self.relations();
        [a, b]
    }

    pub fn involves(&self, individual: IndividualId) -> bool {
        self.participants()
            .iter()
            .any(|p| p.individual == individual)
    }

    /// The pair id this event correlates under.
    pub fn pair_id(&self) -> u64 {
        let [a, b] = self.participants();
        pair_id(self.event_type(), a.individual, b.individual)
    }
}

// ---------------------------------------------------------------------------
// OpenEvent / Event
// ---------------------------------------------------------------------------

/// An event whose end has not been observed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenEvent {
    pub id: String,
    pub kind: EventKind,
    pub start: f64,
    pub pair_id: u64,
}

impl OpenEvent {
    /// Close at `end`. The caller guarantees `end >= start`.
    pub fn close(self, end: f64) -> Event {
        Event {
            id: self.id,
            kind: self.kind,
            start: self.start,
            end,
            pair_id: self.pair_id,
        }
    }
}

/// A closed event. Never mutated after closing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub kind: EventKind,
    pub start: f64,
    pub end: f64,
    pub pair_id: u64,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Short label used to group timeline rows: `"Contact - 42"`.
    pub fn context(&self) -> String {
        format!("{} - {}", self.event_type().name(), self.pair_id)
    }

    /// Key/value pairs describing the event for hover text.
    pub fn tooltip(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("Id".to_owned(), self.id.clone()),
            ("Type".to_owned(), self.event_type().name().to_owned()),
        ];
        for (property, participant) in self.kind.relations() {
            pairs.push((
                property.to_owned(),
                format!("{} ({})", participant.id, participant.class),
            ));
        }
        if let EventKind::Grasp {
            grasp_type: Some(grasp_type),
            ..
        } = &self.kind
        {
            pairs.push(("graspType".to_owned(), grasp_type.clone()));
        }
        pairs
    }

    /// Map this event to its ontology individual:
    ///
    /// ```text
    /// <owl:NamedIndividual rdf:about="&log;{id}">
    ///     <rdf:type rdf:resource="&knowrob;{Class}"/>
    ///     <knowrob:startTime rdf:resource="&log;timepoint_{start}"/>
    ///     <knowrob:endTime rdf:resource="&log;timepoint_{end}"/>
    ///     <knowrob:{relation} rdf:resource="&log;{participant}"/>  x2
    /// </owl:NamedIndividual>
    /// ```
    pub fn to_owl_node(&self) -> OwlNode {
        let knowrob = |local: &str| PrefixName::new(KNOWROB_ENTITY, local);
        let mut node = OwlNode::new(PrefixName::new("owl", "NamedIndividual"))
            .with_attribute(
                PrefixName::new("rdf", "about"),
                AttributeValue::new(LOG_ENTITY, self.id.as_str()),
            )
            .with_child(OwlNode::resource_type(
                KNOWROB_ENTITY,
                self.event_type().owl_class(),
            ))
            .with_child(OwlNode::resource_property(
                knowrob("startTime"),
                LOG_ENTITY,
                &timepoint_id(self.start),
            ))
            .with_child(OwlNode::resource_property(
                knowrob("endTime"),
                LOG_ENTITY,
                &timepoint_id(self.end),
            ));
        for (property, participant) in self.kind.relations() {
            node.add_child(OwlNode::resource_property(
                knowrob(property),
                LOG_ENTITY,
                &participant.id,
            ));
        }
        if let EventKind::Grasp {
            grasp_type: Some(grasp_type),
            ..
        } = &self.kind
        {
            node.add_child(OwlNode::resource_property(
                knowrob("graspType"),
                KNOWROB_ENTITY,
                grasp_type,
            ));
        }
        node
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cup() -> Participant {
        Participant::new(IndividualId::new(0, 0), "obj1", "Cup")
    }

    fn table() -> Participant {
        Participant::new(IndividualId::new(1, 0), "obj2", "Table")
    }

    fn contact(start: f64, end: f64) -> Event {
        Event {
            id: "ev1".to_owned(),
            kind: EventKind::Contact {
                first: cup(),
                second: table(),
            },
            start,
            end,
            pair_id: 42,
        }
    }

    // -- 1. Timepoints ------------------------------------------------------

    #[test]
    fn timepoint_ids_are_trimmed() {
        assert_eq!(timepoint_id(1.0), "timepoint_1.0");
        assert_eq!(timepoint_id(3.5), "timepoint_3.5");
        assert_eq!(timepoint_id(0.1234567), "timepoint_0.123457");
        assert_eq!(timepoint_id(12.0000001), "timepoint_12.0");
    }

    // -- 2. Pair ids --------------------------------------------------------

    #[test]
    fn contact_pair_ids_are_symmetric() {
        let (a, b) = (IndividualId::new(3, 0), IndividualId::new(9, 1));
        assert_eq!(
            pair_id(EventType::Contact, a, b),
            pair_id(EventType::Contact, b, a)
        );
        assert_ne!(
            pair_id(EventType::Grasp, a, b),
            pair_id(EventType::Grasp, b, a)
        );
        assert_ne!(
            pair_id(EventType::Contact, a, b),
            pair_id(EventType::SupportedBy, a, b),
            "types do not share pair ids"
        );
    }

    // -- 3. OWL mapping -----------------------------------------------------

    #[test]
    fn contact_maps_to_touching_situation() {
        let node = contact(1.0, 3.5).to_owl_node();
        let rendered = node.render("");
        assert!(rendered.starts_with("<owl:NamedIndividual rdf:about=\"&log;ev1\">\n"));
        assert!(rendered.contains("<rdf:type rdf:resource=\"&knowrob;TouchingSituation\"/>"));
        assert!(rendered.contains("<knowrob:startTime rdf:resource=\"&log;timepoint_1.0\"/>"));
        assert!(rendered.contains("<knowrob:endTime rdf:resource=\"&log;timepoint_3.5\"/>"));
        assert!(rendered.contains("<knowrob:inContact rdf:resource=\"&log;obj1\"/>"));
        assert!(rendered.contains("<knowrob:inContact rdf:resource=\"&log;obj2\"/>"));
        assert_eq!(node.children.len(), 5);
    }

    #[test]
    fn every_kind_has_a_fixed_class_and_relations() {
        let kinds = [
            (
                EventKind::Grasp {
                    manipulator: cup(),
                    item: table(),
                    grasp_type: Some("PowerGrasp".to_owned()),
                },
                "GraspingSomething",
                ["performedBy", "objectActedOn"],
            ),
            (
                EventKind::PickUp {
                    manipulator: cup(),
                    item: table(),
                },
                "PickUpSituation",
                ["performedBy", "objectActedOn"],
            ),
            (
                EventKind::PreGraspPositioning {
                    manipulator: cup(),
                    item: table(),
                },
                "PreGraspSituation",
                ["performedBy", "objectActedOn"],
            ),
            (
                EventKind::SupportedBy {
                    supported: cup(),
                    supporting: table(),
                },
                "SupportedBySituation",
                ["isSupported", "isSupporting"],
            ),
            (
                EventKind::Sliding {
                    supported: cup(),
                    supporting: table(),
                },
                "SlidingSituation",
                ["isSupported", "isSupporting"],
            ),
        ];
        for (kind, class, properties) in kinds {
            assert_eq!(kind.event_type().owl_class(), class);
            let names: Vec<&str> = kind.relations().iter().map(|(p, _)| *p).collect();
            assert_eq!(names, properties);
        }
    }

    #[test]
    fn contact_family() {
        let family: Vec<EventType> = EventType::ALL
            .into_iter()
            .filter(|t| t.is_contact_family())
            .collect();
        assert_eq!(
            family,
            [EventType::Contact, EventType::SupportedBy, EventType::Sliding]
        );
    }

    #[test]
    fn grasp_type_is_rendered() {
        let event = Event {
            kind: EventKind::Grasp {
                manipulator: cup(),
                item: table(),
                grasp_type: Some("PowerGrasp".to_owned()),
            },
            ..contact(0.0, 1.0)
        };
        let rendered = event.to_owl_node().render("");
        assert!(rendered.contains("<knowrob:graspType rdf:resource=\"&knowrob;PowerGrasp\"/>"));
        assert!(event
            .tooltip()
            .contains(&("graspType".to_owned(), "PowerGrasp".to_owned())));
    }

    #[test]
    fn context_and_duration() {
        let event = contact(1.0, 3.5);
        assert_eq!(event.context(), "Contact - 42");
        assert!((event.duration() - 2.5).abs() < 1e-12);
        assert!(event.kind.involves(IndividualId::new(1, 0)));
        assert!(!event.kind.involves(IndividualId::new(2, 0)));
    }
}
