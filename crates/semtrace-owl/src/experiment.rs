//! The experiment (episode) document.
//!
//! [`ExperimentDocument`] wraps an [`OwlDocument`] preloaded with the
//! experiment vocabulary and accumulates closed events. Every event pulls in
//! its two timepoints and its participants; both registries are deduplicated
//! so each timepoint and each object appears exactly once in the output no
//! matter how many events reference it.
//!
//! # Example
//!
//! ```
//! use semtrace_individuals::handle::IndividualId;
//! use semtrace_owl::event::{Event, EventKind, Participant};
//! use semtrace_owl::experiment::ExperimentDocument;
//!
//! let mut document = ExperimentDocument::new("episode1");
//! document.register_event(&Event {
//!     id: "ev1".to_owned(),
//!     kind: EventKind::Contact {
//!         first: Participant::new(IndividualId::new(0, 0), "obj1", "Cup"),
//!         second: Participant::new(IndividualId::new(1, 0), "obj2", "Table"),
//!     },
//!     start: 1.0,
//!     end: 3.5,
//!     pair_id: 42,
//! });
//!
//! let xml = document.serialize();
//! assert!(xml.contains("&knowrob;TouchingSituation"));
//! assert_eq!(document.timepoint_count(), 2);
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::document::OwlDocument;
use crate::event::{timepoint_id, Event, Participant, KNOWROB_ENTITY, LOG_ENTITY};
use crate::node::{AttributeValue, EntityDtd, OwlNode, PrefixName};
use crate::OwlError;

/// Suffix of the serialized experiment document file.
pub const DOCUMENT_FILE_SUFFIX: &str = "_ED.owl";

/// Sub-directory of the log directory that episodes are written to.
pub const EPISODES_DIR: &str = "Episodes";

const LOG_URI: &str = "http://knowrob.org/kb/ameva_log.owl";
const KNOWROB_URI: &str = "http://knowrob.org/kb/knowrob.owl#";

const PROPERTY_DEFINITIONS: [&str; 16] = [
    "taskContext",
    "taskSuccess",
    "startTime",
    "endTime",
    "experiment",
    "inContact",
    "performedBy",
    "objectActedOn",
    "deviceUsed",
    "outputsCreated",
    "isSupported",
    "isSupporting",
    "inEpisode",
    "subAction",
    "performedInMap",
    "graspType",
];

const DATATYPE_DEFINITIONS: [&str; 2] = ["quaternion", "translation"];

const CLASS_DEFINITIONS: [&str; 13] = [
    "AmevaExperiment",
    "UnrealExperiment",
    "GraspingSomething",
    "SlicingSomething",
    "TouchingSituation",
    "SupportedBySituation",
    "ContainerManipulation",
    "PickUpSituation",
    "PreGraspSituation",
    "PutDownSituation",
    "ReachingForSomething",
    "SlidingSituation",
    "TransportingSituation",
];

/// The default experiment template: entity DTD, namespaces, ontology
/// imports and the property/datatype/class vocabulary.
pub fn default_template() -> OwlDocument {
    let entities = EntityDtd::new()
        .with_entity("owl", "http://www.w3.org/2002/07/owl#")
        .with_entity("xsd", "http://www.w3.org/2001/XMLSchema#")
        .with_entity(KNOWROB_ENTITY, KNOWROB_URI)
        .with_entity("rdfs", "http://www.w3.org/2000/01/rdf-schema#")
        .with_entity("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#")
        .with_entity(LOG_ENTITY, format!("{LOG_URI}#"));

    let mut document = OwlDocument::new(entities.clone())
        .with_namespace(PrefixName::bare("xmlns"), format!("{LOG_URI}#"))
        .with_namespace(PrefixName::new("xml", "base"), LOG_URI);
    for (name, uri) in &entities.entities {
        document = document.with_namespace(PrefixName::new("xmlns", name.as_str()), uri.as_str());
    }
    document.set_ontology(LOG_URI, &["package://knowrob/owl/knowrob.owl"]);

    for name in PROPERTY_DEFINITIONS {
        document.add_property_definition(KNOWROB_ENTITY, name);
    }
    for name in DATATYPE_DEFINITIONS {
        document.add_datatype_definition(KNOWROB_ENTITY, name);
    }
    for name in CLASS_DEFINITIONS {
        document.add_class_definition(KNOWROB_ENTITY, name);
    }
    document
}

fn named_individual(id: &str) -> OwlNode {
    OwlNode::new(PrefixName::new("owl", "NamedIndividual"))
        .with_attribute(PrefixName::new("rdf", "about"), AttributeValue::new(LOG_ENTITY, id))
}

// ---------------------------------------------------------------------------
// ExperimentDocument
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ObjectEntry {
    id: String,
    class: String,
}

/// Accumulates events of one episode and renders them as a document.
#[derive(Debug, Clone)]
pub struct ExperimentDocument {
    template: OwlDocument,
    episode_id: String,
    task_context: Option<String>,
    episode_span: Option<(f64, f64)>,
    timepoints: Vec<String>,
    seen_timepoints: HashSet<String>,
    objects: Vec<ObjectEntry>,
    seen_objects: HashSet<String>,
    events: Vec<OwlNode>,
}

impl ExperimentDocument {
    /// A document for `episode_id` using [`default_template`].
    pub fn new(episode_id: impl Into<String>) -> Self {
        Self::with_template(default_template(), episode_id)
    }

    pub fn with_template(template: OwlDocument, episode_id: impl Into<String>) -> Self {
        Self {
            template,
            episode_id: episode_id.into(),
            task_context: None,
            episode_span: None,
            timepoints: Vec::new(),
            seen_timepoints: HashSet::new(),
            objects: Vec::new(),
            seen_objects: HashSet::new(),
            events: Vec::new(),
        }
    }

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn set_task_context(&mut self, task_context: impl Into<String>) {
        self.task_context = Some(task_context.into());
    }

    /// Record the episode's start and end time on the experiment individual.
    pub fn set_episode_span(&mut self, start: f64, end: f64) {
        self.register_timepoint(start);
        self.register_timepoint(end);
        self.episode_span = Some((start, end));
    }

    /// Add a timepoint individual unless one with the same id exists.
    /// Returns `true` if it was new.
    pub fn register_timepoint(&mut self, time: f64) -> bool {
        let id = timepoint_id(time);
        if !self.seen_timepoints.insert(id.clone()) {
            return false;
        }
        self.timepoints.push(id);
        true
    }

    /// Add an object individual unless one with the same semantic id is
    /// already present. Returns `true` if it was new.
    ///
    /// Arena handles change when an owner is detached and attached again,
    /// and a renamed individual keeps its handle, so the rendered id is the
    /// key.
    pub fn register_object(&mut self, participant: &Participant) -> bool {
        if !self.seen_objects.insert(participant.id.clone()) {
            return false;
        }
        self.objects.push(ObjectEntry {
            id: participant.id.clone(),
            class: participant.class.clone(),
        });
        true
    }

    /// Append a closed event together with its timepoints and participants.
    pub fn register_event(&mut self, event: &Event) {
        self.register_timepoint(event.start);
        self.register_timepoint(event.end);
        for participant in event.kind.participants() {
            self.register_object(participant);
        }
        self.events.push(event.to_owl_node());
    }

    pub fn timepoint_count(&self) -> usize {
        self.timepoints.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Whether an object with semantic id `id` has been registered.
    pub fn contains_object(&self, id: &str) -> bool {
        self.seen_objects.contains(id)
    }

    fn experiment_individual(&self) -> OwlNode {
        let knowrob = |local: &str| PrefixName::new(KNOWROB_ENTITY, local);
        let mut node = named_individual(&self.episode_id)
            .with_comment(format!("Experiment Individual {}", self.episode_id))
            .with_child(OwlNode::resource_type(KNOWROB_ENTITY, "UnrealExperiment"));
        if let Some(task_context) = &self.task_context {
            node.add_child(
                OwlNode::new(knowrob("taskContext"))
                    .with_attribute(
                        PrefixName::new("rdf", "datatype"),
                        AttributeValue::new("xsd", "string"),
                    )
                    .with_value(task_context.as_str()),
            );
        }
        if let Some((start, end)) = self.episode_span {
            node.add_child(OwlNode::resource_property(
                knowrob("startTime"),
                LOG_ENTITY,
                &timepoint_id(start),
            ));
            node.add_child(OwlNode::resource_property(
                knowrob("endTime"),
                LOG_ENTITY,
                &timepoint_id(end),
            ));
        }
        node
    }

    /// Render the full document.
    ///
    /// Order: declaration, entities, root with namespaces, ontology imports,
    /// definitions, timepoints, objects, events, experiment individual.
    /// Serializing does not change the document.
    pub fn serialize(&self) -> String {
        let mut individuals = Vec::with_capacity(
            self.timepoints.len() + self.objects.len() + self.events.len() + 1,
        );
        for (i, id) in self.timepoints.iter().enumerate() {
            let mut node = named_individual(id)
                .with_child(OwlNode::resource_type(KNOWROB_ENTITY, "TimePoint"));
            if i == 0 {
                node.comment = "Timepoint Individuals".to_owned();
            }
            individuals.push(node);
        }
        for (i, object) in self.objects.iter().enumerate() {
            let mut node = named_individual(&object.id)
                .with_child(OwlNode::resource_type(KNOWROB_ENTITY, &object.class));
            if i == 0 {
                node.comment = "Object Individuals".to_owned();
            }
            individuals.push(node);
        }
        for (i, event) in self.events.iter().enumerate() {
            let mut node = event.clone();
            if i == 0 {
                node.comment = "Event Individuals".to_owned();
            }
            individuals.push(node);
        }
        individuals.push(self.experiment_individual());
        self.template.render_with_individuals(&individuals)
    }

    /// `{dir}/Episodes/{episode}_ED.owl`
    pub fn file_path(&self, log_dir: &Path) -> PathBuf {
        log_dir
            .join(EPISODES_DIR)
            .join(format!("{}{DOCUMENT_FILE_SUFFIX}", self.episode_id))
    }

    /// Serialize and write the document under `log_dir`, creating the
    /// episodes directory if needed. An existing file is only replaced when
    /// `overwrite` is set.
    pub fn write_to_file(&self, log_dir: &Path, overwrite: bool) -> Result<PathBuf, OwlError> {
        let path = self.file_path(log_dir);
        crate::write_output(&path, &self.serialize(), overwrite)?;
        tracing::info!(
            path = %path.display(),
            events = self.events.len(),
            objects = self.objects.len(),
            timepoints = self.timepoints.len(),
            "experiment document written"
        );
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
