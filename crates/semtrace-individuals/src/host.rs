//! The engine side of the lifecycle protocol.
//!
//! Individuals are hosted by engine entities ("owners") that this crate never
//! owns. Structural initialization asks the [`Host`] whether an owner is
//! alive, whether it carries a visual mesh or a skeleton, and which two ends a
//! constraint connects. [`SceneHost`] is a plain in-memory host used by the
//! session runtime and by tests.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tags::TagStore;

// ---------------------------------------------------------------------------
// OwnerId
// ---------------------------------------------------------------------------

/// Identity of an engine entity hosting one or more individuals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// World transform of an owner: location in centimetres and a rotation
/// quaternion `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub location: [f64; 3],
    pub rotation: [f64; 4],
}

impl Pose {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            location: [x, y, z],
            ..Self::default()
        }
    }

    /// Euclidean distance between the two locations.
    pub fn distance(&self, other: &Pose) -> f64 {
        self.location
            .iter()
            .zip(other.location.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// `1 - |q1 . q2|`: zero for identical orientations, one for opposite.
    pub fn rotation_delta(&self, other: &Pose) -> f64 {
        let dot: f64 = self
            .rotation
            .iter()
            .zip(other.rotation.iter())
            .map(|(a, b)| a * b)
            .sum();
        1.0 - dot.abs().min(1.0)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            location: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

// ---------------------------------------------------------------------------
// Skeleton
// ---------------------------------------------------------------------------

/// One bone in a skeleton description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneInfo {
    pub name: String,
    /// Index of the parent bone, `None` for the root.
    pub parent: Option<usize>,
    /// Material slot rendered by this bone. Bones without one are virtual.
    pub material_index: Option<usize>,
    /// Semantic class assigned to the bone, if the skeleton maps one.
    pub class: Option<String>,
}

impl BoneInfo {
    pub fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            material_index: None,
            class: None,
        }
    }

    pub fn with_material(mut self, material_index: usize) -> Self {
        self.material_index = Some(material_index);
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }
}

/// Skeleton of a skeletal mesh, bones in index order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub bones: Vec<BoneInfo>,
}

impl Skeleton {
    pub fn new(bones: Vec<BoneInfo>) -> Self {
        Self { bones }
    }

    pub fn bone(&self, index: usize) -> Option<&BoneInfo> {
        self.bones.get(index)
    }

    /// Indices of the direct children of `index`, ascending.
    pub fn children_of(&self, index: usize) -> Vec<usize> {
        self.bones
            .iter()
            .enumerate()
            .filter(|(_, bone)| bone.parent == Some(index))
            .map(|(i, _)| i)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// One end of a constraint: an owner, optionally narrowed to a bone of the
/// owner's skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintEnd {
    pub owner: OwnerId,
    pub bone: Option<usize>,
}

impl ConstraintEnd {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintEnds {
    pub parent: ConstraintEnd,
    pub child: ConstraintEnd,
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Structural queries the lifecycle manager makes against the engine.
pub trait Host: TagStore {
    /// Whether `owner` currently exists in the world.
    fn is_alive(&self, owner: OwnerId) -> bool;

    /// Human readable name of the owner.
    fn display_name(&self, owner: OwnerId) -> Option<&str>;

    /// Asset name of the owner's visual mesh, if it has one.
    fn visual_mesh(&self, owner: OwnerId) -> Option<&str>;

    /// Skeleton of the owner's skeletal mesh, if it has one.
    fn skeleton(&self, owner: OwnerId) -> Option<&Skeleton>;

    /// The two ends joined by the owner's constraint component.
    fn constraint_ends(&self, owner: OwnerId) -> Option<ConstraintEnds>;

    /// Current world pose of the owner.
    fn pose(&self, owner: OwnerId) -> Option<Pose>;
}

// ---------------------------------------------------------------------------
// SceneHost
// ---------------------------------------------------------------------------

/// An engine entity as seen by [`SceneHost`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostEntity {
    pub name: String,
    pub mesh: Option<String>,
    pub skeleton: Option<Skeleton>,
    pub constraint: Option<ConstraintEnds>,
    pub pose: Pose,
    pub tags: Vec<String>,
}

impl HostEntity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = Some(mesh.into());
        self
    }

    pub fn with_skeleton(mut self, skeleton: Skeleton) -> Self {
        self.skeleton = Some(skeleton);
        self
    }

    pub fn with_constraint(mut self, parent: ConstraintEnd, child: ConstraintEnd) -> Self {
        self.constraint = Some(ConstraintEnds { parent, child });
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// In-memory [`Host`]: a map from owner to entity description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneHost {
    entities: BTreeMap<OwnerId, HostEntity>,
    next_owner: u64,
}

impl SceneHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity under a fresh owner id.
    pub fn add(&mut self, entity: HostEntity) -> OwnerId {
        let owner = OwnerId(self.next_owner);
        self.next_owner += 1;
        self.entities.insert(owner, entity);
        owner
    }

    /// Insert (or replace) an entity under a caller-chosen owner id.
    pub fn insert(&mut self, owner: OwnerId, entity: HostEntity) {
        self.next_owner = self.next_owner.max(owner.0 + 1);
        self.entities.insert(owner, entity);
    }

    pub fn remove(&mut self, owner: OwnerId) -> Option<HostEntity> {
        self.entities.remove(&owner)
    }

    pub fn entity(&self, owner: OwnerId) -> Option<&HostEntity> {
        self.entities.get(&owner)
    }

    pub fn entity_mut(&mut self, owner: OwnerId) -> Option<&mut HostEntity> {
        self.entities.get_mut(&owner)
    }

    /// Move an owner. Returns `false` if the owner is unknown.
    pub fn set_pose(&mut self, owner: OwnerId, pose: Pose) -> bool {
        match self.entities.get_mut(&owner) {
            Some(entity) => {
                entity.pose = pose;
                true
            }
            None => false,
        }
    }

    pub fn owners(&self) -> impl Iterator<Item = OwnerId> + '_ {
        self.entities.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl TagStore for SceneHost {
    fn tags(&self, owner: OwnerId) -> Option<&[String]> {
        self.entities.get(&owner).map(|e| e.tags.as_slice())
    }

    fn tags_mut(&mut self, owner: OwnerId) -> Option<&mut Vec<String>> {
        self.entities.get_mut(&owner).map(|e| &mut e.tags)
    }
}

impl Host for SceneHost {
    fn is_alive(&self, owner: OwnerId) -> bool {
        self.entities.contains_key(&owner)
    }

    fn display_name(&self, owner: OwnerId) -> Option<&str> {
        self.entities.get(&owner).map(|e| e.name.as_str())
    }

    fn visual_mesh(&self, owner: OwnerId) -> Option<&str> {
        self.entities.get(&owner).and_then(|e| e.mesh.as_deref())
    }

    fn skeleton(&self, owner: OwnerId) -> Option<&Skeleton> {
        self.entities.get(&owner).and_then(|e| e.skeleton.as_ref())
    }

    fn constraint_ends(&self, owner: OwnerId) -> Option<ConstraintEnds> {
        self.entities.get(&owner).and_then(|e| e.constraint)
    }

    fn pose(&self, owner: OwnerId) -> Option<Pose> {
        self.entities.get(&owner).map(|e| e.pose)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
