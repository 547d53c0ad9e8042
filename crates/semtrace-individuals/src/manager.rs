//! The lifecycle manager: arena, readiness protocol and identity store.
//!
//! [`IndividualManager`] owns every [`Individual`] in a generational arena and
//! drives the two-phase readiness protocol:
//!
//! - **Init** resolves structural prerequisites against the [`Host`] (a
//!   visual mesh, a skeleton, the two ends of a constraint). Skeletons create
//!   their bone individuals here, once.
//! - **Load** resolves `Id`/`Class`, optionally importing them from the
//!   owner's persisted tags, and gives perceivable individuals a mask color.
//!
//! Precedence between in-memory values and persisted tags is fixed: a value
//! already held in memory wins unless the caller asks for `overwrite`.
//!
//! # Example
//!
//! ```
//! use semtrace_individuals::prelude::*;
//!
//! let mut host = SceneHost::new();
//! let owner = host.add(
//!     HostEntity::named("Cup")
//!         .with_mesh("SM_Cup")
//!         .with_tag("SemLog;Id,cup1;Class,Cup;"),
//! );
//!
//! let mut manager = IndividualManager::with_seed(7);
//! let cup = manager.spawn(owner, IndividualType::Visible).unwrap();
//! manager.load(&host, cup, false, true).unwrap();
//!
//! let individual = manager.individual(cup).unwrap();
//! assert!(individual.is_loaded());
//! assert_eq!(individual.id(), "cup1");
//! assert!(individual.visual_mask().is_some());
//! ```

use std::collections::HashMap;
use std::sync::mpsc::Receiver;

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64;

use crate::handle::{IndividualArena, IndividualId};
use crate::host::{ConstraintEnd, Host, OwnerId};
use crate::individual::{Individual, IndividualKind, IndividualType};
use crate::mask::{random_visual_mask, Color, MaskGenerator};
use crate::observer::{Change, Notification, ObserverList};
use crate::tags::{
    bone_tag_type, TagStore, CALIBRATED_VISUAL_MASK_KEY, CLASS_KEY, ID_KEY, TAG_TYPE,
    VISUAL_MASK_KEY,
};
use crate::IndividualError;

fn structural(individual: IndividualId, reason: impl Into<String>) -> IndividualError {
    IndividualError::StructuralUnavailable {
        individual,
        reason: reason.into(),
    }
}

/// `SM_Cup_Blue` -> `CupBlue`.
fn class_from_asset_name(asset: &str, prefix: &str) -> String {
    asset
        .strip_prefix(prefix)
        .unwrap_or(asset)
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// IndividualManager
// ---------------------------------------------------------------------------

/// Arena and lifecycle driver for all individuals of a session.
#[derive(Debug)]
pub struct IndividualManager {
    arena: IndividualArena<Individual>,
    /// Root individual attached to each owner.
    owner_index: HashMap<OwnerId, IndividualId>,
    /// Individuals whose identity changed while not loaded.
    pending_reloads: Vec<IndividualId>,
    observers: ObserverList,
    mask_generator: MaskGenerator,
    rng: Pcg64,
}

impl IndividualManager {
    /// Create a manager seeded with `0`.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a manager whose id and mask generation is driven by a
    /// `Pcg64` seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            arena: IndividualArena::new(),
            owner_index: HashMap::new(),
            pending_reloads: Vec::new(),
            observers: ObserverList::new(),
            mask_generator: MaskGenerator::default(),
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    pub fn with_mask_generator(mut self, generator: MaskGenerator) -> Self {
        self.mask_generator = generator;
        self
    }

    pub fn mask_generator(&self) -> &MaskGenerator {
        &self.mask_generator
    }

    /// Subscribe to change notifications of every individual.
    pub fn subscribe(&mut self) -> Receiver<Notification> {
        self.observers.subscribe()
    }

    // -- arena access -------------------------------------------------------

    fn get(&self, id: IndividualId) -> Result<&Individual, IndividualError> {
        self.arena
            .get(id)
            .ok_or(IndividualError::StaleIndividual { individual: id })
    }

    fn get_mut(&mut self, id: IndividualId) -> Result<&mut Individual, IndividualError> {
        self.arena
            .get_mut(id)
            .ok_or(IndividualError::StaleIndividual { individual: id })
    }

    fn insert(&mut self, owner: OwnerId, tag_type: String, kind: IndividualKind) -> IndividualId {
        self.arena.insert(Individual::new(owner, tag_type, kind))
    }

    pub fn individual(&self, id: IndividualId) -> Option<&Individual> {
        self.get(id).ok()
    }

    pub fn is_alive(&self, id: IndividualId) -> bool {
        self.arena.contains(id)
    }

    /// All live individuals in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (IndividualId, &Individual)> + '_ {
        self.arena.iter()
    }

    pub fn loaded(&self) -> impl Iterator<Item = (IndividualId, &Individual)> + '_ {
        self.iter().filter(|(_, individual)| individual.is_loaded())
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Root individual attached to `owner`.
    pub fn find_by_owner(&self, owner: OwnerId) -> Option<IndividualId> {
        self.owner_index
            .get(&owner)
            .copied()
            .filter(|id| self.is_alive(*id))
    }

    /// First live individual whose semantic id is `semantic_id`.
    pub fn find_by_semantic_id(&self, semantic_id: &str) -> Option<IndividualId> {
        if semantic_id.is_empty() {
            return None;
        }
        self.iter()
            .find(|(_, individual)| individual.id() == semantic_id)
            .map(|(id, _)| id)
    }

    /// Bone individual of `skeletal` with skeleton index `bone_index`.
    pub fn bone_individual(&self, skeletal: IndividualId, bone_index: usize) -> Option<IndividualId> {
        let skeleton = self.get(skeletal).ok()?;
        skeleton.kind.bones().iter().copied().find(|bone| {
            self.get(*bone)
                .is_ok_and(|b| b.kind.bone_index() == Some(bone_index))
        })
    }

    /// The resolved parent and child of an initialized constraint.
    pub fn constraint_ends(&self, id: IndividualId) -> Option<(IndividualId, IndividualId)> {
        match self.get(id).ok()?.kind {
            IndividualKind::Constraint {
                parent: Some(parent),
                child: Some(child),
            } if self.is_alive(parent) && self.is_alive(child) => Some((parent, child)),
            _ => None,
        }
    }

    // -- spawn / despawn ----------------------------------------------------

    /// Attach a new, uninitialized individual of a root type to `owner`.
    pub fn spawn(
        &mut self,
        owner: OwnerId,
        individual_type: IndividualType,
    ) -> Result<IndividualId, IndividualError> {
        if let Some(existing) = self.find_by_owner(owner) {
            return Err(IndividualError::OwnerAlreadyAnnotated { owner, existing });
        }
        let kind = IndividualKind::for_root(individual_type)
            .ok_or(IndividualError::NotRootType { individual_type })?;
        let id = self.insert(owner, TAG_TYPE.to_owned(), kind);
        self.owner_index.insert(owner, id);
        tracing::debug!(individual = %id, %owner, kind = individual_type.name(), "spawned individual");
        Ok(id)
    }

    /// Destroy an individual. Mask materials are reverted first; a skeleton
    /// takes its bones with it.
    pub fn despawn(&mut self, id: IndividualId) -> Result<(), IndividualError> {
        if self.get(id)?.is_mask_active() {
            self.apply_original_materials(id)?;
        }
        self.destroy(id);
        tracing::debug!(individual = %id, "despawned individual");
        Ok(())
    }

    fn destroy(&mut self, id: IndividualId) {
        let Some(individual) = self.arena.remove(id) else {
            return;
        };

        for bone in individual.kind.bones() {
            self.destroy(*bone);
        }
        if let Some(skeletal) = individual.kind.skeletal() {
            if let Ok(IndividualKind::Skeletal { bones, .. }) =
                self.get_mut(skeletal).map(|s| &mut s.kind)
            {
                bones.retain(|bone| *bone != id);
            }
        }
        if self.owner_index.get(&individual.owner) == Some(&id) {
            self.owner_index.remove(&individual.owner);
        }
        self.pending_reloads.retain(|pending| *pending != id);
        self.observers.publish(id, Change::Destroyed);

        // Constraints that pointed at this individual fall back to inert.
        let dependents: Vec<IndividualId> = self
            .iter()
            .filter(|(_, other)| {
                matches!(other.kind, IndividualKind::Constraint { parent, child }
                    if parent == Some(id) || child == Some(id))
            })
            .map(|(other, _)| other)
            .collect();
        for constraint in dependents {
            tracing::warn!(individual = %constraint, destroyed = %id, "constraint end destroyed, constraint reset");
            let _ = self.init_reset(constraint);
        }
    }

    // -- readiness flags ----------------------------------------------------

    fn set_init_flag(&mut self, id: IndividualId, value: bool) {
        let Ok(individual) = self.get_mut(id) else {
            return;
        };
        if individual.is_init == value {
            return;
        }
        individual.is_init = value;
        let lost_loaded = !value && std::mem::replace(&mut individual.is_loaded, false);
        self.observers.publish(id, Change::Init(value));
        if lost_loaded {
            self.observers.publish(id, Change::Loaded(false));
        }
    }

    fn set_loaded_flag(&mut self, id: IndividualId, value: bool) {
        let Ok(individual) = self.get_mut(id) else {
            return;
        };
        if individual.is_loaded == value {
            return;
        }
        individual.is_loaded = value;
        self.observers.publish(id, Change::Loaded(value));
    }

    // -- init ---------------------------------------------------------------

    /// Resolve structural prerequisites.
    ///
    /// With `reset` the individual first drops back to uninitialized
    /// (clearing structural references and, for skeletons, their bones).
    /// Without it, an already initialized individual returns immediately.
    /// On failure the individual stays uninitialized and can be retried.
    pub fn init<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
        reset: bool,
    ) -> Result<(), IndividualError> {
        if reset {
            self.init_reset(id)?;
        }
        if self.get(id)?.is_init {
            return Ok(());
        }
        match self.init_structure(host, id) {
            Ok(()) => {
                self.set_init_flag(id, true);
                tracing::debug!(individual = %id, "initialized");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(individual = %id, error = %err, "init failed, individual stays inert");
                Err(err)
            }
        }
    }

    fn init_reset(&mut self, id: IndividualId) -> Result<(), IndividualError> {
        self.load_reset(id)?;
        let bones = self.get(id)?.kind.bones().to_vec();
        for bone in bones {
            self.destroy(bone);
        }
        match &mut self.get_mut(id)?.kind {
            IndividualKind::Skeletal { bones, .. } => bones.clear(),
            IndividualKind::Bone {
                parent, children, ..
            }
            | IndividualKind::VirtualBone {
                parent, children, ..
            } => {
                *parent = None;
                children.clear();
            }
            IndividualKind::Constraint { parent, child } => {
                *parent = None;
                *child = None;
            }
            IndividualKind::Base | IndividualKind::Visible(_) => {}
        }
        self.set_init_flag(id, false);
        Ok(())
    }

    fn init_structure<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
    ) -> Result<(), IndividualError> {
        let (owner, individual_type) = {
            let individual = self.get(id)?;
            (individual.owner, individual.individual_type())
        };
        if !host.is_alive(owner) {
            return Err(structural(id, format!("{owner} is not alive")));
        }
        match individual_type {
            IndividualType::Base => Ok(()),
            IndividualType::Visible => host
                .visual_mesh(owner)
                .map(|_| ())
                .ok_or_else(|| structural(id, format!("{owner} has no visual mesh"))),
            IndividualType::Skeletal => self.init_skeletal(host, id, owner),
            IndividualType::Bone | IndividualType::VirtualBone => self.init_bone(host, id),
            IndividualType::Constraint => self.init_constraint(host, id, owner),
        }
    }

    fn init_skeletal<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
        owner: OwnerId,
    ) -> Result<(), IndividualError> {
        let skeleton = host
            .skeleton(owner)
            .ok_or_else(|| structural(id, format!("{owner} has no skeleton")))?;
        if skeleton.bones.is_empty() {
            return Err(structural(id, format!("skeleton of {owner} has no bones")));
        }
        if self.get(id)?.kind.bones().is_empty() {
            let created: Vec<IndividualId> = skeleton
                .bones
                .iter()
                .enumerate()
                .map(|(index, info)| {
                    let kind = IndividualKind::bone(id, index, info.material_index.is_some());
                    self.insert(owner, bone_tag_type(index), kind)
                })
                .collect();
            tracing::debug!(individual = %id, bones = created.len(), "created bone individuals");
            if let IndividualKind::Skeletal { bones, .. } = &mut self.get_mut(id)?.kind {
                *bones = created;
            }
        }
        self.init_all_bones(host, id)
    }

    fn init_bone<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
    ) -> Result<(), IndividualError> {
        let (skeletal, bone_index) = {
            let kind = &self.get(id)?.kind;
            match (kind.skeletal(), kind.bone_index()) {
                (Some(skeletal), Some(bone_index)) => (skeletal, bone_index),
                _ => return Err(structural(id, "not a bone")),
            }
        };
        let skeletal_owner = self
            .get(skeletal)
            .map_err(|_| structural(id, "owning skeleton was destroyed"))?
            .owner;
        let skeleton = host
            .skeleton(skeletal_owner)
            .ok_or_else(|| structural(id, format!("{skeletal_owner} has no skeleton")))?;
        let info = skeleton.bone(bone_index).ok_or_else(|| {
            structural(
                id,
                format!(
                    "bone index {bone_index} out of range ({} bones)",
                    skeleton.bones.len()
                ),
            )
        })?;

        let parent = match info.parent {
            Some(parent_index) => Some(
                self.bone_individual(skeletal, parent_index)
                    .ok_or_else(|| structural(id, format!("parent bone {parent_index} missing")))?,
            ),
            None => None,
        };
        let resolved_children: Vec<IndividualId> = skeleton
            .children_of(bone_index)
            .into_iter()
            .filter_map(|child| self.bone_individual(skeletal, child))
            .collect();

        match &mut self.get_mut(id)?.kind {
            IndividualKind::Bone {
                parent: p,
                children,
                ..
            }
            | IndividualKind::VirtualBone {
                parent: p,
                children,
                ..
            } => {
                *p = parent;
                *children = resolved_children;
            }
            _ => {}
        }
        Ok(())
    }

    fn resolve_constraint_end(&self, end: ConstraintEnd) -> Option<IndividualId> {
        let root = self.find_by_owner(end.owner)?;
        match end.bone {
            None => Some(root),
            Some(bone) => self.bone_individual(root, bone),
        }
    }

    fn init_constraint<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
        owner: OwnerId,
    ) -> Result<(), IndividualError> {
        let ends = host
            .constraint_ends(owner)
            .ok_or_else(|| structural(id, format!("{owner} has no constraint")))?;
        let parent = self.resolve_constraint_end(ends.parent).ok_or_else(|| {
            structural(id, format!("constraint parent on {} is unresolved", ends.parent.owner))
        })?;
        let child = self.resolve_constraint_end(ends.child).ok_or_else(|| {
            structural(id, format!("constraint child on {} is unresolved", ends.child.owner))
        })?;
        if let IndividualKind::Constraint {
            parent: p,
            child: c,
        } = &mut self.get_mut(id)?.kind
        {
            *p = Some(parent);
            *c = Some(child);
        }
        Ok(())
    }

    /// Initialize every bone of a skeleton. All bones are attempted; the
    /// result is an error if any of them failed.
    pub fn init_all_bones<H: Host + ?Sized>(
        &mut self,
        host: &H,
        skeletal: IndividualId,
    ) -> Result<(), IndividualError> {
        let bones = self.get(skeletal)?.kind.bones().to_vec();
        let failed = bones
            .iter()
            .filter(|bone| self.init(host, **bone, false).is_err())
            .count();
        if failed > 0 {
            return Err(structural(
                skeletal,
                format!("{failed} of {} bones failed to initialize", bones.len()),
            ));
        }
        Ok(())
    }

    // -- load ---------------------------------------------------------------

    /// Resolve identity and type specific data.
    ///
    /// Initializes first if needed. With `try_import`, empty values are filled
    /// from the owner's tags. Fails with
    /// [`IndividualError::IdentityUnresolved`] if `Id` or `Class` remain empty.
    pub fn load<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
        reset: bool,
        try_import: bool,
    ) -> Result<(), IndividualError> {
        if reset {
            self.load_reset(id)?;
        }
        if self.get(id)?.is_loaded {
            return Ok(());
        }
        if !self.get(id)?.is_init {
            self.init(host, id, false)?;
        }
        match self.load_identity(host, id, try_import) {
            Ok(()) => {
                self.pending_reloads.retain(|pending| *pending != id);
                self.set_loaded_flag(id, true);
                tracing::debug!(individual = %id, "loaded");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(individual = %id, error = %err, "load failed, individual excluded from the semantic index");
                Err(err)
            }
        }
    }

    fn load_reset(&mut self, id: IndividualId) -> Result<(), IndividualError> {
        let bones = self.get(id)?.kind.bones().to_vec();
        for bone in bones {
            self.load_reset(bone)?;
        }
        self.set_loaded_flag(id, false);
        Ok(())
    }

    fn load_identity<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
        try_import: bool,
    ) -> Result<(), IndividualError> {
        if try_import {
            self.import_own(host, id, false)?;
        }
        let individual = self.get(id)?;
        let missing = match (individual.has_id(), individual.has_class()) {
            (true, true) => None,
            (false, true) => Some("id"),
            (true, false) => Some("class"),
            (false, false) => Some("id and class"),
        };
        if let Some(missing) = missing {
            return Err(IndividualError::IdentityUnresolved {
                individual: id,
                missing,
            });
        }
        let needs_mask = individual.kind.is_perceivable() && individual.visual_mask().is_none();
        let is_skeletal = individual.individual_type() == IndividualType::Skeletal;

        if needs_mask {
            self.ensure_visual_mask(id)?;
        }
        if is_skeletal {
            self.load_all_bones(host, id, try_import)?;
        }
        Ok(())
    }

    fn ensure_visual_mask(&mut self, id: IndividualId) -> Result<(), IndividualError> {
        match self.generate_unique_visual_mask(id, false) {
            Ok(_) => Ok(()),
            Err(IndividualError::Mask(err)) => {
                tracing::warn!(individual = %id, error = %err, "falling back to a non-unique mask color");
                let mask = random_visual_mask(&mut self.rng);
                self.set_visual_mask(id, &mask).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    /// Load every bone of a skeleton, all-or-nothing like
    /// [`init_all_bones`](Self::init_all_bones).
    pub fn load_all_bones<H: Host + ?Sized>(
        &mut self,
        host: &H,
        skeletal: IndividualId,
        try_import: bool,
    ) -> Result<(), IndividualError> {
        let bones = self.get(skeletal)?.kind.bones().to_vec();
        let failed = bones
            .iter()
            .filter(|bone| self.load(host, **bone, false, try_import).is_err())
            .count();
        if failed > 0 {
            return Err(structural(
                skeletal,
                format!("{failed} of {} bones failed to load", bones.len()),
            ));
        }
        Ok(())
    }

    /// Retry `Load` on individuals that received a new identity value while
    /// initialized but not loaded. Returns how many became loaded.
    pub fn process_pending_reloads<H: Host + ?Sized>(&mut self, host: &H) -> usize {
        let pending = std::mem::take(&mut self.pending_reloads);
        let mut loaded = 0;
        for id in pending {
            let ready = self
                .get(id)
                .is_ok_and(|individual| individual.is_init && !individual.is_loaded);
            if ready && self.load(host, id, false, false).is_ok() {
                loaded += 1;
            }
        }
        loaded
    }

    pub fn pending_reload_count(&self) -> usize {
        self.pending_reloads.len()
    }

    // -- identity values ----------------------------------------------------

    /// A changed identity value always drops `Loaded`. A non-empty value on an
    /// initialized individual queues a deferred reload; an empty one does not.
    fn after_identity_change(&mut self, id: IndividualId, cleared: bool) {
        let Ok(individual) = self.get_mut(id) else {
            return;
        };
        let was_loaded = std::mem::replace(&mut individual.is_loaded, false);
        let is_init = individual.is_init;
        if was_loaded {
            self.observers.publish(id, Change::Loaded(false));
        }
        if !cleared && is_init && !self.pending_reloads.contains(&id) {
            self.pending_reloads.push(id);
        }
    }

    /// Set the semantic id. Returns `false` if the value is unchanged.
    pub fn set_id(&mut self, id: IndividualId, value: &str) -> Result<bool, IndividualError> {
        let individual = self.get_mut(id)?;
        if individual.id == value {
            return Ok(false);
        }
        individual.id = value.to_owned();
        self.observers.publish(id, Change::Id(value.to_owned()));
        self.after_identity_change(id, value.is_empty());
        Ok(true)
    }

    /// Set the ontology class. Returns `false` if the value is unchanged.
    pub fn set_class(&mut self, id: IndividualId, value: &str) -> Result<bool, IndividualError> {
        let individual = self.get_mut(id)?;
        if individual.class == value {
            return Ok(false);
        }
        individual.class = value.to_owned();
        self.observers.publish(id, Change::Class(value.to_owned()));
        self.after_identity_change(id, value.is_empty());
        Ok(true)
    }

    /// Set the mask color. A new mask invalidates the calibrated one.
    ///
    /// Clearing the mask of a loaded individual drops `Loaded`; setting one on
    /// an initialized, unloaded individual queues a deferred reload.
    pub fn set_visual_mask(&mut self, id: IndividualId, value: &str) -> Result<bool, IndividualError> {
        let individual = self.get_mut(id)?;
        let (is_init, is_loaded) = (individual.is_init, individual.is_loaded);
        let visual = individual
            .kind
            .visual_mut()
            .ok_or(IndividualError::NotPerceivable { individual: id })?;
        if visual.visual_mask == value {
            return Ok(false);
        }
        visual.visual_mask = value.to_owned();
        let had_calibrated = !visual.calibrated_visual_mask.is_empty();
        visual.calibrated_visual_mask.clear();

        self.observers.publish(id, Change::VisualMask(value.to_owned()));
        if had_calibrated {
            self.observers
                .publish(id, Change::CalibratedVisualMask(String::new()));
        }
        if value.is_empty() {
            self.after_identity_change(id, true);
        } else if is_init && !is_loaded && !self.pending_reloads.contains(&id) {
            self.pending_reloads.push(id);
        }
        Ok(true)
    }

    pub fn set_calibrated_visual_mask(
        &mut self,
        id: IndividualId,
        value: &str,
    ) -> Result<bool, IndividualError> {
        let visual = self
            .get_mut(id)?
            .kind
            .visual_mut()
            .ok_or(IndividualError::NotPerceivable { individual: id })?;
        if visual.calibrated_visual_mask == value {
            return Ok(false);
        }
        visual.calibrated_visual_mask = value.to_owned();
        self.observers
            .publish(id, Change::CalibratedVisualMask(value.to_owned()));
        Ok(true)
    }

    /// Assign a fresh random id (UUID, simple form) and return it.
    pub fn generate_new_id(&mut self, id: IndividualId) -> Result<String, IndividualError> {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        let value = uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .simple()
            .to_string();
        self.set_id(id, &value)?;
        Ok(value)
    }

    /// Class an individual gets when nothing else assigns one: the mesh
    /// asset name for meshes, the mapped bone class or bone name for bones.
    pub fn default_class<H: Host + ?Sized>(
        &self,
        host: &H,
        id: IndividualId,
    ) -> Result<String, IndividualError> {
        let individual = self.get(id)?;
        let owner = individual.owner;
        let fallback = || {
            host.display_name(owner)
                .filter(|name| !name.is_empty())
                .map(|name| class_from_asset_name(name, ""))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| individual.individual_type().name().to_owned())
        };
        let from_mesh = |prefix: &str| {
            host.visual_mesh(owner)
                .map(|mesh| class_from_asset_name(mesh, prefix))
                .filter(|class| !class.is_empty())
        };
        let class = match &individual.kind {
            IndividualKind::Base => fallback(),
            IndividualKind::Visible(_) => from_mesh("SM_").unwrap_or_else(fallback),
            IndividualKind::Skeletal { .. } => from_mesh("SK_").unwrap_or_else(fallback),
            IndividualKind::Bone { bone_index, .. }
            | IndividualKind::VirtualBone { bone_index, .. } => host
                .skeleton(owner)
                .and_then(|skeleton| skeleton.bone(*bone_index))
                .map(|bone| bone.class.clone().unwrap_or_else(|| bone.name.clone()))
                .unwrap_or_else(fallback),
            IndividualKind::Constraint { .. } => "Constraint".to_owned(),
        };
        Ok(class)
    }

    /// Fill in a generated id and the default class (every value when
    /// `overwrite`), recursing into bones. Returns whether anything changed.
    pub fn assign_defaults<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
        overwrite: bool,
    ) -> Result<bool, IndividualError> {
        let (has_id, has_class, bones) = {
            let individual = self.get(id)?;
            (
                individual.has_id(),
                individual.has_class(),
                individual.kind.bones().to_vec(),
            )
        };
        let mut changed = false;
        if overwrite || !has_id {
            self.generate_new_id(id)?;
            changed = true;
        }
        if overwrite || !has_class {
            let class = self.default_class(host, id)?;
            changed |= self.set_class(id, &class)?;
        }
        for bone in bones {
            changed |= self.assign_defaults(host, bone, overwrite)?;
        }
        Ok(changed)
    }

    // -- persisted tags -----------------------------------------------------

    /// Write identity (and mask) values into the owner's tags, recursing into
    /// bones. Existing keys are only replaced with `overwrite`. Returns
    /// whether any stored value changed.
    pub fn export_to_store<H: Host + ?Sized>(
        &self,
        host: &mut H,
        id: IndividualId,
        overwrite: bool,
    ) -> Result<bool, IndividualError> {
        let individual = self.get(id)?;
        let owner = individual.owner;
        if !host.is_alive(owner) {
            return Err(IndividualError::OwnerMissing { owner });
        }
        let tag_type = individual.tag_type.as_str();
        let mut values: Vec<(&str, &str)> = vec![
            (ID_KEY, individual.id.as_str()),
            (CLASS_KEY, individual.class.as_str()),
        ];
        if let Some(visual) = individual.kind.visual() {
            values.push((VISUAL_MASK_KEY, visual.visual_mask.as_str()));
            values.push((
                CALIBRATED_VISUAL_MASK_KEY,
                visual.calibrated_visual_mask.as_str(),
            ));
        }

        let mut changed = false;
        for (key, value) in values.into_iter().filter(|(_, value)| !value.is_empty()) {
            changed |= host.add_kv_pair(owner, tag_type, key, value, overwrite);
        }
        for bone in individual.kind.bones() {
            changed |= self.export_to_store(host, *bone, overwrite)?;
        }
        Ok(changed)
    }

    /// Read identity (and mask) values from the owner's tags, recursing into
    /// bones. Values already held in memory are kept unless `overwrite`.
    /// Returns whether any value changed.
    pub fn import_from_store<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
        overwrite: bool,
    ) -> Result<bool, IndividualError> {
        let mut changed = self.import_own(host, id, overwrite)?;
        let bones = self.get(id)?.kind.bones().to_vec();
        for bone in bones {
            changed |= self.import_own(host, bone, overwrite)?;
        }
        Ok(changed)
    }

    fn import_own<H: Host + ?Sized>(
        &mut self,
        host: &H,
        id: IndividualId,
        overwrite: bool,
    ) -> Result<bool, IndividualError> {
        let (owner, tag_type, has_id, has_class, has_mask) = {
            let individual = self.get(id)?;
            (
                individual.owner,
                individual.tag_type.clone(),
                individual.has_id(),
                individual.has_class(),
                individual.kind.visual().map(|v| !v.visual_mask.is_empty()),
            )
        };
        if !host.is_alive(owner) {
            return Err(IndividualError::OwnerMissing { owner });
        }

        let mut changed = false;
        if overwrite || !has_id {
            if let Some(value) = host.get_value(owner, &tag_type, ID_KEY) {
                changed |= self.set_id(id, &value)?;
            }
        }
        if overwrite || !has_class {
            if let Some(value) = host.get_value(owner, &tag_type, CLASS_KEY) {
                changed |= self.set_class(id, &value)?;
            }
        }
        if let Some(has_mask) = has_mask {
            // The mask goes first since setting it clears the calibrated one.
            if overwrite || !has_mask {
                if let Some(value) = host.get_value(owner, &tag_type, VISUAL_MASK_KEY) {
                    changed |= self.set_visual_mask(id, &value)?;
                }
            }
            let has_calibrated = self.get(id)?.calibrated_visual_mask().is_some();
            if overwrite || !has_calibrated {
                if let Some(value) = host.get_value(owner, &tag_type, CALIBRATED_VISUAL_MASK_KEY) {
                    changed |= self.set_calibrated_visual_mask(id, &value)?;
                }
            }
        }
        Ok(changed)
    }

    /// Remove this individual's tag (and its bones' tags) from the owner.
    pub fn clear_exported<H: Host + ?Sized>(
        &self,
        host: &mut H,
        id: IndividualId,
    ) -> Result<bool, IndividualError> {
        let individual = self.get(id)?;
        let mut removed = host.remove_type(individual.owner, &individual.tag_type);
        for bone in individual.kind.bones() {
            removed |= self.clear_exported(host, *bone)?;
        }
        Ok(removed)
    }

    // -- visual masks -------------------------------------------------------

    /// Mask colors held by live perceivable individuals. Loaded perceivable
    /// individuals always hold one.
    pub fn consumed_visual_mask_colors(&self) -> Vec<Color> {
        self.iter()
            .filter_map(|(_, individual)| individual.visual_mask())
            .filter_map(|mask| Color::from_hex(mask).ok())
            .collect()
    }

    /// Give `id` a mask color that keeps the configured distance to every
    /// other consumed color.
    ///
    /// Returns `Ok(false)` if a mask is already set and `overwrite` is off.
    /// An exhausted trial budget leaves the individual unchanged.
    pub fn generate_unique_visual_mask(
        &mut self,
        id: IndividualId,
        overwrite: bool,
    ) -> Result<bool, IndividualError> {
        let current = {
            let individual = self.get(id)?;
            individual
                .kind
                .visual()
                .ok_or(IndividualError::NotPerceivable { individual: id })?
                .visual_mask
                .clone()
        };
        if !current.is_empty() && !overwrite {
            return Ok(false);
        }

        let mut consumed = self.consumed_visual_mask_colors();
        if let Ok(own) = Color::from_hex(&current) {
            if let Some(pos) = consumed.iter().position(|color| *color == own) {
                consumed.remove(pos);
            }
        }
        let color = self
            .mask_generator
            .generate_unique(&mut self.rng, &mut consumed)?;
        self.set_visual_mask(id, &color.to_hex())?;
        Ok(true)
    }

    /// Batch variant of [`generate_unique_visual_mask`](Self::generate_unique_visual_mask)
    /// over every live perceivable individual. Exhausted individuals are
    /// logged and skipped. Returns how many received a new mask.
    pub fn write_unique_visual_masks(&mut self, overwrite: bool) -> usize {
        let perceivable: Vec<IndividualId> = self
            .iter()
            .filter(|(_, individual)| individual.kind.is_perceivable())
            .map(|(id, _)| id)
            .collect();
        let mut written = 0;
        for id in perceivable {
            match self.generate_unique_visual_mask(id, overwrite) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(individual = %id, error = %err, "skipping mask for individual");
                }
            }
        }
        written
    }

    /// Render `id` (and a skeleton's bones) with mask materials.
    pub fn apply_mask_materials(&mut self, id: IndividualId) -> Result<bool, IndividualError> {
        self.set_mask_active(id, true)
    }

    /// Restore the original materials of `id` (and a skeleton's bones).
    pub fn apply_original_materials(&mut self, id: IndividualId) -> Result<bool, IndividualError> {
        self.set_mask_active(id, false)
    }

    pub fn toggle_mask_materials(&mut self, id: IndividualId) -> Result<bool, IndividualError> {
        let active = self.get(id)?.is_mask_active();
        self.set_mask_active(id, !active)
    }

    fn set_mask_active(&mut self, id: IndividualId, active: bool) -> Result<bool, IndividualError> {
        let individual = self.get(id)?;
        if !individual.kind.is_perceivable() {
            return Err(IndividualError::NotPerceivable { individual: id });
        }
        if active && individual.visual_mask().is_none() {
            tracing::debug!(individual = %id, "no mask color to apply");
            return Ok(false);
        }
        let bones = individual.kind.bones().to_vec();
        let changed = self.get_mut(id)?.kind.apply_mask(active);
        if changed {
            self.observers.publish(id, Change::MaskActive(active));
        }
        for bone in bones {
            if self.get(bone).is_ok_and(|b| b.kind.is_perceivable()) {
                self.set_mask_active(bone, active)?;
            }
        }
        Ok(changed)
    }
}

impl Default for IndividualManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
