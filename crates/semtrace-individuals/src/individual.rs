//! The individual record and its variants.
//!
//! Every annotated entity is an [`Individual`]: a common identity/readiness
//! record plus an [`IndividualKind`] payload. Behavior that differs per
//! variant is dispatched through the small capability table on
//! [`IndividualKind`] rather than through a type hierarchy.

use serde::{Deserialize, Serialize};

use crate::handle::IndividualId;
use crate::host::OwnerId;

// ---------------------------------------------------------------------------
// IndividualType
// ---------------------------------------------------------------------------

/// The closed set of individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndividualType {
    /// Not perceivable, e.g. a gaze target.
    Base,
    /// A rigid object rendered by a static mesh.
    Visible,
    /// A skeletal mesh owning one individual per bone.
    Skeletal,
    /// A bone that renders a material slot of its skeleton.
    Bone,
    /// A bone without a material slot.
    VirtualBone,
    /// A physics constraint between two other individuals.
    Constraint,
}

impl IndividualType {
    /// Root types are attached to owners directly; bones are only created by
    /// their skeleton.
    pub fn is_root(self) -> bool {
        !matches!(self, IndividualType::Bone | IndividualType::VirtualBone)
    }

    pub fn name(self) -> &'static str {
        match self {
            IndividualType::Base => "Base",
            IndividualType::Visible => "Visible",
            IndividualType::Skeletal => "Skeletal",
            IndividualType::Bone => "Bone",
            IndividualType::VirtualBone => "VirtualBone",
            IndividualType::Constraint => "Constraint",
        }
    }
}

// ---------------------------------------------------------------------------
// Visual
// ---------------------------------------------------------------------------

/// Mask data carried by perceivable variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visual {
    /// Hex color the individual is rendered with in mask mode.
    pub visual_mask: String,
    /// The mask color as actually observed by a calibrated camera.
    pub calibrated_visual_mask: String,
    /// Whether the mask materials are currently applied.
    pub mask_active: bool,
}

// ---------------------------------------------------------------------------
// IndividualKind
// ---------------------------------------------------------------------------

/// Variant payload of an individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndividualKind {
    Base,
    Visible(Visual),
    Skeletal {
        visual: Visual,
        /// Bone individuals in skeleton order. Owned by this skeleton.
        bones: Vec<IndividualId>,
    },
    Bone {
        visual: Visual,
        skeletal: IndividualId,
        bone_index: usize,
        parent: Option<IndividualId>,
        children: Vec<IndividualId>,
    },
    VirtualBone {
        skeletal: IndividualId,
        bone_index: usize,
        parent: Option<IndividualId>,
        children: Vec<IndividualId>,
    },
    Constraint {
        parent: Option<IndividualId>,
        child: Option<IndividualId>,
    },
}

impl IndividualKind {
    /// Fresh payload for a root type. Bones are built by
    /// [`IndividualKind::bone`].
    pub fn for_root(individual_type: IndividualType) -> Option<Self> {
        match individual_type {
            IndividualType::Base => Some(IndividualKind::Base),
            IndividualType::Visible => Some(IndividualKind::Visible(Visual::default())),
            IndividualType::Skeletal => Some(IndividualKind::Skeletal {
                visual: Visual::default(),
                bones: Vec::new(),
            }),
            IndividualType::Constraint => Some(IndividualKind::Constraint {
                parent: None,
                child: None,
            }),
            IndividualType::Bone | IndividualType::VirtualBone => None,
        }
    }

    /// Payload for bone `bone_index` of `skeletal`. Bones that render a
    /// material are perceivable, the others are virtual.
    pub fn bone(skeletal: IndividualId, bone_index: usize, renders_material: bool) -> Self {
        if renders_material {
            IndividualKind::Bone {
                visual: Visual::default(),
                skeletal,
                bone_index,
                parent: None,
                children: Vec::new(),
            }
        } else {
            IndividualKind::VirtualBone {
                skeletal,
                bone_index,
                parent: None,
                children: Vec::new(),
            }
        }
    }

    pub fn individual_type(&self) -> IndividualType {
        match self {
            IndividualKind::Base => IndividualType::Base,
            IndividualKind::Visible(_) => IndividualType::Visible,
            IndividualKind::Skeletal { .. } => IndividualType::Skeletal,
            IndividualKind::Bone { .. } => IndividualType::Bone,
            IndividualKind::VirtualBone { .. } => IndividualType::VirtualBone,
            IndividualKind::Constraint { .. } => IndividualType::Constraint,
        }
    }

    pub fn is_perceivable(&self) -> bool {
        self.visual().is_some()
    }

    pub fn visual(&self) -> Option<&Visual> {
        match self {
            IndividualKind::Visible(visual)
            | IndividualKind::Skeletal { visual, .. }
            | IndividualKind::Bone { visual, .. } => Some(visual),
            _ => None,
        }
    }

    pub fn visual_mut(&mut self) -> Option<&mut Visual> {
        match self {
            IndividualKind::Visible(visual)
            | IndividualKind::Skeletal { visual, .. }
            | IndividualKind::Bone { visual, .. } => Some(visual),
            _ => None,
        }
    }

    /// Bone index for bone variants.
    pub fn bone_index(&self) -> Option<usize> {
        match self {
            IndividualKind::Bone { bone_index, .. }
            | IndividualKind::VirtualBone { bone_index, .. } => Some(*bone_index),
            _ => None,
        }
    }

    /// Owning skeleton for bone variants.
    pub fn skeletal(&self) -> Option<IndividualId> {
        match self {
            IndividualKind::Bone { skeletal, .. }
            | IndividualKind::VirtualBone { skeletal, .. } => Some(*skeletal),
            _ => None,
        }
    }

    /// Bones owned by a skeleton; empty for every other variant.
    pub fn bones(&self) -> &[IndividualId] {
        match self {
            IndividualKind::Skeletal { bones, .. } => bones,
            _ => &[],
        }
    }

    /// One line summary used in logs and debug dumps.
    pub fn describe(&self) -> String {
        match self {
            IndividualKind::Base => "base".to_owned(),
            IndividualKind::Visible(v) => format!("visible mask={}", mask_or_dash(v)),
            IndividualKind::Skeletal { visual, bones } => {
                format!("skeletal bones={} mask={}", bones.len(), mask_or_dash(visual))
            }
            IndividualKind::Bone {
                visual,
                bone_index,
                skeletal,
                ..
            } => format!(
                "bone #{bone_index} of {skeletal} mask={}",
                mask_or_dash(visual)
            ),
            IndividualKind::VirtualBone {
                bone_index,
                skeletal,
                ..
            } => format!("virtual bone #{bone_index} of {skeletal}"),
            IndividualKind::Constraint { parent, child } => format!(
                "constraint {} -> {}",
                parent.map_or("?".to_owned(), |p| p.to_string()),
                child.map_or("?".to_owned(), |c| c.to_string())
            ),
        }
    }

    /// Switch between mask and original materials. Returns `true` if the
    /// flag changed; non-perceivable variants never change.
    pub fn apply_mask(&mut self, active: bool) -> bool {
        match self.visual_mut() {
            Some(visual) if visual.mask_active != active => {
                visual.mask_active = active;
                true
            }
            _ => false,
        }
    }
}

fn mask_or_dash(visual: &Visual) -> &str {
    if visual.visual_mask.is_empty() {
        "-"
    } else {
        &visual.visual_mask
    }
}

// ---------------------------------------------------------------------------
// Individual
// ---------------------------------------------------------------------------

/// One annotated entity.
///
/// `is_loaded` implies `is_init`, and a loaded individual always has a
/// non-empty `id` and `class`. Only the
/// [`IndividualManager`](crate::manager::IndividualManager) mutates these
/// fields, which is where that invariant is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub(crate) owner: OwnerId,
    pub(crate) id: String,
    pub(crate) class: String,
    pub(crate) is_init: bool,
    pub(crate) is_loaded: bool,
    pub(crate) tag_type: String,
    pub(crate) kind: IndividualKind,
}

impl Individual {
    pub(crate) fn new(owner: OwnerId, tag_type: String, kind: IndividualKind) -> Self {
        Self {
            owner,
            id: String::new(),
            class: String::new(),
            is_init: false,
            is_loaded: false,
            tag_type,
            kind,
        }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Semantic id. Empty until assigned or imported.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn has_class(&self) -> bool {
        !self.class.is_empty()
    }

    pub fn is_init(&self) -> bool {
        self.is_init
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    /// Tag type this individual persists under.
    pub fn tag_type(&self) -> &str {
        &self.tag_type
    }

    pub fn kind(&self) -> &IndividualKind {
        &self.kind
    }

    pub fn individual_type(&self) -> IndividualType {
        self.kind.individual_type()
    }

    pub fn visual_mask(&self) -> Option<&str> {
        self.kind
            .visual()
            .map(|v| v.visual_mask.as_str())
            .filter(|m| !m.is_empty())
    }

    pub fn calibrated_visual_mask(&self) -> Option<&str> {
        self.kind
            .visual()
            .map(|v| v.calibrated_visual_mask.as_str())
            .filter(|m| !m.is_empty())
    }

    pub fn is_mask_active(&self) -> bool {
        self.kind.visual().is_some_and(|v| v.mask_active)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_payloads() {
        assert_eq!(
            IndividualKind::for_root(IndividualType::Visible),
            Some(IndividualKind::Visible(Visual::default()))
        );
        assert!(IndividualKind::for_root(IndividualType::Bone).is_none());
        assert!(IndividualKind::for_root(IndividualType::VirtualBone).is_none());
        assert!(!IndividualType::Bone.is_root());
        assert!(IndividualType::Constraint.is_root());
    }

    #[test]
    fn capability_table_per_variant() {
        let skeletal = IndividualId::new(0, 0);
        let cases = [
            (IndividualKind::Base, false),
            (IndividualKind::Visible(Visual::default()), true),
            (IndividualKind::bone(skeletal, 1, true), true),
            (IndividualKind::bone(skeletal, 2, false), false),
            (
                IndividualKind::Constraint {
                    parent: None,
                    child: None,
                },
                false,
            ),
        ];
        for (kind, perceivable) in cases {
            assert_eq!(kind.is_perceivable(), perceivable, "{}", kind.describe());
        }
        assert_eq!(
            IndividualKind::bone(skeletal, 2, false).individual_type(),
            IndividualType::VirtualBone
        );
        assert_eq!(IndividualKind::bone(skeletal, 2, false).bone_index(), Some(2));
    }

    #[test]
    fn apply_mask_only_flips_perceivable() {
        let mut visible = IndividualKind::Visible(Visual::default());
        assert!(visible.apply_mask(true));
        assert!(!visible.apply_mask(true), "already active");
        assert!(visible.apply_mask(false));

        let mut base = IndividualKind::Base;
        assert!(!base.apply_mask(true));
    }

    #[test]
    fn describe_mentions_variant_data() {
        let kind = IndividualKind::Visible(Visual {
            visual_mask: "12AB34".to_owned(),
            ..Visual::default()
        });
        assert_eq!(kind.describe(), "visible mask=12AB34");
        assert_eq!(IndividualKind::Base.describe(), "base");
    }

    #[test]
    fn empty_masks_read_as_none() {
        let ind = Individual::new(
            OwnerId(1),
            "SemLog".to_owned(),
            IndividualKind::Visible(Visual::default()),
        );
        assert_eq!(ind.visual_mask(), None);
        assert!(!ind.has_id());
        assert!(!ind.is_mask_active());
    }
}
