//! semtrace individuals -- lifecycle and identity of semantically annotated
//! entities.
//!
//! Engine entities become *individuals*: records carrying a semantic `Id`, an
//! ontology `Class` and, for perceivable variants, a visual mask color. Each
//! individual goes through a two-phase readiness protocol (Init, then Load)
//! driven by the [`IndividualManager`](manager::IndividualManager), which also
//! persists identity to and from the owner's key-value tags.
//!
//! # Quick Start
//!
//! ```
//! use semtrace_individuals::prelude::*;
//!
//! let mut host = SceneHost::new();
//! let owner = host.add(HostEntity::named("Table").with_mesh("SM_Table"));
//!
//! let mut manager = IndividualManager::new();
//! let table = manager.spawn(owner, IndividualType::Visible).unwrap();
//! manager.set_id(table, "table1").unwrap();
//! manager.set_class(table, "Table").unwrap();
//! manager.load(&host, table, false, false).unwrap();
//!
//! // Persist the identity on the owner.
//! assert!(manager.export_to_store(&mut host, table, false).unwrap());
//! assert_eq!(host.get_value(owner, "SemLog", "Id").as_deref(), Some("table1"));
//! ```

#![deny(unsafe_code)]

pub mod handle;
pub mod host;
pub mod individual;
pub mod manager;
pub mod mask;
pub mod observer;
pub mod tags;

use handle::IndividualId;
use host::OwnerId;
use individual::IndividualType;
use mask::MaskError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum IndividualError {
    /// The handle does not refer to a live individual.
    #[error("individual {individual:?} does not exist (stale or never allocated)")]
    StaleIndividual { individual: IndividualId },

    /// The owner is not known to the host.
    #[error("{owner} is not known to the host")]
    OwnerMissing { owner: OwnerId },

    /// The owner already hosts a root individual.
    #[error("{owner} is already annotated by individual {existing:?}")]
    OwnerAlreadyAnnotated {
        owner: OwnerId,
        existing: IndividualId,
    },

    /// Bones can only be created by their skeleton.
    #[error("{individual_type:?} individuals cannot be attached to an owner directly")]
    NotRootType { individual_type: IndividualType },

    /// A structural dependency (mesh, skeleton, referenced individual) is
    /// missing. Retry once the host has finished building the entity.
    #[error("individual {individual:?} is structurally unavailable: {reason}")]
    StructuralUnavailable {
        individual: IndividualId,
        reason: String,
    },

    /// No source yielded a non-empty identity.
    #[error("individual {individual:?} has no {missing} from any source")]
    IdentityUnresolved {
        individual: IndividualId,
        missing: &'static str,
    },

    /// The operation needs a perceivable individual.
    #[error("individual {individual:?} is not perceivable")]
    NotPerceivable { individual: IndividualId },

    #[error(transparent)]
    Mask(#[from] MaskError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::handle::IndividualId;
    pub use crate::host::{
        BoneInfo, ConstraintEnd, ConstraintEnds, Host, HostEntity, OwnerId, Pose, SceneHost,
        Skeleton,
    };
    pub use crate::individual::{Individual, IndividualKind, IndividualType, Visual};
    pub use crate::manager::IndividualManager;
    pub use crate::mask::{Color, MaskError, MaskGenerator};
    pub use crate::observer::{Change, Notification};
    pub use crate::tags::TagStore;
    pub use crate::IndividualError;
}
