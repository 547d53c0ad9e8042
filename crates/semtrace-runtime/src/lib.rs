//! semtrace runtime -- episode sessions on top of the individuals and OWL
//! crates.
//!
//! A [`Session`](session::Session) ties one host, one
//! [`IndividualManager`](semtrace_individuals::manager::IndividualManager)
//! and one [`EventAssembler`](semtrace_owl::assembler::EventAssembler)
//! together for the duration of an episode, feeds detector signals into the
//! assembler and periodically hands world-state snapshots to a background
//! worker.
//!
//! # Modules
//!
//! - [`config`]: TOML session configuration.
//! - [`detector`]: the signal interface event producers use.
//! - [`session`]: episode driver.
//! - [`snapshot`]: world-state capture and the single-flight worker.
//! - [`logging`]: `tracing` subscriber bootstrap.

#![deny(unsafe_code)]

pub mod config;
pub mod detector;
pub mod logging;
pub mod session;
pub mod snapshot;

use std::path::PathBuf;

use semtrace_individuals::IndividualError;
use semtrace_owl::OwlError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {message}")]
    Parse { message: String },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures of a snapshot task.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("snapshot write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot worker panicked")]
    WorkerPanicked,

    /// A task panicked while holding the sink.
    #[error("snapshot sink lock poisoned")]
    SinkPoisoned,
}

/// Errors surfaced by [`Session`](session::Session) operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Individual(#[from] IndividualError),

    #[error(transparent)]
    Owl(#[from] OwlError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to open '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The output exists and overwriting was not requested.
    #[error("'{}' already exists", path.display())]
    OutputExists { path: PathBuf },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::config::{MaskConfig, SessionConfig, SnapshotConfig};
    pub use crate::detector::{DetectorSignal, SignalKind, Subject};
    pub use crate::logging::{init_tracing, try_init_tracing};
    pub use crate::session::{generate_episode_id, FinishReport, Session};
    pub use crate::snapshot::{
        IndividualState, PoseFilter, SnapshotRecord, SnapshotWorker, WorldStateSnapshot,
    };
    pub use crate::{ConfigError, SessionError, SnapshotError};
}
