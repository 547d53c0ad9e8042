//! `tracing` subscriber bootstrap for binaries and tests.
//!
//! The library crates only emit events; installing a subscriber is left to
//! the process that embeds the session.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install a formatted subscriber honoring `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already set, e.g. by an
/// earlier test in the same process.
pub fn try_init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init()
        .is_ok()
}

/// Like [`try_init_tracing`], ignoring an already installed subscriber.
pub fn init_tracing() {
    if !try_init_tracing() {
        tracing::debug!("tracing subscriber already installed");
    }
}
