//! Top-level error type for the `md2` binary.
//!
//! Library crates each define their own `thiserror` error enum at their
//! seams (`md2_link::LinkError`, `md2_kv::KvError`, `md2_sql::SqlError`,
//! ...); this type exists only to let `main` fold all of them into one
//! exit path, matching the workspace's top-level `Result<(), Box<dyn Error>>` pattern.

use crate::config::ConfigError;
use thiserror::Error;

/// Error returned from the `md2` binary's top-level wiring.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A component thread panicked or exited during startup.
    #[error("component {component} failed to start: {reason}")]
    StartupFailed {
        /// Name of the component thread.
        component: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// I/O failure not otherwise categorized (binding sockets, opening files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
