//! Common re-exports for crates in the `md2` workspace.

pub use crate::config::{ConfigError, ConfigLoader, FullConfig, LogLevel};
pub use crate::consts::*;
pub use crate::error::DaemonError;
