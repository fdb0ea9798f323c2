//! Errors at the KV mirror's seam.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("backend connection error: {0}")]
    Connection(String),

    #[error("backend command error: {0}")]
    Command(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("timed out waiting for {0} to become valid")]
    Timeout(String),

    #[error("no preset named {name:?} on {motor}")]
    PresetNotFound { motor: String, name: String },

    #[error("value is not a valid {0}")]
    Parse(&'static str),
}
