//! Errors at the motion orchestrator's seam.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("unknown motor {0:?}")]
    UnknownMotor(String),

    #[error("{name} is inactive")]
    Inactive { name: String },

    #[error("{name} move target is out of limits")]
    OutOfLimits { name: String },

    #[error("{0} has neither a preset name nor a fallback position")]
    NoTarget(String),

    #[error("preset lookup failed for {0}")]
    PresetUnavailable(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("link error: {0}")]
    Link(#[from] md2_link::LinkError),

    #[error("preset store error: {0}")]
    Kv(String),
}
