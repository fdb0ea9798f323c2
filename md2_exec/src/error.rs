//! Failures a scripted command can hit. Every variant is reported to the
//! caller as a status code/text pair (see [`crate::status::report`]) and,
//! for the top-level dispatch loop, as an `Aborted` event — this type
//! itself carries no severity; the executor maps it at the boundary.

use md2_link::LinkError;
use md2_motion::MotionError;
use md2_sql::SqlError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed arguments for {command}: {detail}")]
    BadArguments { command: String, detail: String },

    #[error("{0}")]
    Motion(#[from] MotionError),

    #[error("{0}")]
    Link(#[from] LinkError),

    #[error("sql gateway unavailable (not configured)")]
    SqlUnavailable,

    #[error("{0}")]
    Sql(#[from] SqlError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("aborted: {0}")]
    Aborted(&'static str),

    #[error("kv lookup failed for {0}")]
    Kv(String),
}
