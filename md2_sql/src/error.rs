//! Errors at the SQL gateway's seam.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SqlError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("listen error: {0}")]
    Listen(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("gateway shut down before this call completed")]
    ShuttingDown,

    #[error("timed out waiting for query to complete")]
    Timeout,
}
