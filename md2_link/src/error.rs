//! Errors at the PMAC link's seam.

use md2_proto::PmacError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Socket closed, partial write, or any other transport-level failure.
    /// Transitions the link to `Detached`.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Controller returned a `0x07` error frame.
    #[error("controller error: {0}")]
    Protocol(PmacError),

    /// Response framing could not be scanned.
    #[error("frame error: {0}")]
    Frame(#[from] md2_proto::FrameError),

    /// A wait exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The link was not connected when a command was due to be sent.
    #[error("link is detached")]
    Detached,
}
