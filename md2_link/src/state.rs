//! The link's externally-observable state.
//!
//! The diagram's transient per-command wait states (`WACK_NFR`, `WACK`,
//! `WACK_CC`, `WACK_RR`, `GMR`, `WGB`, `WCR`, `RR`, `GB`, `CR`) are folded
//! here into [`LinkState::Busy`], carrying the kind of wait as data — the
//! dedicated thread's blocking reads *are* those wait states; nothing
//! outside this thread observes them individually, so keeping them as
//! named enum variants would only add dead branches.

use std::fmt;

/// What kind of response the link is currently blocked waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingReply {
    /// `SENDLINE_NR`: fire-and-forget, no reply at all.
    None,
    /// A single ack byte.
    Ack,
    /// A control-character text summary.
    CtrlResponse,
    /// The read-ready/get-buffer loop, terminated by the ack byte.
    ReadReadyGetBuffer,
    /// A binary memory read of known length.
    Memory(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Socket not open; periodically reconnect.
    Detached,
    /// Queue empty or about to be serviced; sitting ready to send.
    Idle,
    /// A command has been sent and the link is blocked on `PendingReply`.
    Busy(PendingReply),
    /// Recovering from a protocol-level error.
    Reset,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Detached => write!(f, "DETACHED"),
            LinkState::Idle => write!(f, "IDLE"),
            LinkState::Busy(p) => write!(f, "BUSY({p:?})"),
            LinkState::Reset => write!(f, "RESET"),
        }
    }
}
