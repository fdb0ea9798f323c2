//! The gateway's outer connection state machine.
//!
//! A plain enum field set only from the gateway's own reactor thread — the
//! async driver (`sqlx`) hides the original poll-by-poll non-blocking
//! mechanics, but the named states are kept as observable checkpoints so the
//! rest of the daemon (and tests) can tell "reconnecting" from "running a
//! query" from "idle".

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Connect,
    ConnectPoll,
    Reset,
    ResetPoll,
    Idle,
    Send,
    SendFlush,
    Recv,
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatewayState::Connect => "Connect",
            GatewayState::ConnectPoll => "ConnectPoll",
            GatewayState::Reset => "Reset",
            GatewayState::ResetPoll => "ResetPoll",
            GatewayState::Idle => "Idle",
            GatewayState::Send => "Send",
            GatewayState::SendFlush => "SendFlush",
            GatewayState::Recv => "Recv",
        };
        f.write_str(s)
    }
}
