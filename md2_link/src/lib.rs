//! The PMAC TCP link: wire-level state machine, bounded command queues, and
//! the pluggable transport production and tests wire differently.

mod error;
mod link;
mod queue;
mod state;
mod transport;
mod waiter;

pub use error::LinkError;
pub use link::PmacLink;
pub use queue::{AsciiEntry, AsciiQueue, CommandCallback, CommandEntry, CommandQueue};
pub use state::{LinkState, PendingReply};
pub use transport::{connect, LoopbackTransport, PmacTransport};
pub use waiter::LinkCall;
