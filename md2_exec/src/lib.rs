//! The command executor (`md2cmds`): a single-slot mailbox, a dispatch
//! table split between always-registered and SQL-gateway-dependent verbs,
//! and the transfer/collect/rotate choreographies built on top of the
//! motion orchestrator, the SQL gateway, and the KV mirror.

mod choreography;
mod error;
mod executor;
mod latch;
mod mailbox;
mod phase;
mod status;

pub use error::ExecError;
pub use executor::Executor;
pub use phase::Phase;
