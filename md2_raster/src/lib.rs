//! Raster worker: drains a step-list queue in the in-memory store into
//! `raster_step(jsonb)` SQL calls.
//!
//! Holds its own connection to the in-memory store, separate from
//! [`md2_kv`]'s hash-keyed connections, since list operations (`RPOPLPUSH`,
//! `LREM`) never touch the same keys as the KV mirror's hashes.

mod backend;
mod error;
mod mailbox;
mod worker;

pub use backend::{ListBackend, RedisListBackend};
pub use error::RasterError;
pub use mailbox::RasterMailbox;
pub use worker::RasterWorker;

#[cfg(test)]
pub use backend::mock;
