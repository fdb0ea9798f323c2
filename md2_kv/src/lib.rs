//! Reflected hash objects mirrored against an external key/value store:
//! read-through caching, write-through publishing, and the preset naming
//! convention layered on top of plain key/value pairs.

mod array;
mod backend;
mod blocking;
mod error;
mod mirror;
mod object;

pub use array::{format_pg_array, parse_pg_array};
pub use backend::{redis_backend, KvBackend, KvNotification, KvPubSub};
pub use blocking::{BlockingKv, KvHandle};
pub use error::KvError;
pub use mirror::KvMirror;
pub use object::KvObject;

#[cfg(test)]
pub use backend::mock;
