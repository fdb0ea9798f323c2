//! A synchronous bridge onto [`KvMirror`] for callers elsewhere in the
//! daemon that are not themselves async — the motion orchestrator, the
//! command executor — mirroring how `md2_sql::SqlGateway::call` presents a
//! blocking `wait()`/`done()` contract over its own dedicated `tokio`
//! runtime thread.

use crate::error::KvError;
use crate::mirror::KvMirror;
use std::sync::Arc;

/// Object-safe view of a mirror's blocking surface, so callers can depend
/// on `Arc<dyn KvHandle>` instead of the mirror's backend type parameters.
pub trait KvHandle: Send + Sync {
    fn getstr(&self, key: &str) -> Option<String>;
    fn setstr(&self, key: &str, value: &str) -> Result<(), KvError>;
    fn find_preset(&self, motor: &str, name: &str) -> Result<f64, KvError>;
    fn set_preset(&self, motor: &str, name: &str, position: f64) -> Result<(), KvError>;
}

/// Owns the `tokio::runtime::Handle` of the thread the mirror's pub/sub
/// loop and backend connections actually run on; every method here blocks
/// the calling thread for the duration of one `block_on`.
pub struct BlockingKv<R, W> {
    handle: tokio::runtime::Handle,
    mirror: Arc<KvMirror<R, W>>,
}

impl<R, W> BlockingKv<R, W>
where
    R: crate::backend::KvBackend + 'static,
    W: crate::backend::KvBackend + 'static,
{
    pub fn new(handle: tokio::runtime::Handle, mirror: Arc<KvMirror<R, W>>) -> Self {
        BlockingKv { handle, mirror }
    }
}

impl<R, W> KvHandle for BlockingKv<R, W>
where
    R: crate::backend::KvBackend + 'static,
    W: crate::backend::KvBackend + 'static,
{
    fn getstr(&self, key: &str) -> Option<String> {
        self.handle.block_on(self.mirror.getstr(key))
    }

    fn setstr(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.handle.block_on(self.mirror.setstr(key, value))
    }

    fn find_preset(&self, motor: &str, name: &str) -> Result<f64, KvError> {
        self.handle.block_on(self.mirror.find_preset(motor, name))
    }

    fn set_preset(&self, motor: &str, name: &str, position: f64) -> Result<(), KvError> {
        self.handle.block_on(self.mirror.set_preset(motor, name, position))
    }
}
