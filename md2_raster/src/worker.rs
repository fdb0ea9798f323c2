//! Drains step lists pushed into the in-memory store by an external raster
//! scan planner, invoking `raster_step(jsonb)` once per step.
//!
//! A "step" key names a list of JSON payload strings. `step(key)` pops one
//! payload at a time with `RPOPLPUSH key key_working` (so a payload in
//! flight survives a worker crash, visible on `key_working`), dispatches it
//! through the SQL gateway, then removes it from the working list. The
//! drain stops the moment `RPOPLPUSH` returns `None`.

use crate::error::RasterError;
use crate::mailbox::RasterMailbox;
use crate::ListBackend;
use md2_sql::SqlGateway;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// SQL call timeout for a single `raster_step` invocation.
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RasterWorker<B: ListBackend> {
    backend: B,
    sql: Arc<SqlGateway>,
    mailbox: Arc<RasterMailbox>,
    shutdown: Arc<AtomicBool>,
}

impl<B: ListBackend> RasterWorker<B> {
    pub fn new(backend: B, sql: Arc<SqlGateway>) -> Self {
        RasterWorker {
            backend,
            sql,
            mailbox: Arc::new(RasterMailbox::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle producers post list keys to; cloned before [`Self::spawn_worker`]
    /// consumes the worker.
    pub fn mailbox(&self) -> Arc<RasterMailbox> {
        Arc::clone(&self.mailbox)
    }

    /// Shutdown flag; cloned before [`Self::spawn_worker`] consumes the worker.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Drain every pending step queued under `key` into `raster_step` calls.
    /// Returns the number of steps dispatched.
    pub fn step(&mut self, key: &str) -> Result<usize, RasterError> {
        let working = format!("{key}_working");
        let mut dispatched = 0usize;
        loop {
            let Some(payload) = self.backend.rpoplpush(key, &working)? else {
                break;
            };
            self.dispatch(&payload)?;
            self.backend.lrem(&working, &payload)?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    fn dispatch(&self, payload: &str) -> Result<(), RasterError> {
        let escaped = payload.replace('\'', "''");
        let sql = format!("SELECT raster_step('{escaped}'::jsonb)");
        let call = self.sql.call(sql);
        if !call.wait(STEP_TIMEOUT) {
            return Err(RasterError::Timeout);
        }
        match call.done() {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(RasterError::Sql(e)),
            None => Err(RasterError::Timeout),
        }
    }
}

impl<B: ListBackend + Send + 'static> RasterWorker<B> {
    /// Spawn the dedicated thread that blocks on the mailbox and drains
    /// whatever key is posted to it.
    pub fn spawn_worker(mut self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("md2-raster".into())
            .spawn(move || self.worker_loop())
            .expect("failed to spawn raster worker thread")
    }

    fn worker_loop(&mut self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            let Some(key) = self.mailbox.take(Duration::from_millis(500)) else {
                continue;
            };
            if let Err(e) = self.step(&key) {
                tracing::warn!("raster step for {key} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockListBackend;
    use md2_events::EventBus;

    fn gateway() -> Arc<SqlGateway> {
        SqlGateway::new("postgres://localhost/md2", "md2_pmac", "md2_action", EventBus::new())
    }

    #[test]
    fn step_drains_until_rpoplpush_returns_none() {
        let mut backend = MockListBackend::new();
        backend.seed("raster:1", ["{\"x\":1}", "{\"x\":2}"]);
        let sql = gateway();

        // Stand in for the gateway's reactor thread: fulfill every call as
        // soon as it lands in the queue.
        let sql2 = Arc::clone(&sql);
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        let drainer = std::thread::spawn(move || {
            while !stop2.load(std::sync::atomic::Ordering::SeqCst) {
                if let Some(mut entry) = sql2.queue.try_pop() {
                    if let Some(cb) = entry.callback.take() {
                        cb(Ok(md2_sql::QueryResult::default()));
                    }
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        });

        let mut worker = RasterWorker::new(backend, sql.clone());
        let dispatched = worker.step("raster:1").unwrap();
        assert_eq!(dispatched, 2);
        assert!(worker.backend.contents("raster:1_working").is_empty());
        assert!(worker.backend.contents("raster:1").is_empty());

        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        drainer.join().unwrap();
    }

    #[test]
    fn mock_backend_rpoplpush_moves_between_lists() {
        let mut backend = MockListBackend::new();
        backend.seed("src", ["a", "b"]);
        let popped = backend.rpoplpush("src", "dst").unwrap();
        assert_eq!(popped, Some("b".to_string()));
        assert_eq!(backend.contents("dst"), vec!["b".to_string()]);
        assert_eq!(backend.contents("src"), vec!["a".to_string()]);
    }

    #[test]
    fn mock_backend_lrem_removes_all_occurrences() {
        let mut backend = MockListBackend::new();
        backend.seed("k", ["a", "b", "a"]);
        backend.lrem("k", "a").unwrap();
        assert_eq!(backend.contents("k"), vec!["b".to_string()]);
    }

    #[test]
    fn rpoplpush_on_empty_source_returns_none() {
        let mut backend = MockListBackend::new();
        assert_eq!(backend.rpoplpush("missing", "dst").unwrap(), None);
    }
}
