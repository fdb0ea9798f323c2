//! The caller-facing `call(); wait(); done();` contract: a query is
//! enqueued, the caller's own thread blocks on a condvar until the gateway
//! thread fills in the result, then takes it out exactly once.

use crate::error::SqlError;
use crate::result::QueryResult;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

pub struct SqlCall {
    result: Mutex<Option<Result<QueryResult, SqlError>>>,
    ready: Condvar,
}

impl SqlCall {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(SqlCall {
            result: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    pub(crate) fn fulfill(&self, outcome: Result<QueryResult, SqlError>) {
        let mut result = self.result.lock();
        *result = Some(outcome);
        self.ready.notify_all();
    }

    /// Block until the gateway fulfills this call or `timeout` elapses.
    /// Returns `false` on timeout; the result is still retrievable later
    /// via [`Self::done`] once it does land.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut result = self.result.lock();
        while result.is_none() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.ready.wait_for(&mut result, remaining);
        }
        true
    }

    /// Take the result, if one has landed. Each call's result is meant to
    /// be consumed exactly once.
    pub fn done(&self) -> Option<Result<QueryResult, SqlError>> {
        self.result.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_unblocks_on_fulfill() {
        let call = SqlCall::new();
        let c = Arc::clone(&call);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            c.fulfill(Ok(QueryResult::default()));
        });
        assert!(call.wait(Duration::from_secs(2)));
        assert!(call.done().unwrap().is_ok());
    }

    #[test]
    fn wait_times_out_without_fulfill() {
        let call = SqlCall::new();
        assert!(!call.wait(Duration::from_millis(20)));
        assert!(call.done().is_none());
    }

    #[test]
    fn done_consumes_the_result_once() {
        let call = SqlCall::new();
        call.fulfill(Err(SqlError::Query("boom".into())));
        assert!(call.done().unwrap().is_err());
        assert!(call.done().is_none());
    }
}
