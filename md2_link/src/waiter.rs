//! A synchronous `call(); wait(); done();` waiter for callers outside the
//! link's own thread, the same shape `md2_sql::SqlCall` uses for the SQL
//! gateway's caller protocol.

use crate::error::LinkError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct LinkCall<T> {
    result: Mutex<Option<Result<T, LinkError>>>,
    ready: Condvar,
}

impl<T: Send> LinkCall<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(LinkCall {
            result: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    pub(crate) fn fulfill(&self, outcome: Result<T, LinkError>) {
        let mut result = self.result.lock();
        *result = Some(outcome);
        self.ready.notify_all();
    }

    /// Block until the link thread fulfills this call or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut result = self.result.lock();
        while result.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.ready.wait_for(&mut result, remaining);
        }
        true
    }

    pub fn done(&self) -> Option<Result<T, LinkError>> {
        self.result.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_unblocks_on_fulfill() {
        let call: Arc<LinkCall<String>> = LinkCall::new();
        let c = Arc::clone(&call);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            c.fulfill(Ok("ok".to_string()));
        });
        assert!(call.wait(Duration::from_secs(2)));
        assert_eq!(call.done().unwrap().unwrap(), "ok");
    }

    #[test]
    fn wait_times_out_without_fulfill() {
        let call: Arc<LinkCall<String>> = LinkCall::new();
        assert!(!call.wait(Duration::from_millis(20)));
    }
}
