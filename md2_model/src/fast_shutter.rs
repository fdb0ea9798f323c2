//! Fast-shutter latch tracking.
//!
//! The "has-opened-since-reset" and "is-open" flags are independently
//! latched in the status block. A dedicated mutex+condvar pair lets
//! exposure logic (`md2_exec`'s `collect` choreography) wait for
//! each edge; both conditions are signaled on any relevant change.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
struct Latches {
    is_open: bool,
    has_opened_since_reset: bool,
}

/// Shared latch state for the fast shutter, independent of the `Motor`
/// object itself so it can be cheaply held by both the status reader and
/// waiting exposure logic.
pub struct FastShutterLatches {
    state: Mutex<Latches>,
    changed: Condvar,
}

impl Default for FastShutterLatches {
    fn default() -> Self {
        FastShutterLatches {
            state: Mutex::new(Latches::default()),
            changed: Condvar::new(),
        }
    }
}

impl FastShutterLatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from a status-block sample; wakes any waiters on change.
    pub fn update(&self, is_open: bool, has_opened_since_reset: bool) {
        let mut state = self.state.lock();
        if state.is_open != is_open || state.has_opened_since_reset != has_opened_since_reset {
            state.is_open = is_open;
            state.has_opened_since_reset = has_opened_since_reset;
            self.changed.notify_all();
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().is_open
    }

    pub fn has_opened_since_reset(&self) -> bool {
        self.state.lock().has_opened_since_reset
    }

    /// Clear the has-opened latch. Local-only; the controller's own latch bit
    /// is reset on its next physical close/reopen cycle.
    pub fn reset_has_opened(&self) {
        self.state.lock().has_opened_since_reset = false;
    }

    /// Block until `has_opened_since_reset` becomes true or `timeout`
    /// elapses. Returns `true` if it became true.
    pub fn wait_opened(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |s| s.has_opened_since_reset)
    }

    /// Block until `is_open` becomes false (shutter closed) or `timeout`
    /// elapses.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |s| !s.is_open)
    }

    fn wait_for(&self, timeout: Duration, pred: impl Fn(&Latches) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !pred(&state) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return pred(&state);
            }
            let result = self.changed.wait_for(&mut state, remaining);
            if result.timed_out() && !pred(&state) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_opened_returns_once_latch_set() {
        let latches = Arc::new(FastShutterLatches::new());
        let l = Arc::clone(&latches);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            l.update(true, true);
        });
        assert!(latches.wait_opened(Duration::from_secs(2)));
    }

    #[test]
    fn wait_opened_times_out_if_never_set() {
        let latches = FastShutterLatches::new();
        assert!(!latches.wait_opened(Duration::from_millis(50)));
    }

    #[test]
    fn reset_clears_latch_locally() {
        let latches = FastShutterLatches::new();
        latches.update(true, true);
        assert!(latches.has_opened_since_reset());
        latches.reset_has_opened();
        assert!(!latches.has_opened_since_reset());
    }
}
