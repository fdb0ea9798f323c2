//! A one-bit edge latch set by an event-bus listener and consumed by a
//! scripted wait — used where a choreography step needs "has this edge
//! happened since I last reset it", not just the input's current level.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct EdgeLatch {
    flag: Mutex<bool>,
    changed: Condvar,
}

impl EdgeLatch {
    pub fn new() -> Arc<Self> {
        Arc::new(EdgeLatch {
            flag: Mutex::new(false),
            changed: Condvar::new(),
        })
    }

    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.changed.notify_all();
    }

    pub fn reset(&self) {
        *self.flag.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Block until the latch is set or `timeout` elapses; does not reset it.
    pub fn wait_set(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while !*flag {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.changed.wait_for(&mut flag, remaining);
        }
        true
    }

    /// Block until the latch is clear (used for "the previous open/close
    /// cycle was already observed") or `timeout` elapses.
    pub fn wait_clear(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while *flag {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.changed.wait_for(&mut flag, remaining);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn set_wakes_a_waiter() {
        let latch = EdgeLatch::new();
        let l = Arc::clone(&latch);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            l.set();
        });
        assert!(latch.wait_set(Duration::from_secs(2)));
    }

    #[test]
    fn reset_clears_and_wait_clear_returns_immediately() {
        let latch = EdgeLatch::new();
        latch.set();
        assert!(latch.is_set());
        latch.reset();
        assert!(latch.wait_clear(Duration::from_millis(10)));
    }

    #[test]
    fn wait_set_times_out_without_set() {
        let latch = EdgeLatch::new();
        assert!(!latch.wait_set(Duration::from_millis(20)));
    }
}
