//! Single-slot command mailbox. Posting is a `trylock`: a command that
//! arrives while the slot is still occupied (the worker hasn't drained the
//! previous one yet) is dropped with a warning rather than queued.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct Mailbox {
    slot: Mutex<Option<String>>,
    filled: Condvar,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox {
            slot: Mutex::new(None),
            filled: Condvar::new(),
        }
    }

    /// Post a command line. Drops it with a `tracing::warn!` if the
    /// mailbox already holds an undrained command.
    pub fn post(&self, line: impl Into<String>) {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            tracing::warn!(dropped = %line.into(), "command mailbox busy, dropping");
            return;
        }
        *slot = Some(line.into());
        self.filled.notify_one();
    }

    /// Worker-side: block for up to `timeout` for a command, then take it.
    pub fn take(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            self.filled.wait_for(&mut slot, remaining);
        }
        slot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn post_then_take_round_trips() {
        let mailbox = Mailbox::new();
        mailbox.post("abort");
        assert_eq!(mailbox.take(Duration::from_millis(10)).as_deref(), Some("abort"));
    }

    #[test]
    fn second_post_dropped_while_slot_occupied() {
        let mailbox = Mailbox::new();
        mailbox.post("moveAbs omega 10");
        mailbox.post("moveAbs omega 20");
        assert_eq!(mailbox.take(Duration::from_millis(10)).as_deref(), Some("moveAbs omega 10"));
        assert!(mailbox.take(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn take_wakes_on_post_from_another_thread() {
        let mailbox = Arc::new(Mailbox::new());
        let m = Arc::clone(&mailbox);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            m.post("run omega home");
        });
        assert_eq!(mailbox.take(Duration::from_secs(2)).as_deref(), Some("run omega home"));
    }

    #[test]
    fn take_times_out_with_empty_mailbox() {
        let mailbox = Mailbox::new();
        assert!(mailbox.take(Duration::from_millis(20)).is_none());
    }
}
