//! Single-slot list-key mailbox, the same trylock-drop-on-busy shape as the
//! command executor's own mailbox — the raster worker's dedicated thread
//! blocks on this instead of a queue, per the "mailbox condition" row of the
//! thread table.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct RasterMailbox {
    slot: Mutex<Option<String>>,
    filled: Condvar,
}

impl Default for RasterMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterMailbox {
    pub fn new() -> Self {
        RasterMailbox {
            slot: Mutex::new(None),
            filled: Condvar::new(),
        }
    }

    /// Post a list key to drain. Drops it with a `tracing::warn!` if the
    /// slot still holds an undrained key.
    pub fn post(&self, key: impl Into<String>) {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            tracing::warn!(dropped = %key.into(), "raster mailbox busy, dropping");
            return;
        }
        *slot = Some(key.into());
        self.filled.notify_one();
    }

    /// Worker-side: block for up to `timeout` for a key, then take it.
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
