//! The global coordinate-system motion mask.
//!
//! Mirrors the controller's own `M5075` word: bit `N-1` set means
//! coordinate system `N` has a motion program in flight. The PMAC link's
//! status poller updates this from the decoded status block's
//! `cs_moving_mask`; the motion orchestrator waits on it before dispatching
//! a new motion-program block to a coordinate system.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct CsMotionMask {
    bits: Mutex<u16>,
    changed: Condvar,
}

impl CsMotionMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits(&self) -> u16 {
        *self.bits.lock()
    }

    /// Overwrite the whole mask (used by the status poller and by abort's
    /// `M5075=0`).
    pub fn set(&self, bits: u16) {
        let mut guard = self.bits.lock();
        if *guard != bits {
            *guard = bits;
            self.changed.notify_all();
        }
    }

    /// Set just the bits in `mask` (used before dispatching a motion
    /// program block).
    pub fn set_bits(&self, mask: u16) {
        let mut guard = self.bits.lock();
        let updated = *guard | mask;
        if updated != *guard {
            *guard = updated;
            self.changed.notify_all();
        }
    }

    /// Block until every bit in `mask` is clear, or `timeout` elapses.
    /// Returns `true` if the bits cleared.
    pub fn wait_clear(&self, mask: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.bits.lock();
        while *guard & mask != 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return *guard & mask == 0;
            }
            self.changed.wait_for(&mut guard, remaining);
        }
        true
    }

    /// Block until every bit in `mask` is set, or `timeout` elapses.
    pub fn wait_set(&self, mask: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.bits.lock();
        while *guard & mask != mask {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return *guard & mask == mask;
            }
            self.changed.wait_for(&mut guard, remaining);
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
    fn wait_clear_returns_once_bits_drop() {
        let mask = Arc::new(CsMotionMask::new());
        mask.set_bits(0b0011);
        let m = Arc::clone(&mask);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            m.set(0b0001);
        });
        assert!(mask.wait_clear(0b0010, Duration::from_secs(1)));
    }

    #[test]
    fn wait_clear_times_out() {
        let mask = CsMotionMask::new();
        mask.set_bits(0b1);
        assert!(!mask.wait_clear(0b1, Duration::from_millis(30)));
    }

    #[test]
    fn wait_set_returns_once_bits_appear() {
        let mask = Arc::new(CsMotionMask::new());
        let m = Arc::clone(&mask);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            m.set_bits(0b0100);
        });
        assert!(mask.wait_set(0b0100, Duration::from_secs(1)));
    }
}
