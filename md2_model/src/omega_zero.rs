//! Omega zero-crossing search, used by the rotate choreography's centering
//! movie (§4.I.3 step 5): once armed, the status reader watches omega's
//! decoded position for the instant it crosses zero during the 360° sweep
//! and records a wall-clock timestamp for the external video server.
//!
//! Shared the same way [`crate::CsMotionMask`] is: one instance owned by
//! both the PMAC link (the only thread with per-sample access to omega's
//! freshly decoded position) and the command executor (which arms it
//! before starting the sweep and publishes the crossing once observed).

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

/// One observed crossing: everything the video-server KV record needs.
#[derive(Debug, Clone, Copy)]
pub struct ZeroCrossing {
    pub timestamp: SystemTime,
    pub zoom: f64,
    pub angle: f64,
    pub velocity: f64,
}

pub struct OmegaZeroSearch {
    armed: AtomicBool,
    last_angle: Mutex<Option<f64>>,
    crossing: Mutex<Option<ZeroCrossing>>,
}

impl Default for OmegaZeroSearch {
    fn default() -> Self {
        OmegaZeroSearch {
            armed: AtomicBool::new(false),
            last_angle: Mutex::new(None),
            crossing: Mutex::new(None),
        }
    }
}

impl OmegaZeroSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the search ahead of dispatching the sweep motion program.
    pub fn arm(&self) {
        *self.last_angle.lock() = None;
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Feed one status sample's decoded omega angle (degrees, monotonically
    /// sweeping 0..360). Disarms and records the crossing the first time
    /// the angle wraps back through zero. `velocity`/`zoom` are recorded
    /// verbatim into the crossing for the KV publisher. Returns `true` if
    /// this sample produced a new crossing.
    pub fn observe(&self, angle_deg: f64, velocity_deg_per_s: f64, zoom: f64) -> bool {
        if !self.is_armed() {
            return false;
        }
        let mut last = self.last_angle.lock();
        let crossed = matches!(*last, Some(prev) if prev > angle_deg);
        *last = Some(angle_deg);
        drop(last);

        if crossed {
            *self.crossing.lock() = Some(ZeroCrossing {
                timestamp: SystemTime::now(),
                zoom,
                angle: angle_deg,
                velocity: velocity_deg_per_s,
            });
            self.armed.store(false, Ordering::SeqCst);
        }
        crossed
    }

    /// Consume the most recently recorded crossing, if any.
    pub fn take_crossing(&self) -> Option<ZeroCrossing> {
        self.crossing.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmed_search_never_crosses() {
        let s = OmegaZeroSearch::new();
        assert!(!s.observe(10.0, 90.0, 5.0));
        assert!(!s.observe(1.0, 90.0, 5.0));
        assert!(s.take_crossing().is_none());
    }

    #[test]
    fn armed_search_detects_wraparound_and_disarms() {
        let s = OmegaZeroSearch::new();
        s.arm();
        assert!(!s.observe(350.0, 90.0, 5.0));
        assert!(!s.observe(355.0, 90.0, 5.0));
        assert!(s.observe(5.0, 90.0, 5.0));
        assert!(!s.is_armed());
        let crossing = s.take_crossing().unwrap();
        assert_eq!(crossing.angle, 5.0);
        assert_eq!(crossing.zoom, 5.0);
        assert!(s.take_crossing().is_none());
    }

    #[test]
    fn rearming_resets_the_previous_sample() {
        let s = OmegaZeroSearch::new();
        s.arm();
        s.observe(350.0, 90.0, 1.0);
        s.observe(5.0, 90.0, 1.0);
        assert!(s.take_crossing().is_some());

        s.arm();
        assert!(!s.observe(350.0, 90.0, 1.0), "first sample after rearm has no predecessor");
    }
}
