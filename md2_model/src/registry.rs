//! Fixed-size motor and binary-input tables.

use crate::binary_input::BinaryInput;
use crate::motor::Motor;
use md2_common::consts::{MAX_BINARY_INPUTS, MAX_MOTORS};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// The process-wide motor table. Built once at startup from configuration
/// and handed to every thread behind `Arc<MotorTable>`. Each slot carries
/// its own condition variable, signaled by the status reader after every
/// `Motor::read`, so the motion orchestrator can block on one motor's
/// `motion_seen`/`not_done` flags without waking every other waiter.
pub struct MotorTable {
    motors: Vec<Mutex<Motor>>,
    changed: Vec<Condvar>,
}

impl MotorTable {
    pub fn new(motors: Vec<Motor>) -> Self {
        assert!(
            motors.len() <= MAX_MOTORS,
            "motor table overflow: {} > {MAX_MOTORS}",
            motors.len()
        );
        let changed = motors.iter().map(|_| Condvar::new()).collect();
        MotorTable {
            motors: motors.into_iter().map(Mutex::new).collect(),
            changed,
        }
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    /// Iterate in table order — the order status reads invoke each motor's
    /// read method, and the order edge events for one status pass preserve.
    pub fn iter(&self) -> impl Iterator<Item = &Mutex<Motor>> {
        self.motors.iter()
    }

    pub fn by_name(&self, name: &str) -> Option<&Mutex<Motor>> {
        self.motors.iter().find(|m| m.lock().name == name)
    }

    pub fn by_axis_number(&self, axis_number: u8) -> Option<&Mutex<Motor>> {
        self.motors.iter().find(|m| m.lock().axis_number == axis_number)
    }

    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.motors.iter().position(|m| m.lock().name == name)
    }

    pub fn index_of_axis(&self, axis_number: u8) -> Option<usize> {
        self.motors.iter().position(|m| m.lock().axis_number == axis_number)
    }

    pub fn lock(&self, idx: usize) -> MutexGuard<'_, Motor> {
        self.motors[idx].lock()
    }

    /// Wake any waiter blocked on slot `idx`'s condition. Called by the
    /// status reader after `Motor::read` releases the motor's lock.
    pub fn notify(&self, idx: usize) {
        self.changed[idx].notify_all();
    }

    /// Block on slot `idx` until `pred` holds or `timeout` elapses.
    pub fn wait_until(&self, idx: usize, timeout: Duration, mut pred: impl FnMut(&Motor) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.motors[idx].lock();
        while !pred(&guard) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.changed[idx].wait_for(&mut guard, remaining);
        }
        true
    }
}

/// The process-wide binary-input table.
pub struct BinaryInputTable {
    inputs: Mutex<Vec<BinaryInput>>,
}

impl BinaryInputTable {
    pub fn new(inputs: Vec<BinaryInput>) -> Self {
        assert!(
            inputs.len() <= MAX_BINARY_INPUTS,
            "binary input table overflow: {} > {MAX_BINARY_INPUTS}",
            inputs.len()
        );
        BinaryInputTable {
            inputs: Mutex::new(inputs),
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.lock().is_empty()
    }

    /// Observe one status-block sample against every registered input, in
    /// table order, emitting edge events on `bus`.
    pub fn observe_all(&self, acc11c_words: &[u32], bus: &std::sync::Arc<md2_events::EventBus>) {
        let mut inputs = self.inputs.lock();
        for input in inputs.iter_mut() {
            input.observe(acc11c_words, bus);
        }
    }

    pub fn by_name(&self, name: &str) -> Option<bool> {
        self.inputs.lock().iter().find(|i| i.name == name).and_then(|i| i.is_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{Calibration, MotionPolicy, MotorKind};

    fn dummy_motor(name: &str, axis: u8) -> Motor {
        Motor::new(
            name,
            axis,
            None,
            Calibration {
                counts_per_unit: 1.0,
                neutral_offset: 0.0,
                unit: "mm".into(),
                precision: 3,
            },
            -1.0,
            1.0,
            MotionPolicy {
                max_velocity: 1.0,
                max_acceleration: 1.0,
                in_position_band_sixteenths: 16,
                update_resolution: 0.001,
                glitch_threshold_counts: 10,
            },
            MotorKind::Soft,
            None,
        )
    }

    #[test]
    fn finds_motor_by_name_and_axis() {
        let table = MotorTable::new(vec![dummy_motor("omega", 1), dummy_motor("phi", 2)]);
        assert!(table.by_name("phi").is_some());
        assert!(table.by_axis_number(1).is_some());
        assert!(table.by_name("missing").is_none());
    }

    #[test]
    #[should_panic(expected = "motor table overflow")]
    fn rejects_over_capacity_tables() {
        let motors: Vec<Motor> = (0..(MAX_MOTORS + 1) as u8).map(|i| dummy_motor("m", i)).collect();
        MotorTable::new(motors);
    }
}
