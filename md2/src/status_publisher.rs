//! Publishes travel-limit edges into the KV store.
//!
//! `md2_model::motor::Motor::read` computes `pos_limit_changed`/
//! `neg_limit_changed` on every status sample, but `PmacLink::poll_status`
//! only consumes `events`/`dispatch_homing_script` from the returned
//! `ReadOutcome` — nothing in the link or the motion/exec crates republishes
//! the limit flags anywhere a UI or SQL trigger could see them. This thread
//! re-derives the same edges from each motor's persisted `AxisStatus` at a
//! fixed, deliberately decimated rate (independent of the link's own
//! 50-100 Hz status poll) and writes `<name>.posLimitSet`/`<name>.negLimitSet`
//! through the KV handle on each rising/falling transition, mirroring the
//! wait/notify shutdown shape `md2_events::log_sink::LogSinkHandle` uses for
//! its own worker thread.

use md2_kv::KvHandle;
use md2_model::registry::MotorTable;
use md2_model::status::Status1;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

struct State {
    shutdown: bool,
}

pub struct StatusPublisher {
    motors: Arc<MotorTable>,
    kv: Arc<dyn KvHandle>,
    key_prefix: String,
    state: Mutex<State>,
    woken: Condvar,
}

impl StatusPublisher {
    pub fn new(motors: Arc<MotorTable>, kv: Arc<dyn KvHandle>, key_prefix: impl Into<String>) -> Arc<Self> {
        Arc::new(StatusPublisher {
            motors,
            kv,
            key_prefix: key_prefix.into(),
            state: Mutex::new(State { shutdown: false }),
            woken: Condvar::new(),
        })
    }

    pub fn request_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.woken.notify_all();
    }

    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let publisher = Arc::clone(self);
        std::thread::Builder::new()
            .name("md2-status-publisher".into())
            .spawn(move || publisher.worker_loop())
            .expect("failed to spawn status publisher thread")
    }

    fn worker_loop(&self) {
        let mut prev_pos = vec![false; self.motors.len()];
        let mut prev_neg = vec![false; self.motors.len()];

        loop {
            {
                let mut state = self.state.lock();
                if state.shutdown {
                    return;
                }
                let timed_out = self.woken.wait_for(&mut state, POLL_INTERVAL).timed_out();
                if !timed_out && state.shutdown {
                    return;
                }
            }
            self.publish_edges(&mut prev_pos, &mut prev_neg);
        }
    }

    fn publish_edges(&self, prev_pos: &mut [bool], prev_neg: &mut [bool]) {
        for idx in 0..self.motors.len() {
            let (name, pos, neg) = {
                let motor = self.motors.lock(idx);
                (motor.name.clone(), motor.status.status1.contains(Status1::POS_LIMIT), motor.status.status1.contains(Status1::NEG_LIMIT))
            };

            if pos != prev_pos[idx] {
                self.publish(&name, "posLimitSet", pos);
                prev_pos[idx] = pos;
            }
            if neg != prev_neg[idx] {
                self.publish(&name, "negLimitSet", neg);
                prev_neg[idx] = neg;
            }
        }
    }

    fn publish(&self, motor: &str, suffix: &str, value: bool) {
        let key = format!("{}{motor}.{suffix}", self.key_prefix);
        if let Err(e) = self.kv.setstr(&key, if value { "1" } else { "0" }) {
            tracing::warn!("status publisher: failed to write {key}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md2_kv::KvError;
    use md2_model::motor::{Calibration, MotionPolicy, Motor, MotorKind};
    use md2_model::status::AxisStatus;

    struct RecordingKv {
        writes: Mutex<Vec<(String, String)>>,
    }

    impl RecordingKv {
        fn new() -> Self {
            RecordingKv { writes: Mutex::new(Vec::new()) }
        }
    }

    impl KvHandle for RecordingKv {
        fn getstr(&self, _key: &str) -> Option<String> {
            None
        }

        fn setstr(&self, key: &str, value: &str) -> Result<(), KvError> {
            self.writes.lock().push((key.to_string(), value.to_string()));
            Ok(())
        }

        fn find_preset(&self, _motor: &str, _name: &str) -> Result<f64, KvError> {
            Err(KvError::PresetNotFound { motor: String::new(), name: String::new() })
        }

        fn set_preset(&self, _motor: &str, _name: &str, _position: f64) -> Result<(), KvError> {
            Ok(())
        }
    }

    fn motor(name: &str) -> Motor {
        Motor::new(
            name,
            1,
            None,
            Calibration { counts_per_unit: 1000.0, neutral_offset: 0.0, unit: "mm".into(), precision: 3 },
            -10.0,
            10.0,
            MotionPolicy {
                max_velocity: 1.0,
                max_acceleration: 1.0,
                in_position_band_sixteenths: 10,
                update_resolution: 0.0,
                glitch_threshold_counts: 1000,
            },
            MotorKind::PmacServoOrStepper { axis_letter: None },
            None,
        )
    }

    #[test]
    fn publishes_only_on_limit_edges() {
        let table = Arc::new(MotorTable::new(vec![motor("omega")]));
        let kv: Arc<dyn KvHandle> = Arc::new(RecordingKv::new());
        let publisher = StatusPublisher::new(Arc::clone(&table), Arc::clone(&kv), "md2:");

        let mut prev_pos = vec![false];
        let mut prev_neg = vec![false];

        publisher.publish_edges(&mut prev_pos, &mut prev_neg);
        assert!(prev_pos == [false] && prev_neg == [false]);

        {
            let mut guard = table.lock(0);
            guard.status = AxisStatus { status1: Status1::POS_LIMIT, status2: Default::default(), actual_position_counts: 0 };
        }
        publisher.publish_edges(&mut prev_pos, &mut prev_neg);
        assert_eq!(prev_pos, [true]);

        publisher.publish_edges(&mut prev_pos, &mut prev_neg);
        assert_eq!(prev_pos, [true]);
    }

    #[test]
    fn writes_expected_key_and_value() {
        let table = Arc::new(MotorTable::new(vec![motor("omega")]));
        let recording = Arc::new(RecordingKv::new());
        let kv: Arc<dyn KvHandle> = recording.clone();
        let publisher = StatusPublisher::new(Arc::clone(&table), kv, "md2:");

        let mut prev_pos = vec![false];
        let mut prev_neg = vec![false];
        {
            let mut guard = table.lock(0);
            guard.status = AxisStatus { status1: Status1::NEG_LIMIT, status2: Default::default(), actual_position_counts: 0 };
        }
        publisher.publish_edges(&mut prev_pos, &mut prev_neg);

        let writes = recording.writes.lock();
        assert_eq!(writes.as_slice(), [("md2:omega.negLimitSet".to_string(), "1".to_string())]);
    }
}
