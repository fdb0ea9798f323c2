//! The motion orchestrator: resolves targets, estimates move time, batches
//! coordinate-system moves, waits for completion, drives homing, and
//! handles abort.

use crate::error::MotionError;
use crate::estimate::{move_time_seconds, MoveSpec};
use crate::preset::PresetSource;
use md2_events::EventBus;
use md2_link::PmacLink;
use md2_model::registry::MotorTable;
use md2_model::{CsMotionMask, MotorKind, Status1};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MotionOrchestrator {
    link: Arc<PmacLink>,
    motors: Arc<MotorTable>,
    cs_mask: Arc<CsMotionMask>,
    bus: Arc<EventBus>,
    presets: Arc<dyn PresetSource>,
    homing_count: Mutex<i32>,
    homing_changed: Condvar,
}

/// Outcome of [`MotionOrchestrator::move_batch`]: the longest estimated
/// move time across every motor in the request, and the set of
/// coordinate-system bits it dispatched (for [`MotionOrchestrator::move_wait`]).
pub struct BatchDispatch {
    pub max_time: Duration,
    pub cs_bits: u16,
    pub direct_motors: Vec<String>,
}

impl MotionOrchestrator {
    pub fn new(
        link: Arc<PmacLink>,
        motors: Arc<MotorTable>,
        cs_mask: Arc<CsMotionMask>,
        bus: Arc<EventBus>,
        presets: Arc<dyn PresetSource>,
    ) -> Arc<Self> {
        let orch = Arc::new(MotionOrchestrator {
            link,
            motors,
            cs_mask,
            bus: Arc::clone(&bus),
            presets,
            homing_count: Mutex::new(0),
            homing_changed: Condvar::new(),
        });
        {
            let o = Arc::clone(&orch);
            let _ = bus.add_listener(r"^\S+ Homed$", move |_| {
                o.note_homing_finished();
            });
        }
        orch
    }

    fn resolve_target(&self, spec: &MoveSpec) -> Result<f64, MotionError> {
        match &spec.preset {
            Some(name) => self.presets.find_preset(&spec.motor, name),
            None => spec
                .fallback
                .ok_or_else(|| MotionError::NoTarget(spec.motor.clone())),
        }
    }

    /// 4.H.1: resolve each requested move, estimate its time, dispatch
    /// direct jogs immediately, and batch the rest by coordinate system
    /// into one motion-program block per system.
    pub fn move_batch(&self, specs: &[MoveSpec]) -> Result<BatchDispatch, MotionError> {
        let mut cs_slots: HashMap<u8, Vec<(u16, i32)>> = HashMap::new();
        let mut cs_bits: u16 = 0;
        let mut max_time = 0.0f64;
        let mut direct: Vec<(usize, String, i32)> = Vec::new();
        let mut direct_names = Vec::new();

        for spec in specs {
            let idx = self
                .motors
                .index_of_name(&spec.motor)
                .ok_or_else(|| MotionError::UnknownMotor(spec.motor.clone()))?;
            let target_units = self.resolve_target(spec)?;

            let (current_units, policy, in_range, cs_number, axis_letter, current_counts, target_counts, pos_limit, neg_limit) = {
                let m = self.motors.lock(idx);
                if !m.active {
                    return Err(MotionError::Inactive { name: spec.motor.clone() });
                }
                (
                    m.position,
                    m.policy,
                    m.in_range(target_units),
                    m.cs_number,
                    m.axis_letter(),
                    m.raw_counts,
                    m.encode_position(target_units),
                    m.status.status1.contains(Status1::POS_LIMIT),
                    m.status.status1.contains(Status1::NEG_LIMIT),
                )
            };

            if !in_range {
                self.bus.send(format!("{} Move Aborted", spec.motor));
                return Err(MotionError::OutOfLimits { name: spec.motor.clone() });
            }

            let delta_counts_signed = target_counts - current_counts;
            if (delta_counts_signed > 0 && pos_limit) || (delta_counts_signed < 0 && neg_limit) {
                self.bus.send(format!("{} Move Aborted", spec.motor));
                return Err(MotionError::OutOfLimits { name: spec.motor.clone() });
            }

            let delta_units = (target_units - current_units).abs();
            let t = move_time_seconds(delta_units, &policy);
            if t > max_time {
                max_time = t;
            }

            if spec.jog || cs_number.is_none() {
                direct.push((idx, spec.motor.clone(), target_counts));
                direct_names.push(spec.motor.clone());
                continue;
            }

            if (delta_counts_signed.abs() as i64) * 16 < policy.in_position_band_sixteenths as i64 {
                continue;
            }

            let letter = axis_letter.ok_or_else(|| MotionError::UnknownMotor(spec.motor.clone()))?;
            let cs = cs_number.unwrap();
            cs_slots.entry(cs).or_default().push((letter.slot(), delta_counts_signed));
            cs_bits |= 1 << (cs - 1);
        }

        for (idx, name, target_counts) in direct {
            self.motors.lock(idx).begin_move();
            self.link.send_ascii_no_reply(format!("#{} j={}", self.motors.lock(idx).axis_number, target_counts));
            let _ = name;
        }

        if cs_bits != 0 {
            if !self.cs_mask.wait_clear(cs_bits, Duration::from_secs(60)) {
                return Err(MotionError::Timeout("coordinate system(s) to become free"));
            }
            self.cs_mask.set_bits(cs_bits);
            if !self.cs_mask.wait_set(cs_bits, Duration::from_secs(2)) {
                return Err(MotionError::Timeout("coordinate system(s) motion bit to propagate"));
            }

            for (cs, slots) in &cs_slots {
                let mut line = format!("&{cs} ");
                for (slot, delta) in slots {
                    line.push_str(&format!("Q{slot}={delta} "));
                }
                let q49 = (1000.0 * max_time).round() as i64;
                line.push_str(&format!("Q49={q49} Q100={} B180R", 1u16 << (cs - 1)));
                self.link.send_ascii_no_reply(line);
            }
        }

        Ok(BatchDispatch {
            max_time: Duration::from_secs_f64(max_time),
            cs_bits,
            direct_motors: direct_names,
        })
    }

    /// 4.H.2: wait for the batch's coordinate-system bits to clear, then
    /// for each directly-dispatched motor's `motion_seen=1, not_done=0`.
    pub fn move_wait(&self, dispatch: &BatchDispatch) -> Result<(), MotionError> {
        let deadline = Instant::now() + dispatch.max_time + Duration::from_secs(1);

        if dispatch.cs_bits != 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.cs_mask.wait_clear(dispatch.cs_bits, remaining) {
                return Err(MotionError::Timeout("coordinate system(s) to finish moving"));
            }
        }

        for name in &dispatch.direct_motors {
            let idx = self
                .motors
                .index_of_name(name)
                .ok_or_else(|| MotionError::UnknownMotor(name.clone()))?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.motors.wait_until(idx, remaining, |m| m.move_complete()) {
                return Err(MotionError::Timeout("motor to finish moving"));
            }
        }
        Ok(())
    }

    /// 4.H.3: move or jog one motor, synthesizing completion with no wire
    /// traffic if it's already within the in-position band.
    pub fn move_or_jog_individual(
        &self,
        motor_name: &str,
        target_units: f64,
        use_jog: bool,
    ) -> Result<Duration, MotionError> {
        let idx = self
            .motors
            .index_of_name(motor_name)
            .ok_or_else(|| MotionError::UnknownMotor(motor_name.to_string()))?;

        let (axis_number, policy, axis_letter, cs_number, current_units, current_counts, target_counts, pos_limit, neg_limit) = {
            let m = self.motors.lock(idx);
            if !m.active {
                return Err(MotionError::Inactive { name: motor_name.to_string() });
            }
            if !m.in_range(target_units) {
                drop(m);
                self.bus.send(format!("{motor_name} Move Aborted"));
                return Err(MotionError::OutOfLimits { name: motor_name.to_string() });
            }
            (
                m.axis_number,
                m.policy,
                m.axis_letter(),
                m.cs_number,
                m.position,
                m.raw_counts,
                m.encode_position(target_units),
                m.status.status1.contains(Status1::POS_LIMIT),
                m.status.status1.contains(Status1::NEG_LIMIT),
            )
        };

        let delta_counts = target_counts - current_counts;
        if (delta_counts > 0 && pos_limit) || (delta_counts < 0 && neg_limit) {
            self.bus.send(format!("{motor_name} Move Aborted"));
            return Err(MotionError::OutOfLimits { name: motor_name.to_string() });
        }

        if (delta_counts.abs() as i64) * 16 < policy.in_position_band_sixteenths as i64 {
            self.bus.send(format!("{motor_name} Moving"));
            self.bus.send(format!("{motor_name} In Position"));
            return Ok(Duration::ZERO);
        }

        let delta_units = (target_units - current_units).abs();
        let t = move_time_seconds(delta_units, &policy);
        self.motors.lock(idx).begin_move();

        if use_jog || axis_letter.is_none() {
            self.link.send_ascii_no_reply(format!("#{axis_number} j={target_counts}"));
        } else {
            let cs = cs_number.ok_or_else(|| MotionError::UnknownMotor(motor_name.to_string()))?;
            let letter = axis_letter.unwrap();
            let mask = 1u16 << (cs - 1);
            if !self.cs_mask.wait_clear(mask, Duration::from_secs(60)) {
                return Err(MotionError::Timeout("coordinate system to become free"));
            }
            self.cs_mask.set_bits(mask);
            if !self.cs_mask.wait_set(mask, Duration::from_secs(4)) {
                return Err(MotionError::Timeout("coordinate system bit to propagate"));
            }
            let line = format!("&{cs} Q{}={delta_counts} Q100={mask} B{}R", letter.slot(), letter.motion_bank());
            self.link.send_ascii_no_reply(line);
        }

        Ok(Duration::from_secs_f64(t))
    }

    /// 4.H.4: begin homing a motor and wait for `home_wait` callers to
    /// observe completion across every motor homed in this batch.
    pub fn home_prep(&self) {
        *self.homing_count.lock() = -1;
    }

    pub fn queue_home(&self, motor_name: &str) -> Result<(), MotionError> {
        let idx = self
            .motors
            .index_of_name(motor_name)
            .ok_or_else(|| MotionError::UnknownMotor(motor_name.to_string()))?;
        let axis_number = {
            let mut m = self.motors.lock(idx);
            if !m.start_homing() {
                return Ok(()); // already homing; not an error
            }
            m.axis_number
        };
        self.note_homing_started();
        self.link.send_ascii_no_reply(format!("#{axis_number}$*"));
        Ok(())
    }

    /// Called by the event-bus listener on every `<name> Homing` event.
    pub fn note_homing_started(&self) {
        let mut count = self.homing_count.lock();
        if *count == -1 {
            *count = 1;
        } else {
            *count += 1;
        }
        self.homing_changed.notify_all();
    }

    /// Called by the event-bus listener on every `<name> Homed` event.
    pub fn note_homing_finished(&self) {
        let mut count = self.homing_count.lock();
        *count -= 1;
        self.homing_changed.notify_all();
    }

    pub fn home_wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.homing_count.lock();
        while *count > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return *count <= 0;
            }
            self.homing_changed.wait_for(&mut count, remaining);
        }
        true
    }

    /// 4.H.5: control-A, force the motion mask to zero, re-close the fast
    /// shutter.
    pub fn abort(&self) -> Result<(), MotionError> {
        const CONTROL_A: u8 = 0x01;
        let call = self.link.call_control_char(CONTROL_A);
        call.wait(Duration::from_secs(2));
        let _ = call.done();

        self.link.send_ascii_no_reply("M5075=0");
        self.cs_mask.set(0);

        for motor_lock in self.motors.iter() {
            let m = motor_lock.lock();
            if let MotorKind::FastShutter { .. } = &m.kind {
                if let Some(commands) = m.fast_shutter_commands(false) {
                    drop(m);
                    for cmd in commands {
                        self.link.send_ascii_no_reply(cmd);
                    }
                }
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::mock::MockPresetSource;
    use md2_model::motor::{Calibration, MotionPolicy as Policy, Motor};
    use md2_model::BinaryInputTable;

    fn motor(name: &str, axis: u8, cs: Option<u8>, letter: Option<md2_model::AxisLetter>) -> Motor {
        Motor::new(
            name,
            axis,
            cs,
            Calibration {
                counts_per_unit: 1000.0,
                neutral_offset: 0.0,
                unit: "mm".into(),
                precision: 3,
            },
            -100.0,
            100.0,
            Policy {
                max_velocity: 50.0,
                max_acceleration: 500.0,
                in_position_band_sixteenths: 160,
                update_resolution: 0.001,
                glitch_threshold_counts: 50,
            },
            MotorKind::PmacServoOrStepper { axis_letter: letter },
            None,
        )
    }

    fn orchestrator() -> (Arc<MotionOrchestrator>, Arc<PmacLink>) {
        let bus = EventBus::new();
        bus.spawn_worker();
        let motors = Arc::new(MotorTable::new(vec![
            motor("omega", 1, Some(1), Some(md2_model::AxisLetter::X)),
            motor("scint", 2, None, None),
        ]));
        let cs_mask = Arc::new(CsMotionMask::new());
        let link = PmacLink::new(
            "127.0.0.1:0",
            Arc::clone(&bus),
            Arc::clone(&motors),
            Arc::new(BinaryInputTable::new(vec![])),
            Arc::clone(&cs_mask),
            Arc::new(md2_model::OmegaZeroSearch::new()),
        );
        let presets: Arc<dyn PresetSource> = Arc::new(MockPresetSource::new());
        let orch = MotionOrchestrator::new(link.clone(), motors, cs_mask, bus, presets);
        (orch, link)
    }

    #[test]
    fn move_batch_rejects_unknown_motor() {
        let (orch, _link) = orchestrator();
        let err = orch.move_batch(&[MoveSpec::to_target("missing", 1.0)]).unwrap_err();
        assert!(matches!(err, MotionError::UnknownMotor(_)));
    }

    #[test]
    fn move_batch_rejects_out_of_limits_target() {
        let (orch, _link) = orchestrator();
        let err = orch.move_batch(&[MoveSpec::to_target("scint", 1000.0)]).unwrap_err();
        assert!(matches!(err, MotionError::OutOfLimits { .. }));
    }

    #[test]
    fn move_batch_dispatches_non_cs_motor_directly() {
        let (orch, _link) = orchestrator();
        let dispatch = orch.move_batch(&[MoveSpec::to_target("scint", 10.0)]).unwrap();
        assert_eq!(dispatch.direct_motors, vec!["scint".to_string()]);
        assert_eq!(dispatch.cs_bits, 0);
    }

    #[test]
    fn move_batch_batches_cs_motor_and_sets_mask() {
        let (orch, _link) = orchestrator();
        let dispatch = orch.move_batch(&[MoveSpec::to_target("omega", 10.0)]).unwrap();
        assert!(dispatch.direct_motors.is_empty());
        assert_eq!(dispatch.cs_bits, 0b1);
        assert_eq!(orch.cs_mask.bits(), 0b1);
    }

    #[test]
    fn move_or_jog_synthesizes_completion_within_band() {
        let (orch, _link) = orchestrator();
        let t = orch.move_or_jog_individual("scint", 0.0, true).unwrap();
        assert_eq!(t, Duration::ZERO);
    }

    #[test]
    fn home_wait_returns_once_count_reaches_zero() {
        let (orch, _link) = orchestrator();
        orch.home_prep();
        orch.note_homing_started();
        orch.note_homing_started();
        assert!(!orch.home_wait(Duration::from_millis(20)));
        orch.note_homing_finished();
        orch.note_homing_finished();
        assert!(orch.home_wait(Duration::from_millis(20)));
    }

    #[test]
    fn queue_home_drives_home_wait_via_the_homed_event() {
        let (orch, _link) = orchestrator();
        orch.home_prep();
        orch.queue_home("omega").unwrap();
        assert!(!orch.home_wait(Duration::from_millis(20)), "still homing");

        orch.bus.send("omega Homed");
        assert!(orch.home_wait(Duration::from_secs(1)));
    }

    #[test]
    fn abort_clears_motion_mask() {
        let (orch, _link) = orchestrator();
        orch.cs_mask.set_bits(0b11);
        orch.abort().unwrap();
        assert_eq!(orch.cs_mask.bits(), 0);
    }
}
