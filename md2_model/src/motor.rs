//! The motor/IO object and its per-classification behavior.
//!
//! A [`Motor`] owns its own live state behind the caller's lock (the
//! workspace convention is a plain, non-reentrant
//! `parking_lot::Mutex` around each motor — callers here are expected to
//! hold that lock for the duration of a `read()` call and release it before
//! any event-bus/KV callback fires, which is why `read()` returns a result
//! value rather than calling out directly).

use crate::lut::LookupTable;
use crate::status::{AxisStatus, Status1, Status2, StatusSummary};
use md2_proto::status_block::RawAxisStatus;

/// In-system axis letter a PMAC-servo motor is wired to within its
/// coordinate system, or `None` for motors with no coordinate-system
/// membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisLetter {
    X,
    Y,
    Z,
    U,
    V,
    W,
    A,
    B,
    C,
}

impl AxisLetter {
    /// Motion-program bank number dispatched for this axis letter.
    pub fn motion_bank(self) -> u16 {
        match self {
            AxisLetter::X => 140,
            AxisLetter::Y => 141,
            AxisLetter::Z => 142,
            AxisLetter::U => 143,
            AxisLetter::V => 144,
            AxisLetter::W => 145,
            AxisLetter::A => 146,
            AxisLetter::B => 147,
            AxisLetter::C => 148,
        }
    }

    /// `Q` register slot index (1-based offset from `Q40`) this letter
    /// writes its delta into.
    pub fn slot(self) -> u16 {
        match self {
            AxisLetter::X => 40,
            AxisLetter::Y => 41,
            AxisLetter::Z => 42,
            AxisLetter::U => 43,
            AxisLetter::V => 44,
            AxisLetter::W => 45,
            AxisLetter::A => 46,
            AxisLetter::B => 47,
            AxisLetter::C => 48,
        }
    }
}

/// Homing progress, caller-visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomingPhase {
    #[default]
    Idle,
    /// An external `run <motor> home` has requested homing; waiting for the
    /// controller to report open-loop.
    OpenLoopRequested,
    /// Open-loop observed; the motor-specific homing script has been (or is
    /// about to be) dispatched.
    HomingScriptDispatched,
}

/// What kind of physical or simulated object this motor represents.
#[derive(Debug, Clone)]
pub enum MotorKind {
    /// Ordinary PMAC stepper/servo axis, possibly coordinate-system member.
    PmacServoOrStepper { axis_letter: Option<AxisLetter> },
    /// DAC output addressed as a PMAC `M` variable.
    DacOutput { m_variable: String },
    /// Binary (on/off) output addressed as a PMAC `M` variable.
    BinaryOutput { m_variable: String },
    /// The fast shutter, with its three controlling `M` variables.
    FastShutter {
        scan_enable_var: String,
        manual_enable_var: String,
        manual_on_var: String,
    },
    /// A fully simulated axis.
    Soft,
}

/// Calibration.
#[derive(Debug, Clone)]
pub struct Calibration {
    /// Counts per unit ("u2c").
    pub counts_per_unit: f64,
    pub neutral_offset: f64,
    pub unit: String,
    pub precision: u32,
}

/// Motion policy.
#[derive(Debug, Clone, Copy)]
pub struct MotionPolicy {
    pub max_velocity: f64,
    pub max_acceleration: f64,
    /// In-position band, in 1/16-count units.
    pub in_position_band_sixteenths: i32,
    pub update_resolution: f64,
    /// Glitch-filter threshold on the raw counts register.
    pub glitch_threshold_counts: i32,
}

/// Outcome of one [`Motor::read`] call: events to emit and KV fields to
/// publish, all as data — the caller (the status-refresh loop owning the
/// event bus and KV handle) performs the actual side effects after
/// releasing the motor's lock.
#[derive(Debug, Clone, Default)]
pub struct ReadOutcome {
    pub events: Vec<String>,
    pub pos_limit_changed: Option<bool>,
    pub neg_limit_changed: Option<bool>,
    /// Set when the status reader should dispatch this motor's configured
    /// homing script.
    pub dispatch_homing_script: bool,
    /// True if this sample was dropped by the glitch filter: no state was updated, no events emitted.
    pub glitched: bool,
}

/// The motor/IO object.
#[derive(Debug, Clone)]
pub struct Motor {
    pub name: String,
    pub axis_number: u8,
    pub cs_number: Option<u8>,
    pub calibration: Calibration,
    pub min_pos: f64,
    pub max_pos: f64,
    pub policy: MotionPolicy,
    pub active: bool,
    pub homing_phase: HomingPhase,
    pub motion_seen: bool,
    pub not_done: bool,
    pub command_sent: bool,
    pub lut: Option<LookupTable>,
    pub kind: MotorKind,
    /// Motor-specific homing script, dispatched via the ASCII path once the
    /// status reader observes open-loop after `start_homing`. `None` for
    /// motors with no configured script (DAC/binary/soft kinds).
    pub homing_script: Option<String>,

    pub raw_counts: i32,
    pub position: f64,
    pub status: AxisStatus,
    pub summary: StatusSummary,

    /// Previous sample's in-position bit, used by the glitch filter and
    /// `In Position`/`Moving` edge detection.
    prev_in_position: Option<bool>,
    /// Previous sample's move-timer-or-homing bit, used for `Moving` edges.
    prev_move_or_homing: Option<bool>,
}

impl Motor {
    pub fn new(
        name: impl Into<String>,
        axis_number: u8,
        cs_number: Option<u8>,
        calibration: Calibration,
        min_pos: f64,
        max_pos: f64,
        policy: MotionPolicy,
        kind: MotorKind,
        lut: Option<LookupTable>,
    ) -> Self {
        Motor {
            name: name.into(),
            axis_number,
            cs_number,
            calibration,
            min_pos,
            max_pos,
            policy,
            active: true,
            homing_phase: HomingPhase::Idle,
            motion_seen: false,
            not_done: false,
            command_sent: false,
            lut,
            kind,
            homing_script: None,
            raw_counts: 0,
            position: 0.0,
            status: AxisStatus::default(),
            summary: StatusSummary::NotHomed,
            prev_in_position: None,
            prev_move_or_homing: None,
        }
    }

    /// Attach a motor-specific homing script (builder-style, used by
    /// config loading — most motors have none).
    pub fn with_homing_script(mut self, script: impl Into<String>) -> Self {
        self.homing_script = Some(script.into());
        self
    }

    /// Axis letter, for `PmacServoOrStepper` motors that have one.
    pub fn axis_letter(&self) -> Option<AxisLetter> {
        match &self.kind {
            MotorKind::PmacServoOrStepper { axis_letter } => *axis_letter,
            _ => None,
        }
    }

    /// Decode counts → units.
    pub fn decode_position(&self, counts: i32) -> f64 {
        if let Some(lut) = &self.lut {
            lut.lut(counts as f64)
        } else {
            counts as f64 / self.calibration.counts_per_unit - self.calibration.neutral_offset
        }
    }

    /// Encode units → counts, the inverse of [`Self::decode_position`].
    pub fn encode_position(&self, units: f64) -> i32 {
        if let Some(lut) = &self.lut {
            lut.rlut(units).round() as i32
        } else {
            ((units + self.calibration.neutral_offset) * self.calibration.counts_per_unit).round() as i32
        }
    }

    /// Reject a requested position outside `[min_pos, max_pos]` before any
    /// wire dispatch.
    pub fn in_range(&self, requested_units: f64) -> bool {
        requested_units >= self.min_pos && requested_units <= self.max_pos
    }

    /// Call externally (by the motion orchestrator) to begin homing.
    /// Returns `false` if homing is already in progress.
    pub fn start_homing(&mut self) -> bool {
        if self.homing_phase != HomingPhase::Idle {
            return false;
        }
        self.homing_phase = HomingPhase::OpenLoopRequested;
        true
    }

    /// Call externally (by the motion orchestrator) right before a move is
    /// dispatched: clears `motion_seen` and sets `not_done`, so the
    /// orchestrator's completion wait can distinguish "hasn't started yet"
    /// from "already finished before we started waiting".
    pub fn begin_move(&mut self) {
        self.motion_seen = false;
        self.not_done = true;
        self.command_sent = true;
    }

    /// True once the status reader has observed motion start and finish
    /// for the move most recently begun with [`Self::begin_move`].
    pub fn move_complete(&self) -> bool {
        self.motion_seen && !self.not_done
    }

    /// Decode one status sample and update live state. Must be
    /// called with the motor's per-object lock held by the caller; returns
    /// the events/KV-writes/actions to perform after releasing it.
    pub fn read(&mut self, raw: RawAxisStatus) -> ReadOutcome {
        let mut out = ReadOutcome::default();
        let decoded = AxisStatus::from(raw);
        let in_position = decoded.status1.contains(Status1::IN_POSITION);

        // Glitch filter: in-position was and still is set,
        // but counts jumped past the motor's threshold — drop the sample.
        if self.prev_in_position == Some(true)
            && in_position
            && (raw.actual_position_counts - self.raw_counts).abs() > self.policy.glitch_threshold_counts
        {
            out.glitched = true;
            return out;
        }

        self.raw_counts = raw.actual_position_counts;
        self.position = self.decode_position(self.raw_counts);
        self.status = decoded;
        self.summary = decoded.summary();

        // In-position / moving edges.
        match self.prev_in_position {
            None => {
                out.events.push(format!(
                    "{} {}",
                    self.name,
                    if in_position { "In Position" } else { "Moving" }
                ));
            }
            Some(prev) if prev != in_position => {
                out.events.push(format!(
                    "{} {}",
                    self.name,
                    if in_position { "In Position" } else { "Moving" }
                ));
            }
            _ => {}
        }
        if in_position {
            self.not_done = false;
        }
        self.prev_in_position = Some(in_position);

        // Move-timer-or-homing edges.
        let move_or_homing =
            decoded.status2.contains(Status2::MOVE_TIMER) || decoded.status2.contains(Status2::HOMING_IN_PROGRESS);
        let rose = match self.prev_move_or_homing {
            None => move_or_homing,
            Some(prev) => !prev && move_or_homing,
        };
        if rose {
            self.motion_seen = true;
            out.events.push(format!("{} Moving", self.name));
        }
        self.prev_move_or_homing = Some(move_or_homing);

        // Homing phase machine.
        match self.homing_phase {
            HomingPhase::Idle => {}
            HomingPhase::OpenLoopRequested => {
                if decoded.status1.contains(Status1::OPEN_LOOP) {
                    self.homing_phase = HomingPhase::HomingScriptDispatched;
                    out.dispatch_homing_script = true;
                }
            }
            HomingPhase::HomingScriptDispatched => {
                if decoded.status1.contains(Status1::HOMED) && in_position {
                    self.homing_phase = HomingPhase::Idle;
                    out.events.push(format!("{} Homed", self.name));
                }
            }
        }

        // Limit-flag KV publication.
        let pos_limit = decoded.status1.contains(Status1::POS_LIMIT);
        let neg_limit = decoded.status1.contains(Status1::NEG_LIMIT);
        out.pos_limit_changed = Some(pos_limit);
        out.neg_limit_changed = Some(neg_limit);

        out
    }

    /// `moveAbs` for a binary output: writes `M<var>=0|1`, or synthesizes
    /// completion with no wire traffic if the value is already current.
    pub fn binary_output_command(&self, value: bool) -> Option<String> {
        match &self.kind {
            MotorKind::BinaryOutput { m_variable } => Some(format!("{}={}", m_variable, value as u8)),
            _ => None,
        }
    }

    /// `moveAbs` for a DAC output: `M<var> = u2c · lut(v)` (or `u2c · v`
    /// with no table).
    pub fn dac_output_command(&self, value_units: f64) -> Option<String> {
        match &self.kind {
            MotorKind::DacOutput { m_variable } => {
                let scaled = match &self.lut {
                    Some(lut) => lut.rlut(value_units),
                    None => value_units,
                };
                Some(format!("{}={}", m_variable, scaled * self.calibration.counts_per_unit))
            }
            _ => None,
        }
    }

    /// Fast-shutter open/close command sequence: opening asserts
    /// scan-enable off, manual-enable on, manual-on on, in that order;
    /// closing reverses the order.
    pub fn fast_shutter_commands(&self, open: bool) -> Option<Vec<String>> {
        match &self.kind {
            MotorKind::FastShutter {
                scan_enable_var,
                manual_enable_var,
                manual_on_var,
            } => {
                if open {
                    Some(vec![
                        format!("{scan_enable_var}=0"),
                        format!("{manual_enable_var}=1"),
                        format!("{manual_on_var}=1"),
                    ])
                } else {
                    Some(vec![
                        format!("{manual_on_var}=0"),
                        format!("{manual_enable_var}=0"),
                        format!("{scan_enable_var}=1"),
                    ])
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_motor(glitch_threshold: i32) -> Motor {
        Motor::new(
            "omega",
            1,
            Some(1),
            Calibration {
                counts_per_unit: 1000.0,
                neutral_offset: 0.0,
                unit: "deg".into(),
                precision: 3,
            },
            -360.0,
            360.0,
            MotionPolicy {
                max_velocity: 400.0,
                max_acceleration: 2000.0,
                in_position_band_sixteenths: 160,
                update_resolution: 0.001,
                glitch_threshold_counts: glitch_threshold,
            },
            MotorKind::PmacServoOrStepper {
                axis_letter: Some(AxisLetter::X),
            },
            None,
        )
    }

    fn raw(status1: Status1, status2: Status2, counts: i32) -> RawAxisStatus {
        RawAxisStatus {
            status1: status1.bits(),
            status2: status2.bits(),
            actual_position_counts: counts,
        }
    }

    #[test]
    fn first_sample_in_position_emits_in_position() {
        let mut m = test_motor(50);
        let out = m.read(raw(Status1::IN_POSITION | Status1::AMP_ENABLED | Status1::HOMED, Status2::empty(), 0));
        assert_eq!(out.events, vec!["omega In Position".to_string()]);
        assert!(!out.glitched);
    }

    #[test]
    fn glitch_filter_drops_sample_and_emits_nothing() {
        let mut m = test_motor(50);
        m.read(raw(Status1::IN_POSITION | Status1::AMP_ENABLED | Status1::HOMED, Status2::empty(), 1000));
        let out = m.read(raw(
            Status1::IN_POSITION | Status1::AMP_ENABLED | Status1::HOMED,
            Status2::empty(),
            1000 + 0x10000,
        ));
        assert!(out.glitched);
        assert!(out.events.is_empty());
        assert_eq!(m.raw_counts, 1000, "position must not have been updated");
    }

    #[test]
    fn motion_seen_latches_on_move_timer_rising_edge() {
        let mut m = test_motor(50);
        m.read(raw(Status1::AMP_ENABLED | Status1::HOMED, Status2::empty(), 0));
        assert!(!m.motion_seen);
        m.read(raw(Status1::AMP_ENABLED | Status1::HOMED, Status2::MOVE_TIMER, 100));
        assert!(m.motion_seen);
    }

    #[test]
    fn homing_phase_progresses_open_loop_then_homed() {
        let mut m = test_motor(50);
        assert!(m.start_homing());
        assert!(!m.start_homing(), "already homing");

        let out = m.read(raw(Status1::OPEN_LOOP, Status2::empty(), 0));
        assert!(out.dispatch_homing_script);
        assert_eq!(m.homing_phase, HomingPhase::HomingScriptDispatched);

        let out = m.read(raw(
            Status1::HOMED | Status1::IN_POSITION | Status1::AMP_ENABLED,
            Status2::empty(),
            0,
        ));
        assert!(out.events.contains(&"omega Homed".to_string()));
        assert_eq!(m.homing_phase, HomingPhase::Idle);
    }

    #[test]
    fn in_range_rejects_out_of_limits() {
        let m = test_motor(50);
        assert!(!m.in_range(720.0));
        assert!(m.in_range(10.0));
    }

    #[test]
    fn binary_output_command_formats_m_variable() {
        let mut m = test_motor(50);
        m.kind = MotorKind::BinaryOutput { m_variable: "M1234".into() };
        assert_eq!(m.binary_output_command(true).unwrap(), "M1234=1");
        assert_eq!(m.binary_output_command(false).unwrap(), "M1234=0");
    }

    #[test]
    fn fast_shutter_open_and_close_sequences_reverse_order() {
        let mut m = test_motor(50);
        m.kind = MotorKind::FastShutter {
            scan_enable_var: "M1124".into(),
            manual_enable_var: "M1125".into(),
            manual_on_var: "M1126".into(),
        };
        assert_eq!(
            m.fast_shutter_commands(true).unwrap(),
            vec!["M1124=0".to_string(), "M1125=1".to_string(), "M1126=1".to_string()]
        );
        assert_eq!(
            m.fast_shutter_commands(false).unwrap(),
            vec!["M1126=0".to_string(), "M1125=0".to_string(), "M1124=1".to_string()]
        );
    }
}
