//! Decoded per-axis status bits and the priority-ordered summary string.
//!
//! The controller reports two 24-bit status words per axis; we decode the
//! bits this daemon actually acts on into a [`bitflags`] set per word. The
//! remaining bits of each 32-bit wire word are preserved (read back via
//! [`AxisStatus::status1`]/[`status2`]) but not individually named, since
//! nothing in the design acts on them.

use bitflags::bitflags;
use md2_proto::status_block::RawAxisStatus;

bitflags! {
    /// First status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status1: u32 {
        /// Following-error warning threshold exceeded.
        const FOLLOWING_WARNING = 1 << 0;
        /// Following-error fatal threshold exceeded.
        const FOLLOWING_ERROR = 1 << 1;
        /// I2T (thermal) fault tripped.
        const I2T_FAULT = 1 << 2;
        /// Amplifier fault line asserted.
        const AMP_FAULT = 1 << 3;
        /// Motor stopped because it hit a travel limit.
        const STOPPED_ON_LIMIT = 1 << 4;
        /// Motor is in open-loop (phasing / homing) mode.
        const OPEN_LOOP = 1 << 5;
        /// Amplifier enable line is asserted (cleared = "disabled").
        const AMP_ENABLED = 1 << 6;
        /// Controller-reported positive travel limit engaged.
        const POS_LIMIT = 1 << 7;
        /// Controller-reported negative travel limit engaged.
        const NEG_LIMIT = 1 << 8;
        /// Homing search has completed ("homed").
        const HOMED = 1 << 9;
        /// Within the in-position band.
        const IN_POSITION = 1 << 10;
    }
}

bitflags! {
    /// Second status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status2: u32 {
        /// A motion-program "move timer" is counting down for this motor.
        const MOVE_TIMER = 1 << 0;
        /// A homing search routine is actively running.
        const HOMING_IN_PROGRESS = 1 << 1;
    }
}

/// Fixed priority list used to choose the motor's one-line status summary.
/// Earlier variants take priority over later ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSummary {
    FollowingWarning,
    FollowingError,
    I2tFault,
    AmpFault,
    StoppedOnLimit,
    OpenLoop,
    Disabled,
    Homing,
    BothLimits,
    PositiveLimit,
    NegativeLimit,
    NotHomed,
    Moving,
    InPosition,
}

impl StatusSummary {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusSummary::FollowingWarning => "Following-Warning",
            StatusSummary::FollowingError => "Following-Error",
            StatusSummary::I2tFault => "I2T-Fault",
            StatusSummary::AmpFault => "Amp-Fault",
            StatusSummary::StoppedOnLimit => "Stopped-on-Limit",
            StatusSummary::OpenLoop => "Open-Loop",
            StatusSummary::Disabled => "Disabled",
            StatusSummary::Homing => "Homing",
            StatusSummary::BothLimits => "Both-Limits",
            StatusSummary::PositiveLimit => "Positive-Limit",
            StatusSummary::NegativeLimit => "Negative-Limit",
            StatusSummary::NotHomed => "Not-Homed",
            StatusSummary::Moving => "Moving",
            StatusSummary::InPosition => "In-Position",
        }
    }
}

/// Decoded status for one axis, derived solely from the two status words
/// and the raw counts register.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisStatus {
    pub status1: Status1,
    pub status2: Status2,
    pub actual_position_counts: i32,
}

impl From<RawAxisStatus> for AxisStatus {
    fn from(raw: RawAxisStatus) -> Self {
        AxisStatus {
            status1: Status1::from_bits_truncate(raw.status1),
            status2: Status2::from_bits_truncate(raw.status2),
            actual_position_counts: raw.actual_position_counts,
        }
    }
}

impl AxisStatus {
    /// Choose the summary string by the fixed priority list.
    pub fn summary(&self) -> StatusSummary {
        use StatusSummary::*;
        let s1 = self.status1;
        if s1.contains(Status1::FOLLOWING_WARNING) {
            return FollowingWarning;
        }
        if s1.contains(Status1::FOLLOWING_ERROR) {
            return FollowingError;
        }
        if s1.contains(Status1::I2T_FAULT) {
            return I2tFault;
        }
        if s1.contains(Status1::AMP_FAULT) {
            return AmpFault;
        }
        if s1.contains(Status1::STOPPED_ON_LIMIT) {
            return StoppedOnLimit;
        }
        if s1.contains(Status1::OPEN_LOOP) {
            return OpenLoop;
        }
        if !s1.contains(Status1::AMP_ENABLED) {
            return Disabled;
        }
        if self.status2.contains(Status2::HOMING_IN_PROGRESS) {
            return Homing;
        }
        let pos = s1.contains(Status1::POS_LIMIT);
        let neg = s1.contains(Status1::NEG_LIMIT);
        if pos && neg {
            return BothLimits;
        }
        if pos {
            return PositiveLimit;
        }
        if neg {
            return NegativeLimit;
        }
        if !s1.contains(Status1::HOMED) {
            return NotHomed;
        }
        if self.status2.contains(Status2::MOVE_TIMER) {
            return Moving;
        }
        if s1.contains(Status1::IN_POSITION) {
            return InPosition;
        }
        Moving
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn following_error_outranks_everything() {
        let s = AxisStatus {
            status1: Status1::FOLLOWING_ERROR | Status1::IN_POSITION | Status1::HOMED | Status1::AMP_ENABLED,
            status2: Status2::empty(),
            actual_position_counts: 0,
        };
        assert_eq!(s.summary(), StatusSummary::FollowingError);
    }

    #[test]
    fn disabled_beats_limits() {
        let s = AxisStatus {
            status1: Status1::POS_LIMIT,
            status2: Status2::empty(),
            actual_position_counts: 0,
        };
        assert_eq!(s.summary(), StatusSummary::Disabled);
    }

    #[test]
    fn both_limits_distinct_from_single() {
        let s = AxisStatus {
            status1: Status1::POS_LIMIT | Status1::NEG_LIMIT | Status1::AMP_ENABLED | Status1::HOMED,
            status2: Status2::empty(),
            actual_position_counts: 0,
        };
        assert_eq!(s.summary(), StatusSummary::BothLimits);
    }

    #[test]
    fn in_position_is_the_lowest_priority_happy_state() {
        let s = AxisStatus {
            status1: Status1::AMP_ENABLED | Status1::HOMED | Status1::IN_POSITION,
            status2: Status2::empty(),
            actual_position_counts: 0,
        };
        assert_eq!(s.summary(), StatusSummary::InPosition);
    }
}
