//! `changeMode <mode>` phase recipes: each phase is a fixed list of moves
//! dispatched as one batch through [`md2_motion::MotionOrchestrator`],
//! plus a set of motors that must be homed first.

use md2_motion::MoveSpec;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ManualMount,
    RobotMount,
    Center,
    DataCollection,
    BeamLocation,
    Safe,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::ManualMount => "manualMount",
            Phase::RobotMount => "robotMount",
            Phase::Center => "center",
            Phase::DataCollection => "dataCollection",
            Phase::BeamLocation => "beamLocation",
            Phase::Safe => "safe",
        }
    }

    /// Motors that must be homed before the phase's moves are dispatched;
    /// homing order is significant (kappa/omega before phi).
    pub fn homing_order(self) -> &'static [&'static str] {
        match self {
            Phase::ManualMount | Phase::RobotMount => &["kappa", "omega", "phi"],
            Phase::Safe => &["omega"],
            _ => &[],
        }
    }

    /// The fixed recipe of preset moves for this phase.
    pub fn recipe(self) -> Vec<MoveSpec> {
        match self {
            Phase::ManualMount | Phase::RobotMount => vec![
                MoveSpec::to_preset("scint", "Cover"),
                MoveSpec::to_preset("capz", "Cover"),
                MoveSpec::to_preset("backlight", "Park"),
                MoveSpec::to_preset("cryo", "Back"),
                MoveSpec::to_preset("fluo", "Back"),
            ],
            Phase::Center => vec![
                MoveSpec::to_preset("scint", "Park"),
                MoveSpec::to_preset("capz", "Beam"),
                MoveSpec::to_preset("backlight", "In"),
                MoveSpec::to_preset("zoom", "Center"),
            ],
            Phase::DataCollection => vec![
                MoveSpec::to_preset("scint", "Beam"),
                MoveSpec::to_preset("capz", "Beam"),
                MoveSpec::to_preset("backlight", "Park"),
                MoveSpec::to_preset("cryo", "Beam"),
            ],
            Phase::BeamLocation => vec![
                MoveSpec::to_preset("scint", "Beam"),
                MoveSpec::to_preset("capz", "Park"),
                MoveSpec::to_preset("fluo", "Beam"),
            ],
            Phase::Safe => vec![
                MoveSpec::to_preset("scint", "Cover"),
                MoveSpec::to_preset("capz", "Cover"),
                MoveSpec::to_preset("backlight", "Park"),
            ],
        }
    }
}

impl FromStr for Phase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manualMount" => Ok(Phase::ManualMount),
            "robotMount" => Ok(Phase::RobotMount),
            "center" => Ok(Phase::Center),
            "dataCollection" => Ok(Phase::DataCollection),
            "beamLocation" => Ok(Phase::BeamLocation),
            "safe" => Ok(Phase::Safe),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_phase_names() {
        assert_eq!("center".parse::<Phase>().unwrap(), Phase::Center);
        assert!("bogus".parse::<Phase>().is_err());
    }

    #[test]
    fn every_phase_has_a_nonempty_recipe() {
        for p in [
            Phase::ManualMount,
            Phase::RobotMount,
            Phase::Center,
            Phase::DataCollection,
            Phase::BeamLocation,
            Phase::Safe,
        ] {
            assert!(!p.recipe().is_empty());
            assert_eq!(p.name().parse::<Phase>().unwrap(), p);
        }
    }
}
