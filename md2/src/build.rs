//! Converts the TOML configuration types in `md2_common::config` into the
//! runtime model types in `md2_model`: motor table, binary-input table, and
//! the lookup tables/calibration/motion-policy each motor carries.

use md2_common::config::{BinaryInputConfig, FullConfig, MotorClass, MotorConfig};
use md2_common::error::DaemonError;
use md2_model::motor::{AxisLetter, Calibration, Motor, MotionPolicy, MotorKind};
use md2_model::{BinaryInput, BinaryInputTable, LookupTable, MotorTable};

/// Fast-shutter `M`-variables: fixed on every MD2, not configurable per
/// installation (mirrors the hardcoded wiring in `md2_exec`'s own
/// `ALIGN_AXES`/`CENTER_AXES` constants).
const FAST_SHUTTER_SCAN_ENABLE_VAR: &str = "M1124";
const FAST_SHUTTER_MANUAL_ENABLE_VAR: &str = "M1125";
const FAST_SHUTTER_MANUAL_ON_VAR: &str = "M1126";

pub fn build_motor_table(full: &FullConfig) -> Result<MotorTable, DaemonError> {
    let motors = full
        .motors
        .iter()
        .map(build_motor)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MotorTable::new(motors))
}

pub fn build_binary_input_table(full: &FullConfig) -> BinaryInputTable {
    let inputs = full
        .machine
        .binary_inputs
        .iter()
        .map(build_binary_input)
        .collect();
    BinaryInputTable::new(inputs)
}

fn build_binary_input(cfg: &BinaryInputConfig) -> BinaryInput {
    BinaryInput::new(
        cfg.name.clone(),
        // The config's bit_index addresses a single bit within a 32-bit
        // ACC-11C word; word_index 0 is the only word this daemon monitors.
        0,
        1u32 << cfg.bit_index,
        cfg.rising_event.clone(),
        cfg.falling_event.clone(),
    )
}

fn build_motor(cfg: &MotorConfig) -> Result<Motor, DaemonError> {
    let identity = &cfg.motor;

    let lut = match &cfg.lookup_table {
        Some(points) => {
            let pairs = points.iter().map(|p| (p.counts, p.value)).collect();
            Some(LookupTable::new(pairs).map_err(|e| DaemonError::StartupFailed {
                component: "motor table",
                reason: format!("{}: {e}", identity.name),
            })?)
        }
        None => None,
    };

    let calibration = Calibration {
        counts_per_unit: cfg.calibration.counts_per_unit,
        neutral_offset: cfg.calibration.neutral_offset,
        unit: cfg.calibration.unit.clone(),
        precision: cfg.calibration.precision as u32,
    };

    let policy = match &cfg.motion {
        Some(m) => MotionPolicy {
            max_velocity: m.max_velocity,
            max_acceleration: m.max_acceleration,
            in_position_band_sixteenths: m.in_position_band as i32,
            update_resolution: m.update_resolution,
            glitch_threshold_counts: m.glitch_threshold_counts as i32,
        },
        None => MotionPolicy {
            max_velocity: 0.0,
            max_acceleration: 0.0,
            in_position_band_sixteenths: 0,
            update_resolution: 0.0,
            glitch_threshold_counts: 1000,
        },
    };

    let axis_letter = identity
        .axis_letter
        .map(|c| parse_axis_letter(c, &identity.name))
        .transpose()?;

    let kind = match identity.class {
        MotorClass::PmacAxis => MotorKind::PmacServoOrStepper { axis_letter },
        MotorClass::Dac => MotorKind::DacOutput {
            m_variable: identity.m_variable.clone().ok_or_else(|| DaemonError::StartupFailed {
                component: "motor table",
                reason: format!("{}: dac motor missing m_variable", identity.name),
            })?,
        },
        MotorClass::BinaryOutput => MotorKind::BinaryOutput {
            m_variable: identity.m_variable.clone().ok_or_else(|| DaemonError::StartupFailed {
                component: "motor table",
                reason: format!("{}: binary_output motor missing m_variable", identity.name),
            })?,
        },
        MotorClass::FastShutter => MotorKind::FastShutter {
            scan_enable_var: FAST_SHUTTER_SCAN_ENABLE_VAR.to_string(),
            manual_enable_var: FAST_SHUTTER_MANUAL_ENABLE_VAR.to_string(),
            manual_on_var: FAST_SHUTTER_MANUAL_ON_VAR.to_string(),
        },
        MotorClass::Soft => MotorKind::Soft,
    };

    let axis_number = identity.axis_number.unwrap_or(0) as u8;

    let mut motor = Motor::new(
        identity.name.clone(),
        axis_number,
        identity.coordinate_system,
        calibration,
        cfg.limits.min_position,
        cfg.limits.max_position,
        policy,
        kind,
        lut,
    );
    if let Some(script) = &identity.homing_script {
        motor = motor.with_homing_script(script.clone());
    }
    Ok(motor)
}

fn parse_axis_letter(c: char, motor_name: &str) -> Result<AxisLetter, DaemonError> {
    match c.to_ascii_uppercase() {
        'X' => Ok(AxisLetter::X),
        'Y' => Ok(AxisLetter::Y),
        'Z' => Ok(AxisLetter::Z),
        'U' => Ok(AxisLetter::U),
        'V' => Ok(AxisLetter::V),
        'W' => Ok(AxisLetter::W),
        'A' => Ok(AxisLetter::A),
        'B' => Ok(AxisLetter::B),
        'C' => Ok(AxisLetter::C),
        other => Err(DaemonError::StartupFailed {
            component: "motor table",
            reason: format!("{motor_name}: unknown axis letter {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md2_common::config::{
        CalibrationConfig, DaemonConfig, KvConfig, LimitsConfig, LinkConfig, MachineConfig, MachineIdentity,
        MotorIdentity, SqlConfig,
    };

    fn daemon_config() -> DaemonConfig {
        DaemonConfig {
            link: LinkConfig { host: "10.1.0.10".into(), port: 1025 },
            kv: KvConfig {
                local_addr: "127.0.0.1:6379".into(),
                remote_addr: "10.1.0.2:6379".into(),
                key_prefix: "md2:".into(),
                mirror_filter: ".*".into(),
                publish_channel: "md2.events".into(),
                ui_channel: "md2.ui".into(),
            },
            sql: SqlConfig {
                dsn: "postgres://md2@localhost/md2".into(),
                pmac_channel: "notify_pmac".into(),
                action_channel: "notify_action".into(),
            },
            log: Default::default(),
        }
    }

    fn motor_config(name: &str, axis_letter: Option<char>, class: MotorClass, m_variable: Option<&str>) -> MotorConfig {
        MotorConfig {
            motor: MotorIdentity {
                id: 1,
                name: name.into(),
                axis_number: Some(1),
                coordinate_system: Some(1),
                axis_letter,
                class,
                homing_script: None,
                m_variable: m_variable.map(str::to_string),
            },
            calibration: CalibrationConfig {
                counts_per_unit: 1000.0,
                neutral_offset: 0.0,
                unit: "mm".into(),
                print_format: "%.3f".into(),
                precision: 3,
            },
            limits: LimitsConfig { min_position: -10.0, max_position: 10.0 },
            motion: None,
            lookup_table: None,
        }
    }

    fn full_config(motors: Vec<MotorConfig>) -> FullConfig {
        FullConfig {
            daemon: daemon_config(),
            machine: MachineConfig { machine: MachineIdentity { name: "MD2-TEST".into() }, binary_inputs: vec![] },
            motors,
        }
    }

    #[test]
    fn builds_pmac_axis_with_letter() {
        let full = full_config(vec![motor_config("omega", Some('X'), MotorClass::PmacAxis, None)]);
        let table = build_motor_table(&full).unwrap();
        let idx = table.index_of_name("omega").unwrap();
        let m = table.lock(idx);
        assert!(matches!(m.kind, MotorKind::PmacServoOrStepper { axis_letter: Some(AxisLetter::X) }));
    }

    #[test]
    fn dac_motor_without_m_variable_fails() {
        let full = full_config(vec![motor_config("zoom", None, MotorClass::Dac, None)]);
        assert!(build_motor_table(&full).is_err());
    }

    #[test]
    fn binary_output_carries_m_variable() {
        let full = full_config(vec![motor_config("frontlight", None, MotorClass::BinaryOutput, Some("M1200"))]);
        let table = build_motor_table(&full).unwrap();
        let idx = table.index_of_name("frontlight").unwrap();
        let m = table.lock(idx);
        assert!(matches!(&m.kind, MotorKind::BinaryOutput { m_variable } if m_variable == "M1200"));
    }

    #[test]
    fn fast_shutter_gets_fixed_m_variables() {
        let full = full_config(vec![motor_config("fastshutter", None, MotorClass::FastShutter, None)]);
        let table = build_motor_table(&full).unwrap();
        let idx = table.index_of_name("fastshutter").unwrap();
        let m = table.lock(idx);
        assert!(matches!(&m.kind, MotorKind::FastShutter { scan_enable_var, .. } if scan_enable_var == "M1124"));
    }
}
