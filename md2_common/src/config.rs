//! Configuration loading for the `md2` workspace.
//!
//! A top-level `daemon.toml`,
//! a `machine.toml`, and auto-discovered per-motor files
//! `motor_NN_<name>.toml`, all parsed with `#[serde(deny_unknown_fields)]`
//! and validated before being handed to the rest of the daemon.
//!
//! ```rust,no_run
//! use md2_common::config::{load_config_dir, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let full = load_config_dir(Path::new("config"))?;
//!     println!("motors: {}", full.motors.len());
//!     Ok(())
//! }
//! ```

use crate::consts::MAX_MOTORS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Log level for the daemon's `tracing` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("configuration file not found")]
    FileNotFound,

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("duplicate motor id: {0}")]
    DuplicateMotorId(u8),

    #[error("motor id mismatch in {file}: expected {expected}, found {found}")]
    MotorIdMismatch {
        file: String,
        expected: u8,
        found: u8,
    },

    #[error("no motor files found in config directory")]
    NoMotorsDefined,
}

/// Trait providing a default `load()` over any `DeserializeOwned` type,
/// parsed strictly against the file's TOML contents.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        load_toml_file(path)
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── daemon.toml ───────────────────────────────────────────────────

/// PMAC link endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
}

/// KV mirror connection + naming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KvConfig {
    /// Address of the local read/pub-sub store.
    pub local_addr: String,
    /// Address of the authoritative remote store used for writes.
    pub remote_addr: String,
    /// Key prefix ("head") every mirrored key begins with.
    pub key_prefix: String,
    /// Regex filtering which remote keys we mirror.
    pub mirror_filter: String,
    /// Pub/sub channel carrying key-change notifications.
    pub publish_channel: String,
    /// Additional channel the daemon subscribes to for UI-originated events.
    pub ui_channel: String,
}

/// SQL gateway connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlConfig {
    /// Postgres connection string.
    pub dsn: String,
    /// LISTEN channel name matching `*_pmac` (drains queued controller commands).
    pub pmac_channel: String,
    /// Generic LISTEN channel (drives `nextaction()`).
    pub action_channel: String,
}

fn default_log_ignore() -> String {
    String::new()
}

/// Logging/log-sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    /// Regex of messages the log sink ignores (heartbeats, high-frequency writes).
    #[serde(default = "default_log_ignore")]
    pub ignore_pattern: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            ignore_pattern: default_log_ignore(),
        }
    }
}

/// Top-level daemon configuration, loaded from `daemon.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    pub link: LinkConfig,
    pub kv: KvConfig,
    pub sql: SqlConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// ─── machine.toml ──────────────────────────────────────────────────

/// Machine identity section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineIdentity {
    pub name: String,
}

/// One row of the static binary-input table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinaryInputConfig {
    pub name: String,
    /// Bit index into the relevant status-block word.
    pub bit_index: u8,
    /// Mask applied before testing the bit.
    pub mask: u32,
    pub rising_event: String,
    pub falling_event: String,
}

/// Machine-wide configuration, loaded from `machine.toml`. Motors themselves
/// are auto-discovered from `motor_NN_*.toml` files, following the same
/// NN-prefix auto-discovery convention used across the workspace's configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    pub machine: MachineIdentity,
    #[serde(default)]
    pub binary_inputs: Vec<BinaryInputConfig>,
}

// ─── motor_NN_<name>.toml ──────────────────────────────────────────

/// Motor classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorClass {
    PmacAxis,
    Dac,
    BinaryOutput,
    FastShutter,
    Soft,
}

/// Motor identity section (`[motor]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotorIdentity {
    /// Must match the NN prefix in the filename.
    pub id: u8,
    pub name: String,
    /// Controller axis number (ignored for DAC/binary-output/soft motors).
    #[serde(default)]
    pub axis_number: Option<u16>,
    /// Coordinate-system number 1..16, if this motor participates in one.
    #[serde(default)]
    pub coordinate_system: Option<u8>,
    /// In-system axis letter (X/Y/Z/U/V/W/A/B/C), if any.
    #[serde(default)]
    pub axis_letter: Option<char>,
    pub class: MotorClass,
    /// ASCII-mailbox line dispatched once the status reader observes
    /// open-loop after this motor starts homing. Most motors have none.
    #[serde(default)]
    pub homing_script: Option<String>,
    /// `M`-variable this motor's `moveAbs` writes, for `dac`/`binary_output`
    /// classes. Unused (and ignored) for every other class.
    #[serde(default)]
    pub m_variable: Option<String>,
}

/// Calibration section (`[calibration]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationConfig {
    pub counts_per_unit: f64,
    #[serde(default)]
    pub neutral_offset: f64,
    pub unit: String,
    #[serde(default = "default_print_format")]
    pub print_format: String,
    #[serde(default = "default_precision")]
    pub precision: u8,
}

fn default_print_format() -> String {
    "%.3f".to_string()
}
fn default_precision() -> u8 {
    3
}

/// Limits section (`[limits]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    pub min_position: f64,
    pub max_position: f64,
}

/// Motion-policy section (`[motion]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotionPolicyConfig {
    pub max_velocity: f64,
    pub max_acceleration: f64,
    /// In-position band, 1/16-count units.
    pub in_position_band: i64,
    #[serde(default)]
    pub update_resolution: f64,
    /// Glitch-filter threshold in counts.
    #[serde(default = "default_glitch_threshold")]
    pub glitch_threshold_counts: i64,
}

fn default_glitch_threshold() -> i64 {
    1000
}

/// One breakpoint of a piecewise-linear lookup table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LookupPoint {
    pub counts: f64,
    pub value: f64,
}

/// Per-motor configuration loaded from `motor_NN_<name>.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotorConfig {
    pub motor: MotorIdentity,
    pub calibration: CalibrationConfig,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub motion: Option<MotionPolicyConfig>,
    /// Strictly monotone piecewise-linear table, if this motor is non-linear
    /// (zoom, light intensity, piezo).
    #[serde(default)]
    pub lookup_table: Option<Vec<LookupPoint>>,
}

// ─── FullConfig ────────────────────────────────────────────────────

/// Aggregated configuration returned by [`load_config_dir`].
#[derive(Debug, Clone)]
pub struct FullConfig {
    pub daemon: DaemonConfig,
    pub machine: MachineConfig,
    pub motors: Vec<MotorConfig>,
}

/// Load `daemon.toml`, `machine.toml`, and auto-discover `motor_NN_*.toml`
/// from `path`, validating cross-file consistency and numeric bounds.
pub fn load_config_dir(path: &Path) -> Result<FullConfig, ConfigError> {
    let daemon: DaemonConfig = load_toml_file(&path.join("daemon.toml"))?;

    let machine: MachineConfig = load_toml_file(&path.join("machine.toml"))?;
    if machine.binary_inputs.len() > crate::consts::MAX_BINARY_INPUTS {
        return Err(ConfigError::ValidationError(format!(
            "too many binary inputs: {} > {}",
            machine.binary_inputs.len(),
            crate::consts::MAX_BINARY_INPUTS
        )));
    }

    let motors = discover_motor_files(path)?;
    if motors.len() > MAX_MOTORS {
        return Err(ConfigError::ValidationError(format!(
            "too many motors: {} > {}",
            motors.len(),
            MAX_MOTORS
        )));
    }

    Ok(FullConfig {
        daemon,
        machine,
        motors,
    })
}

fn load_toml_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound
        } else {
            ConfigError::ParseError(format!("{}: {}", path.display(), e))
        }
    })?;

    toml::from_str(&content).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("unknown field") {
            ConfigError::UnknownField(format!("{}: {}", path.display(), msg))
        } else {
            ConfigError::ParseError(format!("{}: {}", path.display(), msg))
        }
    })
}

/// Auto-discover and load `motor_NN_*.toml` files, sorted by NN, validating
/// id consistency, duplicate detection, and numeric bounds.
pub fn discover_motor_files(dir: &Path) -> Result<Vec<MotorConfig>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        ConfigError::ParseError(format!("cannot read config directory {}: {}", dir.display(), e))
    })?;

    let mut motor_files: Vec<(u8, PathBuf, String)> = Vec::new();

    for entry in entries.flatten() {
        let fname = entry.file_name();
        let fname_str = fname.to_string_lossy();

        if !fname_str.starts_with("motor_") || !fname_str.ends_with(".toml") {
            continue;
        }

        let rest = &fname_str[6..];
        if rest.len() < 4 {
            continue;
        }

        let nn_str = &rest[..2];
        let nn: u8 = match nn_str.parse() {
            Ok(n) => n,
            Err(_) => continue,
        };

        if rest.as_bytes().get(2) != Some(&b'_') {
            continue;
        }

        motor_files.push((nn, entry.path(), fname_str.to_string()));
    }

    if motor_files.is_empty() {
        return Err(ConfigError::NoMotorsDefined);
    }

    motor_files.sort_by_key(|(nn, _, _)| *nn);

    for w in motor_files.windows(2) {
        if w[0].0 == w[1].0 {
            return Err(ConfigError::DuplicateMotorId(w[0].0));
        }
    }

    let mut motors = Vec::with_capacity(motor_files.len());
    for (nn, path, fname) in &motor_files {
        let motor: MotorConfig = load_toml_file(path)?;

        if motor.motor.id != *nn {
            return Err(ConfigError::MotorIdMismatch {
                file: fname.clone(),
                expected: *nn,
                found: motor.motor.id,
            });
        }

        validate_motor_bounds(&motor, fname)?;
        motors.push(motor);
    }

    Ok(motors)
}

/// Numeric bounds for a single motor config.
fn validate_motor_bounds(motor: &MotorConfig, fname: &str) -> Result<(), ConfigError> {
    let l = &motor.limits;
    if l.min_position >= l.max_position {
        return Err(ConfigError::ValidationError(format!(
            "{fname}: limits.min_position ({}) must be < max_position ({})",
            l.min_position, l.max_position
        )));
    }

    if motor.calibration.counts_per_unit == 0.0 {
        return Err(ConfigError::ValidationError(format!(
            "{fname}: calibration.counts_per_unit must be nonzero"
        )));
    }

    if let Some(m) = &motor.motion {
        if m.max_velocity <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "{fname}: motion.max_velocity must be > 0"
            )));
        }
        if m.max_acceleration <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "{fname}: motion.max_acceleration must be > 0"
            )));
        }
        if m.in_position_band < 0 {
            return Err(ConfigError::ValidationError(format!(
                "{fname}: motion.in_position_band must be >= 0"
            )));
        }
    }

    if matches!(motor.motor.class, MotorClass::Dac | MotorClass::BinaryOutput) && motor.motor.m_variable.is_none() {
        return Err(ConfigError::ValidationError(format!(
            "{fname}: motor.m_variable is required for dac/binary_output motors"
        )));
    }

    if let Some(table) = &motor.lookup_table {
        if table.len() < 2 {
            return Err(ConfigError::ValidationError(format!(
                "{fname}: lookup_table needs at least 2 breakpoints"
            )));
        }
        let increasing = table.windows(2).all(|w| w[0].counts < w[1].counts);
        let decreasing = table.windows(2).all(|w| w[0].counts > w[1].counts);
        if !increasing && !decreasing {
            return Err(ConfigError::ValidationError(format!(
                "{fname}: lookup_table.counts must be strictly monotone"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn log_level_default_is_info() {
        assert_eq!(default_log_level(), LogLevel::Info);
    }

    #[test]
    fn loads_full_config_dir() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "daemon.toml",
            r#"
[link]
host = "10.1.0.10"
port = 1025

[kv]
local_addr = "127.0.0.1:6379"
remote_addr = "10.1.0.2:6379"
key_prefix = "md2:"
mirror_filter = ".*"
publish_channel = "md2.events"
ui_channel = "md2.ui"

[sql]
dsn = "postgres://md2@localhost/md2"
pmac_channel = "notify_pmac"
action_channel = "notify_action"
"#,
        );
        write_file(
            dir.path(),
            "machine.toml",
            r#"
[machine]
name = "MD2-TEST"
"#,
        );
        write_file(
            dir.path(),
            "motor_01_omega.toml",
            r#"
[motor]
id = 1
name = "omega"
axis_number = 1
coordinate_system = 1
axis_letter = "X"
class = "pmac_axis"

[calibration]
counts_per_unit = 1000.0
unit = "deg"

[limits]
min_position = -720.0
max_position = 720.0

[motion]
max_velocity = 600.0
max_acceleration = 1200.0
in_position_band = 160
"#,
        );

        let full = load_config_dir(dir.path()).unwrap();
        assert_eq!(full.machine.machine.name, "MD2-TEST");
        assert_eq!(full.motors.len(), 1);
        assert_eq!(full.motors[0].motor.name, "omega");
    }

    #[test]
    fn rejects_motor_id_mismatch() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "motor_02_scint.toml",
            r#"
[motor]
id = 1
name = "scint"
class = "binary_output"

[calibration]
counts_per_unit = 1.0
unit = ""

[limits]
min_position = 0.0
max_position = 1.0
"#,
        );

        let err = discover_motor_files(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MotorIdMismatch { .. }));
    }

    #[test]
    fn rejects_non_monotone_lookup_table() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "motor_03_zoom.toml",
            r#"
[motor]
id = 3
name = "zoom"
class = "dac"
m_variable = "M1130"

[calibration]
counts_per_unit = 1.0
unit = ""

[limits]
min_position = 0.0
max_position = 10.0

[[lookup_table]]
counts = 0.0
value = 1.0

[[lookup_table]]
counts = 100.0
value = 1.0

[[lookup_table]]
counts = 50.0
value = 2.0
"#,
        );

        let err = discover_motor_files(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn rejects_dac_motor_missing_m_variable() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "motor_04_light.toml",
            r#"
[motor]
id = 4
name = "frontlight"
class = "dac"

[calibration]
counts_per_unit = 1.0
unit = ""

[limits]
min_position = 0.0
max_position = 1.0
"#,
        );

        let err = discover_motor_files(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}
