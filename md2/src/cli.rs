//! Command-line surface: config directory, log level override, and the
//! dry-run flag that substitutes a loopback PMAC stub for the live link.

use clap::{Parser, ValueEnum};
use md2_common::config::LogLevel;
use std::path::PathBuf;

/// CLI-facing mirror of [`LogLevel`] — `clap::ValueEnum` can't be derived on
/// a type defined in another crate.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for LogLevel {
    fn from(value: LogLevelArg) -> Self {
        match value {
            LogLevelArg::Trace => LogLevel::Trace,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Error => LogLevel::Error,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "md2", about = "MD2 diffractometer control-plane daemon")]
pub struct Cli {
    /// Directory containing daemon.toml, machine.toml, and motor_NN_*.toml.
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    /// Override the log level configured in daemon.toml.
    #[arg(long)]
    pub log_level: Option<LogLevelArg>,

    /// Start every subsystem except the live PMAC TCP connection, substituting
    /// an in-process loopback stub that acks every request.
    #[arg(long)]
    pub dry_run: bool,
}
