//! MD2 diffractometer control-plane daemon entry point.

mod build;
mod cli;
mod daemon;
mod dry_run;
mod kv_wire;
mod presets;
mod signals;
mod status_publisher;

use clap::Parser;
use cli::Cli;
use md2_common::config::LogLevel;
use md2_common::error::DaemonError;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), DaemonError> {
    let cli = Cli::parse();

    let level = cli.log_level.map(LogLevel::from).unwrap_or(LogLevel::Info);
    setup_tracing(level);

    daemon::run(daemon::DaemonOptions {
        config_dir: cli.config_dir,
        dry_run: cli.dry_run,
    })
}

fn setup_tracing(level: LogLevel) {
    let directive = match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}
