//! Central supervisor: loads configuration, builds every shared handle, and
//! spawns every dedicated thread the thread table in the design calls for,
//! then blocks the calling thread until a shutdown signal lands.

use crate::{build, dry_run, kv_wire, presets, signals, status_publisher};
use md2_common::config::{load_config_dir, KvConfig};
use md2_common::error::DaemonError;
use md2_events::{EventBus, LogEntry, LogSink, LogSinkHandle, TimerService};
use md2_exec::Executor;
use md2_kv::KvHandle;
use md2_link::PmacLink;
use md2_model::{CsMotionMask, OmegaZeroSearch};
use md2_motion::{MotionOrchestrator, PresetSource};
use md2_raster::{RasterWorker, RedisListBackend};
use md2_sql::SqlGateway;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct DaemonOptions {
    pub config_dir: PathBuf,
    pub dry_run: bool,
}

/// Writes drained log entries back into the KV store under a fixed tail
/// key, the production counterpart `LogSinkHandle::spawn_worker` expects in
/// place of the TUI surface this daemon has no terminal to host.
struct KvLogSink {
    kv: Arc<dyn KvHandle>,
    key: String,
}

impl LogSink for KvLogSink {
    fn write_entry(&self, entry: &LogEntry) {
        if let Err(e) = self.kv.setstr(&self.key, &entry.message) {
            tracing::warn!("failed to publish log tail: {e}");
        }
    }
}

pub fn run(options: DaemonOptions) -> Result<(), DaemonError> {
    let full = load_config_dir(&options.config_dir)?;
    let prefix = full.daemon.kv.key_prefix.clone();

    let bus = EventBus::new();
    let motors = Arc::new(build::build_motor_table(&full)?);
    let binary_inputs = Arc::new(build::build_binary_input_table(&full));
    let cs_mask = Arc::new(CsMotionMask::new());
    let omega_zero = Arc::new(OmegaZeroSearch::new());

    let link_addr = if options.dry_run {
        dry_run::spawn().map_err(|e| DaemonError::StartupFailed {
            component: "dry-run PMAC stub",
            reason: e.to_string(),
        })?
    } else {
        format!("{}:{}", full.daemon.link.host, full.daemon.link.port)
    };
    let link = PmacLink::new(
        link_addr,
        Arc::clone(&bus),
        Arc::clone(&motors),
        Arc::clone(&binary_inputs),
        Arc::clone(&cs_mask),
        Arc::clone(&omega_zero),
    );

    let kv = kv_wire::spawn(&full.daemon.kv, Arc::clone(&bus))?;

    let log_sink = LogSinkHandle::new(&full.daemon.log.ignore_pattern, r"^Coordsys").map_err(|e| DaemonError::StartupFailed {
        component: "log sink",
        reason: e.to_string(),
    })?;
    log_sink.forward_events(&bus).map_err(|e| DaemonError::StartupFailed {
        component: "log sink",
        reason: e.to_string(),
    })?;

    let sql = if options.dry_run {
        None
    } else {
        Some(SqlGateway::new(
            full.daemon.sql.dsn.clone(),
            full.daemon.sql.pmac_channel.clone(),
            full.daemon.sql.action_channel.clone(),
            Arc::clone(&bus),
        ))
    };

    let timer = TimerService::new(Arc::clone(&bus));

    let preset_source: Arc<dyn PresetSource> = Arc::new(presets::KvPresetSource::new(Arc::clone(&kv)));
    let orchestrator = MotionOrchestrator::new(Arc::clone(&link), Arc::clone(&motors), Arc::clone(&cs_mask), Arc::clone(&bus), preset_source);

    let executor = Executor::new(
        Arc::clone(&link),
        Arc::clone(&motors),
        Arc::clone(&binary_inputs),
        Arc::clone(&bus),
        Arc::clone(&orchestrator),
        Arc::clone(&kv),
        sql.clone(),
        Arc::clone(&omega_zero),
    );
    wire_abort_hook(&bus, &kv, &prefix, &executor);

    let status_publisher = status_publisher::StatusPublisher::new(Arc::clone(&motors), Arc::clone(&kv), prefix.clone());

    let raster = match &sql {
        Some(gateway) => Some(build_raster_worker(&full.daemon.kv, Arc::clone(gateway))?),
        None => None,
    };
    if let Some((mailbox, _, _)) = &raster {
        wire_raster_trigger(&bus, &kv, &prefix, Arc::clone(mailbox));
    }

    signals::install();

    let mut handles = Vec::new();
    handles.push(bus.spawn_worker());
    handles.push(link.spawn_worker());
    handles.push(timer.spawn_worker());
    handles.push(executor.spawn_worker());
    handles.push(status_publisher.spawn_worker());
    handles.push(log_sink.spawn_worker(Arc::new(KvLogSink { kv: Arc::clone(&kv), key: format!("{prefix}log.tail") })));
    if let Some(gateway) = &sql {
        handles.push(gateway.spawn_worker());
    }
    let raster_shutdown = raster.as_ref().map(|(_, shutdown, _)| Arc::clone(shutdown));
    if let Some((_, _, join)) = raster {
        handles.push(join);
    }

    while !signals::shutdown_requested() {
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("shutdown requested, stopping every subsystem");
    executor.request_shutdown();
    link.request_shutdown();
    timer.shutdown();
    log_sink.shutdown();
    status_publisher.request_shutdown();
    if let Some(gateway) = &sql {
        gateway.request_shutdown();
    }
    if let Some(shutdown) = &raster_shutdown {
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    }
    bus.close();

    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

fn wire_abort_hook(bus: &Arc<EventBus>, kv: &Arc<dyn KvHandle>, prefix: &str, executor: &Arc<Executor>) {
    let kv = Arc::clone(kv);
    let key = format!("{prefix}abort");
    let executor = Arc::clone(executor);
    let _ = bus.add_listener("^abort Valid$", move |_| {
        if kv.getstr(&key).as_deref() == Some("1") {
            executor.request_abort();
        }
    });
}

/// The raster step-list key a client posts to when it queues a new scan;
/// mirrors the same KV-notification-to-event relay the rest of the daemon
/// uses to pull SQL-side state into the Rust process, since
/// `SqlGateway::handle_notification`'s own enqueued queries carry no
/// `.with_callback()` and so never surface their results here.
const RASTER_PENDING_KEY: &str = "raster.pending";

fn wire_raster_trigger(bus: &Arc<EventBus>, kv: &Arc<dyn KvHandle>, prefix: &str, mailbox: Arc<md2_raster::RasterMailbox>) {
    let kv = Arc::clone(kv);
    let key = format!("{prefix}{RASTER_PENDING_KEY}");
    let pattern = format!("^{} Valid$", regex::escape(RASTER_PENDING_KEY));
    let _ = bus.add_listener(&pattern, move |_| {
        if let Some(list_key) = kv.getstr(&key) {
            mailbox.post(list_key);
        }
    });
}

type RasterHandles = (Arc<md2_raster::RasterMailbox>, Arc<std::sync::atomic::AtomicBool>, std::thread::JoinHandle<()>);

fn build_raster_worker(kv_config: &KvConfig, gateway: Arc<SqlGateway>) -> Result<RasterHandles, DaemonError> {
    let backend = RedisListBackend::connect(&kv_config.local_addr).map_err(|e| DaemonError::StartupFailed {
        component: "raster worker",
        reason: e.to_string(),
    })?;
    let worker = RasterWorker::new(backend, gateway);
    let mailbox = worker.mailbox();
    let shutdown = worker.shutdown_handle();
    Ok((mailbox, shutdown, worker.spawn_worker()))
}
