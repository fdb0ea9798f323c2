//! The KV-mirror thread: its own single-threaded `tokio` runtime, exactly
//! the shape `md2_sql::SqlGateway::spawn_worker` uses for the Postgres
//! connection — one OS thread, `Builder::new_current_thread`, `block_on`
//! drives the whole thread's lifetime.
//!
//! Connects a read/pub-sub backend to the local store and a write backend
//! to the authoritative remote store, subscribes to both the write-through
//! publish channel and the UI-originated channel on one pub/sub stream, and
//! hands a `BlockingKv`-backed `Arc<dyn KvHandle>` back to the caller's
//! thread over a one-shot channel before settling into the pub/sub loop.

use md2_common::config::KvConfig;
use md2_common::error::DaemonError;
use md2_events::EventBus;
use md2_kv::redis_backend::{RedisBackend, RedisPubSub};
use md2_kv::{BlockingKv, KvHandle, KvMirror};
use std::sync::Arc;

pub fn spawn(config: &KvConfig, bus: Arc<EventBus>) -> Result<Arc<dyn KvHandle>, DaemonError> {
    let config = config.clone();
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::Builder::new()
        .name("md2-kv-mirror".into())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build KV mirror runtime");

            rt.block_on(async move {
                let outcome = connect(&config, bus).await;
                let (mirror, pubsub) = match outcome {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };

                let handle = tokio::runtime::Handle::current();
                let kv: Arc<dyn KvHandle> = Arc::new(BlockingKv::new(handle, Arc::clone(&mirror)));
                if tx.send(Ok(kv)).is_err() {
                    return;
                }
                mirror.run_pubsub_loop(pubsub).await;
            });
        })
        .expect("failed to spawn KV mirror thread");

    rx.recv()
        .map_err(|_| DaemonError::StartupFailed {
            component: "kv mirror",
            reason: "mirror thread exited before reporting readiness".to_string(),
        })?
        .map_err(|e: md2_kv::KvError| DaemonError::StartupFailed {
            component: "kv mirror",
            reason: e.to_string(),
        })
}

type ConnectResult = Result<(Arc<KvMirror<RedisBackend, RedisBackend>>, RedisPubSub), md2_kv::KvError>;

async fn connect(config: &KvConfig, bus: Arc<EventBus>) -> ConnectResult {
    let read = RedisBackend::connect(&config.local_addr).await?;
    let write = RedisBackend::connect(&config.remote_addr).await?;
    let pubsub = RedisPubSub::subscribe(&config.local_addr, &[&config.publish_channel, &config.ui_channel]).await?;
    let mirror = KvMirror::new(
        read,
        write,
        config.key_prefix.clone(),
        &config.mirror_filter,
        config.publish_channel.clone(),
        "md2-daemon",
        bus,
    )?;
    Ok((mirror, pubsub))
}
