//! Filtered, bounded-queue, fire-and-forget log sink.
//!
//! `log_message` always emits a `tracing` line (this is how the daemon's own
//! developers observe it running); it then filters
//! against an ignore regex (heartbeats, high-frequency control-variable
//! writes) and, if not ignored, pushes onto a fixed-capacity circular queue,
//! overwriting the oldest entry when full. A worker thread drains the queue
//! to whatever external sink is registered — the ncurses TUI and the
//! KV-published log channel are both out of scope and represented here
//! only by the [`LogSink`] trait the binary wires up.

use crate::bus::EventBus;
use md2_common::consts::LOG_QUEUE_LEN;
use parking_lot::{Condvar, Mutex};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// One captured log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub message: String,
}

/// External destination for drained log entries (TUI surface, KV-published
/// log channel). Both concrete implementations live outside this crate;
/// `md2` wires a KV-backed one in production and tests use a channel-backed
/// in-memory one.
pub trait LogSink: Send + Sync {
    fn write_entry(&self, entry: &LogEntry);
}

/// A `LogSink` that discards everything, used when no external surface is
/// configured (e.g. `--dry-run`).
pub struct NullSink;

impl LogSink for NullSink {
    fn write_entry(&self, _entry: &LogEntry) {}
}

struct Queue {
    entries: VecDeque<LogEntry>,
    shutdown: bool,
}

/// The bounded circular log queue plus its worker thread.
pub struct LogSinkHandle {
    queue: Mutex<Queue>,
    not_empty: Condvar,
    ignore: Regex,
    /// Hard-coded blacklist for the event-bus-forwarding listener.
    event_blacklist: Regex,
}

impl LogSinkHandle {
    /// `ignore_pattern` matches messages that should never reach the
    /// queue (still traced, just not retained/published) — e.g. status-poll
    /// heartbeats. `event_blacklist_pattern` matches event names the
    /// `EVENT:`-prefix forwarder should not log.
    pub fn new(ignore_pattern: &str, event_blacklist_pattern: &str) -> Result<Arc<Self>, regex::Error> {
        Ok(Arc::new(LogSinkHandle {
            queue: Mutex::new(Queue {
                entries: VecDeque::with_capacity(LOG_QUEUE_LEN),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            ignore: Regex::new(ignore_pattern)?,
            event_blacklist: Regex::new(event_blacklist_pattern)?,
        }))
    }

    /// Log a message: always traced, conditionally queued.
    pub fn log_message(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "md2::log_sink", "{message}");
        if self.ignore.is_match(&message) {
            return;
        }
        let mut queue = self.queue.lock();
        if queue.entries.len() >= LOG_QUEUE_LEN {
            queue.entries.pop_front();
        }
        queue.entries.push_back(LogEntry {
            timestamp: SystemTime::now(),
            message,
        });
        self.not_empty.notify_one();
    }

    /// Register a listener on `bus` that forwards most events into the log
    /// with an `EVENT:` prefix, skipping the blacklist.
    pub fn forward_events(self: &Arc<Self>, bus: &Arc<EventBus>) -> Result<(), regex::Error> {
        let sink = Arc::clone(self);
        bus.add_listener(".*", move |name| {
            if sink.event_blacklist.is_match(name) {
                return;
            }
            sink.log_message(format!("EVENT: {name}"));
        })?;
        Ok(())
    }

    pub fn shutdown(&self) {
        let mut queue = self.queue.lock();
        queue.shutdown = true;
        self.not_empty.notify_all();
    }

    /// Spawn the worker thread draining entries to `sink` in arrival order.
    pub fn spawn_worker(self: &Arc<Self>, sink: Arc<dyn LogSink>) -> JoinHandle<()> {
        let handle = Arc::clone(self);
        std::thread::Builder::new()
            .name("md2-log-sink".into())
            .spawn(move || handle.worker_loop(sink))
            .expect("failed to spawn log sink worker thread")
    }

    fn worker_loop(&self, sink: Arc<dyn LogSink>) {
        loop {
            let entry = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(entry) = queue.entries.pop_front() {
                        break Some(entry);
                    }
                    if queue.shutdown {
                        break None;
                    }
                    let timed_out = self
                        .not_empty
                        .wait_for(&mut queue, Duration::from_millis(500))
                        .timed_out();
                    if timed_out && queue.shutdown {
                        return;
                    }
                }
            };
            let Some(entry) = entry else {
                return;
            };
            sink.write_entry(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CollectingSink {
        count: Arc<AtomicUsize>,
    }

    impl LogSink for CollectingSink {
        fn write_entry(&self, _entry: &LogEntry) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn ignored_messages_never_reach_the_queue() {
        let handle = LogSinkHandle::new(r"^heartbeat", r"^$").unwrap();
        handle.log_message("heartbeat omega");
        handle.log_message("omega In Position");
        assert_eq!(handle.queue.lock().entries.len(), 1);
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let handle = LogSinkHandle::new(r"^$", r"^$").unwrap();
        for i in 0..(LOG_QUEUE_LEN + 10) {
            handle.log_message(format!("line {i}"));
        }
        let queue = handle.queue.lock();
        assert_eq!(queue.entries.len(), LOG_QUEUE_LEN);
        assert_eq!(queue.entries.front().unwrap().message, "line 10");
    }

    #[test]
    fn worker_drains_to_sink() {
        let handle = LogSinkHandle::new(r"^$", r"^$").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(CollectingSink { count: Arc::clone(&count) });
        handle.spawn_worker(sink);

        handle.log_message("a");
        handle.log_message("b");

        for _ in 0..200 {
            if count.load(Ordering::SeqCst) == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn event_forwarder_skips_blacklist() {
        let handle = LogSinkHandle::new(r"^$", r"^Coordsys").unwrap();
        let bus = EventBus::new();
        bus.spawn_worker();
        handle.forward_events(&bus).unwrap();

        bus.send("Coordsys 1 Stopped");
        bus.send("omega In Position");
        std::thread::sleep(Duration::from_millis(100));
        bus.close();

        let queue = handle.queue.lock();
        assert_eq!(queue.entries.len(), 1);
        assert_eq!(queue.entries[0].message, "EVENT: omega In Position");
    }
}
