//! One-shot and repeating named alarms that emit events when due.
//!
//! The original daemon uses `timer_create`/`SIGRTMIN` and masks the wake
//! signal while servicing a pass so the handler never reenters itself
//! holding the lock. The idiomatic Rust substitute is a single
//! `Condvar::wait_timeout` to the next deadline; "don't re-lock from inside
//! the fired callback" becomes "the scheduling thread releases the pool
//! lock before calling `EventBus::send`".

use crate::bus::EventBus;
use md2_common::consts::{TIMER_POOL_LEN, TIMER_RESOLUTION};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// `shots_remaining` sentinel meaning "fire forever".
pub const FOREVER: i64 = -1;

#[derive(Debug, Clone)]
struct TimerEntry {
    name: String,
    shots_remaining: i64,
    period: Duration,
    next_fire: Instant,
    call_count: u64,
}

struct Pool {
    entries: Vec<TimerEntry>,
    shutdown: bool,
}

/// Fixed-pool timer service; one scheduling thread per [`TimerService`].
pub struct TimerService {
    pool: Mutex<Pool>,
    wake: Condvar,
    bus: Arc<EventBus>,
}

impl TimerService {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(TimerService {
            pool: Mutex::new(Pool {
                entries: Vec::with_capacity(TIMER_POOL_LEN),
                shutdown: false,
            }),
            wake: Condvar::new(),
            bus,
        })
    }

    /// Schedule `name` to fire after `delay`, repeating every `delay` for
    /// `shots` total firings (`shots = -1` means forever). Overwrites any
    /// existing entries of the same name only if the pool is at capacity and
    /// no free slot remains — matching the fixed-pool semantics, new entries
    /// with the same name coexist otherwise (the caller is responsible for
    /// `unset` first if that isn't wanted).
    pub fn set(&self, name: impl Into<String>, shots: i64, delay: Duration) {
        let mut pool = self.pool.lock();
        if pool.entries.len() >= TIMER_POOL_LEN {
            tracing::warn!("timer pool full, dropping set({})", name.into());
            return;
        }
        pool.entries.push(TimerEntry {
            name: name.into(),
            shots_remaining: shots,
            period: delay,
            next_fire: Instant::now() + delay,
            call_count: 0,
        });
        drop(pool);
        self.wake.notify_one();
    }

    /// Clear every entry with this name.
    pub fn unset(&self, name: &str) {
        let mut pool = self.pool.lock();
        pool.entries.retain(|e| e.name != name);
    }

    pub fn shutdown(&self) {
        let mut pool = self.pool.lock();
        pool.shutdown = true;
        drop(pool);
        self.wake.notify_all();
    }

    /// Spawn the scheduling thread.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let svc = Arc::clone(self);
        std::thread::Builder::new()
            .name("md2-timer".into())
            .spawn(move || svc.scheduling_loop())
            .expect("failed to spawn timer scheduling thread")
    }

    fn scheduling_loop(&self) {
        loop {
            let due = {
                let mut pool = self.pool.lock();
                if pool.shutdown {
                    return;
                }
                loop {
                    let now = Instant::now();
                    let next_deadline = pool.entries.iter().map(|e| e.next_fire).min();

                    match next_deadline {
                        None => {
                            self.wake.wait(&mut pool);
                            if pool.shutdown {
                                return;
                            }
                            continue;
                        }
                        Some(deadline) if deadline <= now + TIMER_RESOLUTION => {
                            // Collect every entry within the resolution window and
                            // advance/retire it before releasing the lock.
                            let mut fired = Vec::new();
                            for entry in &mut pool.entries {
                                if entry.next_fire <= now + TIMER_RESOLUTION {
                                    entry.call_count += 1;
                                    fired.push(entry.name.clone());
                                    if entry.shots_remaining > 0 {
                                        entry.shots_remaining -= 1;
                                    }
                                    entry.next_fire = now + entry.period;
                                }
                            }
                            pool.entries.retain(|e| e.shots_remaining != 0);
                            break fired;
                        }
                        Some(deadline) => {
                            let timeout = deadline.saturating_duration_since(now);
                            let result = self.wake.wait_for(&mut pool, timeout);
                            if pool.shutdown {
                                return;
                            }
                            if result.timed_out() {
                                continue;
                            }
                            continue;
                        }
                    }
                }
            };

            for name in due {
                self.bus.send(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn one_shot_fires_once() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));
        let s = Arc::clone(&seen);
        bus.add_listener("^tick$", move |_| *s.lock() += 1).unwrap();
        bus.spawn_worker();

        let timer = TimerService::new(Arc::clone(&bus));
        timer.spawn_worker();
        timer.set("tick", 1, Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(200));
        timer.shutdown();
        bus.close();

        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn unset_clears_pending_entry() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));
        let s = Arc::clone(&seen);
        bus.add_listener("^tick$", move |_| *s.lock() += 1).unwrap();
        bus.spawn_worker();

        let timer = TimerService::new(Arc::clone(&bus));
        timer.spawn_worker();
        timer.set("tick", FOREVER, Duration::from_millis(500));
        timer.unset("tick");

        std::thread::sleep(Duration::from_millis(700));
        timer.shutdown();
        bus.close();

        assert_eq!(*seen.lock(), 0);
    }
}
