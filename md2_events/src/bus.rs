//! Named events with regex-subscribed callbacks over a bounded FIFO.
//!
//! `send` blocks the producer when the queue is full rather than dropping
//! the event: every event send is eventually delivered to every listener
//! whose regex matches. One worker thread drains the queue and fires
//! callbacks; the event-name → listener-id lookup is built once per
//! distinct event name and cached, growing the hash table on first
//! observation of a new name.

use md2_common::consts::EVENT_QUEUE_LEN;
use parking_lot::{Condvar, Mutex};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Opaque handle returned by [`EventBus::add_listener`].
pub type ListenerId = u64;

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

struct Registry {
    /// Listener ids in registration-reverse order (index 0 = newest).
    order: Vec<ListenerId>,
    entries: HashMap<ListenerId, (Regex, Callback)>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

struct Queue {
    items: VecDeque<String>,
    closed: bool,
}

/// The event bus: bounded queue, regex-subscribed listeners, one worker
/// thread.
pub struct EventBus {
    queue: Mutex<Queue>,
    not_empty: Condvar,
    not_full: Condvar,
    registry: Mutex<Registry>,
    /// Cache of event name → matching listener ids, built at first
    /// observation of that name.
    cache: Mutex<HashMap<String, Vec<ListenerId>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(EventBus {
            queue: Mutex::new(Queue {
                items: VecDeque::with_capacity(EVENT_QUEUE_LEN),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            registry: Mutex::new(Registry::new()),
            cache: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a listener whose callback fires for every event name
    /// matching `pattern`. Prepends to the registration order so newly
    /// added listeners fire first for any event observed from now on.
    pub fn add_listener<F>(&self, pattern: &str, callback: F) -> Result<ListenerId, regex::Error>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let regex = Regex::new(pattern)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.lock();
        registry.order.insert(0, id);
        registry.entries.insert(id, (regex, Arc::new(callback)));
        Ok(id)
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut registry = self.registry.lock();
        registry.order.retain(|&x| x != id);
        registry.entries.remove(&id);
        // Any cached match lists containing this id go stale; simplest
        // correct fix is to drop the whole cache, rebuilding lazily.
        self.cache.lock().clear();
    }

    /// Copy `name` onto the bounded ring; blocks if the queue is full.
    pub fn send(&self, name: impl Into<String>) {
        let name = name.into();
        let mut queue = self.queue.lock();
        while queue.items.len() >= EVENT_QUEUE_LEN && !queue.closed {
            self.not_full.wait(&mut queue);
        }
        if queue.closed {
            return;
        }
        queue.items.push_back(name);
        self.not_empty.notify_one();
    }

    /// Stop the worker thread; any blocked `send` callers are released.
    pub fn close(&self) {
        let mut queue = self.queue.lock();
        queue.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Spawn the worker thread that dequeues events in send order and
    /// dispatches matching listeners, newest-registered first.
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        std::thread::Builder::new()
            .name("md2-event-bus".into())
            .spawn(move || bus.worker_loop())
            .expect("failed to spawn event bus worker thread")
    }

    fn worker_loop(&self) {
        loop {
            let name = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(name) = queue.items.pop_front() {
                        self.not_full.notify_one();
                        break Some(name);
                    }
                    if queue.closed {
                        break None;
                    }
                    self.not_empty.wait(&mut queue);
                }
            };
            let Some(name) = name else {
                return;
            };
            self.dispatch(&name);
        }
    }

    fn matching_ids(&self, name: &str) -> Vec<ListenerId> {
        if let Some(ids) = self.cache.lock().get(name) {
            return ids.clone();
        }
        let registry = self.registry.lock();
        let ids: Vec<ListenerId> = registry
            .order
            .iter()
            .copied()
            .filter(|id| {
                registry
                    .entries
                    .get(id)
                    .map(|(re, _)| re.is_match(name))
                    .unwrap_or(false)
            })
            .collect();
        drop(registry);
        self.cache.lock().insert(name.to_string(), ids.clone());
        ids
    }

    fn dispatch(&self, name: &str) {
        let ids = self.matching_ids(name);
        let registry = self.registry.lock();
        for id in ids {
            if let Some((_, cb)) = registry.entries.get(&id) {
                cb(name);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        panic!("use EventBus::new() — the bus is always shared behind Arc");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn delivers_to_matching_listeners_in_reverse_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        bus.add_listener(r"^omega .*", move |name| o1.lock().push(("first", name.to_string())))
            .unwrap();
        let o2 = Arc::clone(&order);
        bus.add_listener(r"^omega .*", move |name| o2.lock().push(("second", name.to_string())))
            .unwrap();

        bus.spawn_worker();
        bus.send("omega Moving");
        // Poll for delivery instead of a fixed sleep.
        for _ in 0..200 {
            if order.lock().len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        bus.close();

        let captured = order.lock().clone();
        assert_eq!(captured, vec![
            ("second", "omega Moving".to_string()),
            ("first", "omega Moving".to_string()),
        ]);
    }

    #[test]
    fn non_matching_listener_is_skipped() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.add_listener(r"^scint .*", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        bus.spawn_worker();
        bus.send("omega Moving");
        std::thread::sleep(Duration::from_millis(50));
        bus.close();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
