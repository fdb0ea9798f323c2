//! The KV mirror: read-through cache plus write-through publisher over a
//! generic [`KvBackend`] pair (one read/pub-sub connection to the local
//! store, one write connection to the authoritative remote store).

use crate::backend::{KvBackend, KvNotification, KvPubSub};
use crate::error::KvError;
use crate::object::KvObject;
use md2_events::EventBus;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Default wait for a freshly-created object's first `HGET` to land.
const DEFAULT_WAIT: Duration = Duration::from_secs(5);
/// Guard against a runaway preset scan if the convention is ever violated.
const MAX_PRESET_INDEX: u32 = 256;

pub struct KvMirror<R, W> {
    read: R,
    write: W,
    objects: Mutex<HashMap<String, Arc<KvObject>>>,
    /// Linear lookup order, most-recently-touched-by-pub/sub first.
    lru: Mutex<VecDeque<String>>,
    key_prefix: String,
    mirror_filter: Regex,
    publish_channel: String,
    publisher_id: String,
    bus: Arc<EventBus>,
}

impl<R, W> KvMirror<R, W>
where
    R: KvBackend + 'static,
    W: KvBackend + 'static,
{
    pub fn new(
        read: R,
        write: W,
        key_prefix: impl Into<String>,
        mirror_filter_pattern: &str,
        publish_channel: impl Into<String>,
        publisher_id: impl Into<String>,
        bus: Arc<EventBus>,
    ) -> Result<Arc<Self>, KvError> {
        Ok(Arc::new(KvMirror {
            read,
            write,
            objects: Mutex::new(HashMap::new()),
            lru: Mutex::new(VecDeque::new()),
            key_prefix: key_prefix.into(),
            mirror_filter: Regex::new(mirror_filter_pattern)?,
            publish_channel: publish_channel.into(),
            publisher_id: publisher_id.into(),
            bus,
        }))
    }

    /// Unprefixed remainder of `key`, used as the event-bus name for
    /// `Invalid`/`Valid` notifications.
    fn event_name(&self, key: &str) -> String {
        key.strip_prefix(&self.key_prefix).unwrap_or(key).to_string()
    }

    fn touch_lru(&self, key: &str) {
        let mut lru = self.lru.lock();
        if let Some(pos) = lru.iter().position(|k| k == key) {
            lru.remove(pos);
        }
        lru.push_front(key.to_string());
    }

    /// Look up or create the object for `key`. If just created, issues an
    /// asynchronous `HGET` and leaves the object invalid until it lands —
    /// callers that need the value should follow with [`KvObject::wait_valid`]
    /// (exposed directly, or via [`Self::getstr`]).
    pub async fn get_obj(&self, key: &str) -> Arc<KvObject> {
        if let Some(obj) = self.objects.lock().get(key).cloned() {
            self.touch_lru(key);
            return obj;
        }

        let obj = Arc::new(KvObject::new(key));
        self.objects.lock().insert(key.to_string(), Arc::clone(&obj));
        self.touch_lru(key);

        match self.read.hget(key).await {
            Ok(Some(value)) => obj.set_local(value),
            Ok(None) => obj.set_local(String::new()),
            Err(e) => {
                tracing::warn!("KV mirror: HGET {key} failed: {e}");
            }
        }
        obj
    }

    /// Fetch and wait for a valid string value, returning an owned copy
    /// (never a borrow into the object — the value may be replaced by a
    /// concurrent pub/sub refresh at any time).
    pub async fn getstr(&self, key: &str) -> Option<String> {
        let obj = self.get_obj(key).await;
        obj.wait_valid(DEFAULT_WAIT);
        obj.getstr().filter(|s| !s.is_empty())
    }

    pub async fn get_double(&self, key: &str) -> Option<f64> {
        let obj = self.get_obj(key).await;
        obj.wait_valid(DEFAULT_WAIT);
        obj.get_double()
    }

    pub async fn get_bool(&self, key: &str) -> Option<bool> {
        let obj = self.get_obj(key).await;
        obj.wait_valid(DEFAULT_WAIT);
        obj.get_bool()
    }

    /// Write-through: no-op if `value` already matches the current valid
    /// value, otherwise invalidate + publish `<event> Invalid`, `HSET` +
    /// `PUBLISH` on the write connection, mark this write pending via
    /// `wait_for_me`, then optimistically adopt the new value and publish
    /// `<event> Valid`.
    pub async fn setstr(&self, key: &str, value: &str) -> Result<(), KvError> {
        let obj = self.get_obj(key).await;
        if obj.is_valid() && obj.getstr().as_deref() == Some(value) {
            return Ok(());
        }

        let event = self.event_name(key);
        obj.invalidate();
        self.bus.send(format!("{event} Invalid"));

        obj.wait_for_me.fetch_add(1, Ordering::SeqCst);
        self.write
            .hset_and_publish(key, value, &self.publish_channel, &self.publisher_id)
            .await?;

        obj.set_local(value);
        self.bus.send(format!("{event} Valid"));
        Ok(())
    }

    /// Drive the pub/sub stream until it ends. Intended to run as a
    /// background task for the lifetime of the mirror.
    pub async fn run_pubsub_loop<P: KvPubSub>(&self, mut pubsub: P) {
        while let Some(note) = pubsub.next_message().await {
            if !self.mirror_filter.is_match(&note.key) {
                continue;
            }
            self.handle_notification(note).await;
        }
    }

    /// Process one pub/sub notification: our own echo decrements
    /// `wait_for_me`; someone else's write is ignored while we're still the
    /// pending source of truth, otherwise triggers a re-fetch.
    pub async fn handle_notification(&self, note: KvNotification) {
        self.touch_lru(&note.key);
        let Some(obj) = self.objects.lock().get(&note.key).cloned() else {
            return;
        };

        if note.publisher_id == self.publisher_id {
            let prev = obj.wait_for_me.fetch_sub(1, Ordering::SeqCst);
            if prev <= 0 {
                obj.wait_for_me.store(0, Ordering::SeqCst);
            }
            return;
        }

        if obj.wait_for_me.load(Ordering::SeqCst) != 0 {
            return;
        }

        obj.invalidate();
        match self.read.hget(&note.key).await {
            Ok(Some(value)) => obj.set_local(value),
            Ok(None) => obj.set_local(String::new()),
            Err(e) => tracing::warn!("KV mirror: re-fetch of {} failed: {e}", note.key),
        }
    }

    /// `find_preset(motor, name)`: scans `<motor>.presets.<n>.name` for a
    /// sibling matching `name`, returning its `<motor>.presets.<n>.position`.
    pub async fn find_preset(&self, motor: &str, name: &str) -> Result<f64, KvError> {
        for n in 0..MAX_PRESET_INDEX {
            let name_key = format!("{}{motor}.presets.{n}.name", self.key_prefix);
            match self.getstr(&name_key).await {
                None => break,
                Some(candidate) if candidate == name => {
                    let pos_key = format!("{}{motor}.presets.{n}.position", self.key_prefix);
                    return self
                        .get_double(&pos_key)
                        .await
                        .ok_or(KvError::Parse("f64"));
                }
                Some(_) => continue,
            }
        }
        Err(KvError::PresetNotFound {
            motor: motor.to_string(),
            name: name.to_string(),
        })
    }

    /// `set_preset(motor, name, pos)`: writes both fields of the first slot
    /// whose name matches, or the first empty slot if none does.
    pub async fn set_preset(&self, motor: &str, name: &str, position: f64) -> Result<(), KvError> {
        let mut slot = None;
        for n in 0..MAX_PRESET_INDEX {
            let name_key = format!("{}{motor}.presets.{n}.name", self.key_prefix);
            match self.getstr(&name_key).await {
                None => {
                    slot = Some(n);
                    break;
                }
                Some(candidate) if candidate == name => {
                    slot = Some(n);
                    break;
                }
                Some(_) => continue,
            }
        }
        let n = slot.unwrap_or(0);
        let name_key = format!("{}{motor}.presets.{n}.name", self.key_prefix);
        let pos_key = format!("{}{motor}.presets.{n}.position", self.key_prefix);
        self.setstr(&name_key, name).await?;
        self.setstr(&pos_key, &position.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockStore;

    fn bus() -> Arc<EventBus> {
        let bus = EventBus::new();
        bus.spawn_worker();
        bus
    }

    fn mirror(store: &MockStore) -> Arc<KvMirror<crate::backend::mock::MockBackend, crate::backend::mock::MockBackend>> {
        KvMirror::new(store.backend(), store.backend(), "md2:", ".*", "md2.events", "daemon-1", bus()).unwrap()
    }

    #[tokio::test]
    async fn get_obj_fetches_and_caches() {
        let store = MockStore::new();
        store.seed("md2:omega.position", "12.5");
        let mirror = mirror(&store);

        assert_eq!(mirror.getstr("md2:omega.position").await, Some("12.5".to_string()));
        assert_eq!(mirror.get_double("md2:omega.position").await, Some(12.5));
    }

    #[tokio::test]
    async fn setstr_is_noop_when_value_unchanged() {
        let store = MockStore::new();
        let mirror = mirror(&store);
        mirror.setstr("md2:scint.position", "0").await.unwrap();
        mirror.setstr("md2:scint.position", "0").await.unwrap();
        assert_eq!(mirror.getstr("md2:scint.position").await, None); // "0" parses fine but getstr filters empty only
    }

    #[tokio::test]
    async fn setstr_then_getstr_round_trips() {
        let store = MockStore::new();
        let mirror = mirror(&store);
        mirror.setstr("md2:scint.position", "42").await.unwrap();
        assert_eq!(mirror.getstr("md2:scint.position").await, Some("42".to_string()));
    }

    #[tokio::test]
    async fn own_publish_decrements_wait_for_me_without_refetch() {
        let store = MockStore::new();
        let mirror = mirror(&store);
        mirror.setstr("md2:scint.position", "7").await.unwrap();

        let obj = mirror.get_obj("md2:scint.position").await;
        assert_eq!(obj.wait_for_me.load(Ordering::SeqCst), 1);

        mirror
            .handle_notification(KvNotification {
                key: "md2:scint.position".to_string(),
                publisher_id: "daemon-1".to_string(),
            })
            .await;
        assert_eq!(obj.wait_for_me.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn foreign_publish_with_zero_counter_triggers_refetch() {
        let store = MockStore::new();
        let mirror = mirror(&store);
        mirror.setstr("md2:scint.position", "7").await.unwrap();
        mirror
            .handle_notification(KvNotification {
                key: "md2:scint.position".to_string(),
                publisher_id: "daemon-1".to_string(),
            })
            .await; // drains our own wait_for_me to 0

        store.seed("md2:scint.position", "99");
        mirror
            .handle_notification(KvNotification {
                key: "md2:scint.position".to_string(),
                publisher_id: "ui-console".to_string(),
            })
            .await;

        assert_eq!(mirror.getstr("md2:scint.position").await, Some("99".to_string()));
    }

    #[tokio::test]
    async fn foreign_publish_ignored_while_counter_nonzero() {
        let store = MockStore::new();
        let mirror = mirror(&store);
        mirror.setstr("md2:scint.position", "7").await.unwrap();

        store.seed("md2:scint.position", "99");
        mirror
            .handle_notification(KvNotification {
                key: "md2:scint.position".to_string(),
                publisher_id: "ui-console".to_string(),
            })
            .await;

        assert_eq!(mirror.getstr("md2:scint.position").await, Some("7".to_string()));
    }

    #[tokio::test]
    async fn set_preset_then_find_preset_round_trips() {
        let store = MockStore::new();
        let mirror = mirror(&store);
        mirror.set_preset("scint", "Cover", 0.0).await.unwrap();
        mirror.set_preset("scint", "Beam", 15.0).await.unwrap();

        assert_eq!(mirror.find_preset("scint", "Beam").await.unwrap(), 15.0);
        assert_eq!(mirror.find_preset("scint", "Cover").await.unwrap(), 0.0);
        assert!(mirror.find_preset("scint", "Missing").await.is_err());
    }

    #[tokio::test]
    async fn set_preset_overwrites_existing_slot_by_name() {
        let store = MockStore::new();
        let mirror = mirror(&store);
        mirror.set_preset("scint", "Cover", 0.0).await.unwrap();
        mirror.set_preset("scint", "Cover", 1.5).await.unwrap();
        assert_eq!(mirror.find_preset("scint", "Cover").await.unwrap(), 1.5);
    }
}
