//! The mirrored KV object: a named value plus its derived interpretations,
//! blocking readers, and an optional on-set hook.

use crate::array::parse_pg_array;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Cached interpretations of the current value string, computed once per
/// value change rather than on every read.
#[derive(Debug, Clone, Default)]
struct Parsed {
    double: Option<f64>,
    long: Option<i64>,
    boolean: Option<bool>,
    array: Option<Vec<String>>,
}

fn parse_all(value: &str) -> Parsed {
    Parsed {
        double: value.parse().ok(),
        long: value.parse().ok(),
        boolean: parse_bool(value),
        array: parse_pg_array(value),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "true" | "True" | "TRUE" => Some(true),
        "0" | "f" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

struct State {
    value: Option<String>,
    parsed: Parsed,
    valid: bool,
}

type OnSetHook = Box<dyn Fn(&str) + Send + Sync>;

/// One mirrored key/value pair. `valid` is false while a refresh is in
/// flight; readers block on [`KvObject::wait_valid`] until it becomes true.
pub struct KvObject {
    pub key: String,
    state: Mutex<State>,
    changed: Condvar,
    /// Incremented on every locally-originated write; decremented by each
    /// subsequent pub/sub notification carrying our own publisher id.
    pub wait_for_me: AtomicI64,
    on_set: Mutex<Option<OnSetHook>>,
}

impl KvObject {
    pub fn new(key: impl Into<String>) -> Self {
        KvObject {
            key: key.into(),
            state: Mutex::new(State {
                value: None,
                parsed: Parsed::default(),
                valid: false,
            }),
            changed: Condvar::new(),
            wait_for_me: AtomicI64::new(0),
            on_set: Mutex::new(None),
        }
    }

    /// Register a hook invoked (without holding this object's lock) after
    /// every successful [`Self::set_local`].
    pub fn set_on_set_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_set.lock() = Some(Box::new(hook));
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    /// Mark invalid (a refresh is in flight or the last write was ours and
    /// hasn't echoed back yet). Does not clear the cached value.
    pub fn invalidate(&self) {
        self.state.lock().valid = false;
    }

    /// Set the value and mark valid, waking any blocked readers and
    /// running the on-set hook afterward.
    pub fn set_local(&self, value: impl Into<String>) {
        let value = value.into();
        {
            let mut state = self.state.lock();
            state.parsed = parse_all(&value);
            state.value = Some(value.clone());
            state.valid = true;
            self.changed.notify_all();
        }
        if let Some(hook) = self.on_set.lock().as_ref() {
            hook(&value);
        }
    }

    /// Owned copy of the current string value, or `None` if never set.
    /// Never returns a borrow — callers may hold this across further
    /// mutation of the object.
    pub fn getstr(&self) -> Option<String> {
        self.state.lock().value.clone()
    }

    pub fn get_double(&self) -> Option<f64> {
        self.state.lock().parsed.double
    }

    pub fn get_long(&self) -> Option<i64> {
        self.state.lock().parsed.long
    }

    pub fn get_bool(&self) -> Option<bool> {
        self.state.lock().parsed.boolean
    }

    pub fn get_array(&self) -> Option<Vec<String>> {
        self.state.lock().parsed.array.clone()
    }

    /// Block until `valid` becomes true or `timeout` elapses.
    pub fn wait_valid(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.valid {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return state.valid;
            }
            self.changed.wait_for(&mut state, remaining);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_invalid_with_no_value() {
        let obj = KvObject::new("md2:omega.position");
        assert!(!obj.is_valid());
        assert_eq!(obj.getstr(), None);
    }

    #[test]
    fn set_local_caches_all_interpretations() {
        let obj = KvObject::new("k");
        obj.set_local("3.5");
        assert!(obj.is_valid());
        assert_eq!(obj.getstr(), Some("3.5".to_string()));
        assert_eq!(obj.get_double(), Some(3.5));
        assert_eq!(obj.get_long(), None);
    }

    #[test]
    fn parses_bool_and_array_values() {
        let obj = KvObject::new("k");
        obj.set_local("true");
        assert_eq!(obj.get_bool(), Some(true));

        let obj = KvObject::new("k2");
        obj.set_local("{a,b,c}");
        assert_eq!(obj.get_array(), Some(vec!["a".into(), "b".into(), "c".into()]));
    }

    #[test]
    fn wait_valid_unblocks_on_set_local() {
        let obj = Arc::new(KvObject::new("k"));
        let o = Arc::clone(&obj);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            o.set_local("ready");
        });
        assert!(obj.wait_valid(Duration::from_secs(2)));
        assert_eq!(obj.getstr(), Some("ready".to_string()));
    }

    #[test]
    fn wait_valid_times_out() {
        let obj = KvObject::new("k");
        assert!(!obj.wait_valid(Duration::from_millis(30)));
    }

    #[test]
    fn on_set_hook_fires_after_each_set() {
        let obj = KvObject::new("k");
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        obj.set_on_set_hook(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        obj.set_local("1");
        obj.set_local("2");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_clears_flag_but_keeps_value() {
        let obj = KvObject::new("k");
        obj.set_local("x");
        obj.invalidate();
        assert!(!obj.is_valid());
        assert_eq!(obj.getstr(), Some("x".to_string()));
    }
}
