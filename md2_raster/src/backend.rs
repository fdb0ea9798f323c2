//! The raster worker's own connection to the in-memory store: list
//! operations only (`RPOPLPUSH`, `LREM`), kept separate from the hash-keyed
//! `md2_kv` connection since the two never touch the same keys. Unlike
//! `md2_kv`, this connection is driven from a single dedicated OS thread
//! with nothing else to interleave, so it is a plain blocking connection —
//! the same shape `md2_link::transport::PmacTransport` uses for the PMAC
//! socket.

use crate::error::RasterError;

pub trait ListBackend: Send {
    /// `RPOPLPUSH src dst`: atomically move the tail of `src` onto the head
    /// of `dst`, returning the moved element, or `None` if `src` is empty.
    fn rpoplpush(&mut self, src: &str, dst: &str) -> Result<Option<String>, RasterError>;

    /// `LREM key 0 value`: remove every occurrence of `value` from `key`.
    fn lrem(&mut self, key: &str, value: &str) -> Result<(), RasterError>;
}

pub struct RedisListBackend {
    conn: redis::Connection,
}

impl RedisListBackend {
    pub fn connect(addr: &str) -> Result<Self, RasterError> {
        let client = redis::Client::open(addr).map_err(|e| RasterError::Connection(e.to_string()))?;
        let conn = client.get_connection().map_err(|e| RasterError::Connection(e.to_string()))?;
        Ok(RedisListBackend { conn })
    }
}

impl ListBackend for RedisListBackend {
    fn rpoplpush(&mut self, src: &str, dst: &str) -> Result<Option<String>, RasterError> {
        redis::cmd("RPOPLPUSH")
            .arg(src)
            .arg(dst)
            .query(&mut self.conn)
            .map_err(|e| RasterError::Command(e.to_string()))
    }

    fn lrem(&mut self, key: &str, value: &str) -> Result<(), RasterError> {
        redis::cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(value)
            .query::<i64>(&mut self.conn)
            .map_err(|e| RasterError::Command(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    /// An in-memory multi-list store standing in for Redis in tests.
    #[derive(Default)]
    pub struct MockListBackend {
        lists: HashMap<String, VecDeque<String>>,
    }

    impl MockListBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&mut self, key: &str, values: impl IntoIterator<Item = impl Into<String>>) {
            self.lists.entry(key.to_string()).or_default().extend(values.into_iter().map(Into::into));
        }

        pub fn contents(&self, key: &str) -> Vec<String> {
            self.lists.get(key).cloned().unwrap_or_default().into_iter().collect()
        }
    }

    impl ListBackend for MockListBackend {
        fn rpoplpush(&mut self, src: &str, dst: &str) -> Result<Option<String>, RasterError> {
            let Some(value) = self.lists.entry(src.to_string()).or_default().pop_back() else {
                return Ok(None);
            };
            self.lists.entry(dst.to_string()).or_default().push_front(value.clone());
            Ok(Some(value))
        }

        fn lrem(&mut self, key: &str, value: &str) -> Result<(), RasterError> {
            if let Some(list) = self.lists.get_mut(key) {
                list.retain(|v| v != value);
            }
            Ok(())
        }
    }
}
