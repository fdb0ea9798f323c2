//! The bounded FIFO of pending query entries.
//!
//! Adapted from `md2_link::queue::CommandQueue` (drop-and-log on overflow,
//! `Mutex<VecDeque<_>>`), plus a `tokio::sync::Notify` so the gateway's
//! async reactor thread can await new work instead of polling it.

use crate::error::SqlError;
use crate::result::QueryResult;
use md2_common::consts::SQL_QUEUE_LEN;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

pub type QueryCallback = Box<dyn FnOnce(Result<QueryResult, SqlError>) + Send>;

pub struct QueryEntry {
    pub sql: String,
    pub callback: Option<QueryCallback>,
}

impl QueryEntry {
    pub fn new(sql: impl Into<String>) -> Self {
        QueryEntry {
            sql: sql.into(),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: QueryCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

pub struct QueryQueue {
    items: Mutex<VecDeque<QueryEntry>>,
    capacity: usize,
    notify: Notify,
}

impl QueryQueue {
    pub fn new() -> Self {
        QueryQueue {
            items: Mutex::new(VecDeque::with_capacity(SQL_QUEUE_LEN)),
            capacity: SQL_QUEUE_LEN,
            notify: Notify::new(),
        }
    }

    /// Enqueue `entry`. Returns `false` (and logs) if the queue is at
    /// capacity — dropped, never blocking the producer.
    pub fn push(&self, entry: QueryEntry) -> bool {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                tracing::warn!("SQL query queue full ({} entries), dropping request", self.capacity);
                return false;
            }
            items.push_back(entry);
        }
        self.notify.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<QueryEntry> {
        self.items.lock().pop_front()
    }

    /// Wait until an entry is available and return it.
    pub async fn pop(&self) -> QueryEntry {
        loop {
            if let Some(entry) = self.try_pop() {
                return entry;
            }
            let notified = self.notify.notified();
            if let Some(entry) = self.try_pop() {
                return entry;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl Default for QueryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_order() {
        let q = QueryQueue::new();
        assert!(q.push(QueryEntry::new("select 1")));
        assert!(q.push(QueryEntry::new("select 2")));
        assert_eq!(q.try_pop().unwrap().sql, "select 1");
        assert_eq!(q.try_pop().unwrap().sql, "select 2");
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn drops_and_reports_false_at_capacity() {
        let q = QueryQueue::new();
        for _ in 0..SQL_QUEUE_LEN {
            assert!(q.push(QueryEntry::new("select 1")));
        }
        assert!(!q.push(QueryEntry::new("select 1")));
        assert_eq!(q.len(), SQL_QUEUE_LEN);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let q = std::sync::Arc::new(QueryQueue::new());
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.pop().await });
        tokio::task::yield_now().await;
        q.push(QueryEntry::new("select now()"));
        let entry = handle.await.unwrap();
        assert_eq!(entry.sql, "select now()");
    }
}
