//! The KV mirror's wire seam: hash get/set, publish, and a pub/sub message
//! stream, each a narrow trait so production wires real Redis-protocol
//! sessions and tests wire an in-memory double — the same
//! trait-over-generic shape `md2_link::transport::PmacTransport` uses for
//! the PMAC socket.

use crate::error::KvError;

/// Read-through / write-through access to one hash-valued key.
pub trait KvBackend: Send + Sync {
    /// `HGET key VALUE`, or the equivalent on whatever store backs this
    /// connection.
    fn hget(&self, key: &str) -> impl std::future::Future<Output = Result<Option<String>, KvError>> + Send;

    /// `HSET key VALUE v` followed by `PUBLISH channel key`, atomically
    /// from the caller's point of view.
    fn hset_and_publish(
        &self,
        key: &str,
        value: &str,
        channel: &str,
        publisher_id: &str,
    ) -> impl std::future::Future<Output = Result<(), KvError>> + Send;
}

/// One pub/sub notification: the key name and the publisher id carried in
/// the envelope (our own writes tag the message with our id so the
/// write-through loop can tell its own echo from someone else's write).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvNotification {
    pub key: String,
    pub publisher_id: String,
}

/// A subscribed stream of key-change notifications.
pub trait KvPubSub: Send {
    fn next_message(&mut self) -> impl std::future::Future<Output = Option<KvNotification>> + Send;
}

pub mod redis_backend {
    use super::*;
    use redis::AsyncCommands;

    /// Production backend: a multiplexed async connection to either the
    /// local read/pub-sub store or the authoritative remote store.
    pub struct RedisBackend {
        conn: redis::aio::MultiplexedConnection,
    }

    impl RedisBackend {
        pub async fn connect(addr: &str) -> Result<Self, KvError> {
            let client = redis::Client::open(addr).map_err(|e| KvError::Connection(e.to_string()))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| KvError::Connection(e.to_string()))?;
            Ok(RedisBackend { conn })
        }
    }

    impl KvBackend for RedisBackend {
        async fn hget(&self, key: &str) -> Result<Option<String>, KvError> {
            let mut conn = self.conn.clone();
            conn.hget(key, "VALUE").await.map_err(|e| KvError::Command(e.to_string()))
        }

        async fn hset_and_publish(
            &self,
            key: &str,
            value: &str,
            channel: &str,
            publisher_id: &str,
        ) -> Result<(), KvError> {
            let mut conn = self.conn.clone();
            let _: () = conn
                .hset(key, "VALUE", value)
                .await
                .map_err(|e| KvError::Command(e.to_string()))?;
            let envelope = format!("{publisher_id}:{key}");
            let _: () = conn
                .publish(channel, envelope)
                .await
                .map_err(|e| KvError::Command(e.to_string()))?;
            Ok(())
        }
    }

    /// Production pub/sub stream: one dedicated `PubSub` connection.
    pub struct RedisPubSub {
        stream: redis::aio::PubSub,
    }

    impl RedisPubSub {
        pub async fn subscribe(addr: &str, channels: &[&str]) -> Result<Self, KvError> {
            let client = redis::Client::open(addr).map_err(|e| KvError::Connection(e.to_string()))?;
            let mut stream = client
                .get_async_pubsub()
                .await
                .map_err(|e| KvError::Connection(e.to_string()))?;
            for channel in channels {
                stream
                    .subscribe(*channel)
                    .await
                    .map_err(|e| KvError::Connection(e.to_string()))?;
            }
            Ok(RedisPubSub { stream })
        }
    }

    impl KvPubSub for RedisPubSub {
        async fn next_message(&mut self) -> Option<KvNotification> {
            use futures::StreamExt;
            let msg = self.stream.on_message().next().await?;
            let payload: String = msg.get_payload().ok()?;
            let (publisher_id, key) = payload.split_once(':')?;
            Some(KvNotification {
                key: key.to_string(),
                publisher_id: publisher_id.to_string(),
            })
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// A shared in-memory hash store plus a fan-out of subscriber channels,
    /// standing in for Redis in tests.
    #[derive(Clone)]
    pub struct MockStore {
        hashes: Arc<Mutex<HashMap<String, String>>>,
        subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<KvNotification>>>>,
    }

    impl MockStore {
        pub fn new() -> Self {
            MockStore {
                hashes: Arc::new(Mutex::new(HashMap::new())),
                subscribers: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn seed(&self, key: &str, value: &str) {
            self.hashes.lock().insert(key.to_string(), value.to_string());
        }

        pub fn subscribe(&self) -> MockPubSub {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().push(tx);
            MockPubSub { rx }
        }

        pub fn backend(&self) -> MockBackend {
            MockBackend { store: self.clone() }
        }
    }

    pub struct MockBackend {
        store: MockStore,
    }

    impl KvBackend for MockBackend {
        async fn hget(&self, key: &str) -> Result<Option<String>, KvError> {
            Ok(self.store.hashes.lock().get(key).cloned())
        }

        async fn hset_and_publish(
            &self,
            key: &str,
            value: &str,
            _channel: &str,
            publisher_id: &str,
        ) -> Result<(), KvError> {
            self.store.hashes.lock().insert(key.to_string(), value.to_string());
            let notification = KvNotification {
                key: key.to_string(),
                publisher_id: publisher_id.to_string(),
            };
            self.store
                .subscribers
                .lock()
                .retain(|tx| tx.send(notification.clone()).is_ok());
            Ok(())
        }
    }

    pub struct MockPubSub {
        rx: mpsc::UnboundedReceiver<KvNotification>,
    }

    impl KvPubSub for MockPubSub {
        async fn next_message(&mut self) -> Option<KvNotification> {
            self.rx.recv().await
        }
    }
}
