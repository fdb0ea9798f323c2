//! The gateway's dedicated reactor thread: the only thread that ever
//! touches the Postgres socket, driving one query at a time plus the two
//! `LISTEN` channels that feed the queue from the database side.

use crate::call::SqlCall;
use crate::error::SqlError;
use crate::queue::{QueryEntry, QueryQueue};
use crate::result::QueryResult;
use crate::state::GatewayState;
use md2_common::consts::RECONNECT_BACKOFF;
use md2_events::EventBus;
use parking_lot::Mutex;
use sqlx::postgres::{PgConnection, PgListener};
use sqlx::{Column, Connection, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared handle producers call through; owns the query queue and the
/// outward-facing connection state.
pub struct SqlGateway {
    pub queue: QueryQueue,
    pub state: Mutex<GatewayState>,
    bus: Arc<EventBus>,
    dsn: String,
    pmac_channel: String,
    action_channel: String,
    shutdown: AtomicBool,
}

impl SqlGateway {
    pub fn new(
        dsn: impl Into<String>,
        pmac_channel: impl Into<String>,
        action_channel: impl Into<String>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(SqlGateway {
            queue: QueryQueue::new(),
            state: Mutex::new(GatewayState::Connect),
            bus,
            dsn: dsn.into(),
            pmac_channel: pmac_channel.into(),
            action_channel: action_channel.into(),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn current_state(&self) -> GatewayState {
        *self.state.lock()
    }

    /// Enqueue `sql` and return the waiter the caller's own thread blocks
    /// on via `call.wait(timeout)` then consumes via `call.done()`.
    pub fn call(self: &Arc<Self>, sql: impl Into<String>) -> Arc<SqlCall> {
        let call = SqlCall::new();
        let c = Arc::clone(&call);
        self.queue
            .push(QueryEntry::new(sql).with_callback(Box::new(move |outcome| c.fulfill(outcome))));
        call
    }

    /// Spawn the dedicated OS thread running a single-threaded `tokio`
    /// runtime.
    pub fn spawn_worker(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let gateway = Arc::clone(self);
        std::thread::Builder::new()
            .name("md2-sql-gateway".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build SQL gateway runtime");
                rt.block_on(gateway.run());
            })
            .expect("failed to spawn SQL gateway thread")
    }

    async fn run(self: Arc<Self>) {
        let mut last_attempt = Instant::now() - RECONNECT_BACKOFF;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            let elapsed = last_attempt.elapsed();
            if elapsed < RECONNECT_BACKOFF {
                tokio::time::sleep(RECONNECT_BACKOFF - elapsed).await;
            }
            last_attempt = Instant::now();

            *self.state.lock() = GatewayState::Connect;
            let conn = match PgConnection::connect(&self.dsn).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("SQL gateway connect failed: {e}");
                    continue;
                }
            };
            *self.state.lock() = GatewayState::ConnectPoll;

            *self.state.lock() = GatewayState::Reset;
            let mut listener = match PgListener::connect(&self.dsn).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!("SQL gateway LISTEN connect failed: {e}");
                    continue;
                }
            };
            if let Err(e) = listener.listen(&self.pmac_channel).await {
                tracing::warn!("SQL gateway LISTEN {} failed: {e}", self.pmac_channel);
                continue;
            }
            if let Err(e) = listener.listen(&self.action_channel).await {
                tracing::warn!("SQL gateway LISTEN {} failed: {e}", self.action_channel);
                continue;
            }
            *self.state.lock() = GatewayState::ResetPoll;

            tracing::info!("SQL gateway connected");
            if let Err(e) = self.service_loop(conn, &mut listener).await {
                tracing::warn!("SQL gateway error, reconnecting: {e}");
            }
        }
    }

    async fn service_loop(&self, mut conn: PgConnection, listener: &mut PgListener) -> Result<(), SqlError> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            *self.state.lock() = GatewayState::Idle;

            tokio::select! {
                notification = listener.recv() => {
                    let notification = notification.map_err(|e| SqlError::Listen(e.to_string()))?;
                    self.handle_notification(notification.channel());
                }
                entry = self.queue.pop() => {
                    self.service_query(&mut conn, entry).await?;
                }
            }
        }
    }

    /// `*_pmac` channel enqueues `SELECT md2_queue_next()`; any other
    /// channel enqueues `SELECT action FROM nextaction()`.
    fn handle_notification(&self, channel: &str) {
        if channel == self.pmac_channel {
            self.queue.push(QueryEntry::new("SELECT md2_queue_next()"));
        } else {
            self.queue.push(QueryEntry::new("SELECT action FROM nextaction()"));
        }
        self.bus.send(format!("Sql {channel} Notify"));
    }

    async fn service_query(&self, conn: &mut PgConnection, mut entry: QueryEntry) -> Result<(), SqlError> {
        *self.state.lock() = GatewayState::Send;
        *self.state.lock() = GatewayState::SendFlush;
        *self.state.lock() = GatewayState::Recv;

        let outcome = run_query(conn, &entry.sql).await;
        *self.state.lock() = GatewayState::Idle;

        if let Err(ref e) = outcome {
            tracing::warn!("SQL query failed: {} ({e})", entry.sql);
        }
        let is_connection_fault = matches!(outcome, Err(SqlError::Connection(_)));
        if let Some(callback) = entry.callback.take() {
            callback(outcome);
        }
        if is_connection_fault {
            return Err(SqlError::Connection("connection lost mid-query".into()));
        }
        Ok(())
    }
}

async fn run_query(conn: &mut PgConnection, sql: &str) -> Result<QueryResult, SqlError> {
    let rows = sqlx::query(sql)
        .fetch_all(conn)
        .await
        .map_err(|e| SqlError::Query(e.to_string()))?;

    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut values = Vec::with_capacity(row.columns().len());
        for i in 0..row.columns().len() {
            let value: Option<String> = row.try_get(i).unwrap_or(None);
            values.push(value);
        }
        out_rows.push(values);
    }

    Ok(QueryResult { columns, rows: out_rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use md2_events::EventBus;

    fn gateway() -> Arc<SqlGateway> {
        SqlGateway::new("postgres://localhost/md2", "md2_pmac", "md2_action", EventBus::new())
    }

    #[test]
    fn call_enqueues_a_waiter_backed_entry() {
        let gw = gateway();
        let _call = gw.call("select 1");
        assert_eq!(gw.queue.len(), 1);
    }

    #[test]
    fn starts_in_connect_state() {
        let gw = gateway();
        assert_eq!(gw.current_state(), GatewayState::Connect);
    }

    #[test]
    fn handle_notification_routes_pmac_channel_to_queue_next() {
        let gw = gateway();
        gw.handle_notification("md2_pmac");
        assert_eq!(gw.queue.try_pop().unwrap().sql, "SELECT md2_queue_next()");
    }

    #[test]
    fn handle_notification_routes_other_channels_to_nextaction() {
        let gw = gateway();
        gw.handle_notification("md2_action");
        assert_eq!(gw.queue.try_pop().unwrap().sql, "SELECT action FROM nextaction()");
    }
}
