use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tracing::{debug, warn};

use crate::error::ConnError;
use crate::result::{QueryResult, ResultRow};

/// The four event kinds an owner reacts to (§4.2). A `PgConn` method call
/// suspends (the analogue of the C reactor's fd-wait/timer-wait) and resolves
/// to exactly one of these.
#[derive(Debug)]
pub enum ConnEvent {
    ConnectOk,
    ConnectFailed(ConnError),
    ResultOk(QueryResult),
    ResultBad(ConnError),
    Timeout,
}

/// What a [`PgSocket`] (or a test double) is doing right now. Tracked
/// explicitly — even though `async`/`await` already serializes suspension
/// points — so the "at most one outstanding wait" invariant (§8) is a field we
/// can assert on and unit-test, not just an emergent property of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    None,
    Socket,
    Timer,
}

/// The connection contract every worker loop (ticker/maintenance/retry)
/// programs against. Implemented for real by [`PgSocket`] (tokio-postgres) and
/// for tests by `db_conn::mock::MockConn`.
///
/// `query_simple`/`query_params` take `expect_tuples`: tokio-postgres's simple
/// query protocol doesn't expose libpq's `PQresultStatus` (tuples-ok vs.
/// command-ok) directly, only the rows it got back — so the caller, who
/// already knows whether it sent a `select ...` or a bare command like
/// `vacuum <table>`, states the expectation and it comes back on
/// [`crate::result::QueryResult::is_tuples`] for the worker loop to check.
#[async_trait]
pub trait PgConn: Send {
    async fn connect(&mut self) -> ConnEvent;
    async fn query_simple(&mut self, sql: &str, expect_tuples: bool) -> ConnEvent;
    async fn query_params(&mut self, sql: &str, params: &[String]) -> ConnEvent;
    async fn sleep(&mut self, dur: Duration) -> ConnEvent;
    fn disconnect(&mut self);
    async fn reconnect(&mut self, sleep: Duration) -> ConnEvent;
    fn is_valid(&self) -> bool;
    fn set_lifetime(&mut self, dur: Duration);
    fn lifetime_expired(&self) -> bool;
    fn wait_state(&self) -> WaitState;
}

/// One logical, nonblocking-style database connection (§4.2, C2).
///
/// Owns at most one `tokio_postgres::Client` plus the task driving its
/// `Connection` future. The C source's single-threaded reactor (`connect_cb`,
/// `send_cb`, `result_cb` in `connection.c`) is replaced by `async`/`await`
/// directly on `tokio-postgres` — the suspension points are the same four
/// events, just without callback indirection, since a tokio task *is* the
/// waiting state.
pub struct PgSocket {
    connstr: String,
    client: Option<tokio_postgres::Client>,
    conn_task: Option<tokio::task::JoinHandle<()>>,
    broken: Arc<AtomicBool>,
    wait: WaitState,
    lifetime: Option<Duration>,
    connected_at: Option<Instant>,
}

impl PgSocket {
    pub fn new(connstr: impl Into<String>) -> Self {
        Self {
            connstr: connstr.into(),
            client: None,
            conn_task: None,
            broken: Arc::new(AtomicBool::new(false)),
            wait: WaitState::None,
            lifetime: None,
            connected_at: None,
        }
    }
}

#[async_trait]
impl PgConn for PgSocket {
    async fn connect(&mut self) -> ConnEvent {
        self.wait = WaitState::Socket;
        let result = tokio_postgres::connect(&self.connstr, tokio_postgres::NoTls).await;
        self.wait = WaitState::None;

        match result {
            Ok((client, connection)) => {
                let broken = self.broken.clone();
                broken.store(false, Ordering::Relaxed);
                self.conn_task = Some(tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("postgres connection task ended with error: {e}");
                        broken.store(true, Ordering::Relaxed);
                    }
                }));
                self.client = Some(client);
                self.connected_at = Some(Instant::now());
                ConnEvent::ConnectOk
            }
            Err(e) => {
                self.client = None;
                ConnEvent::ConnectFailed(ConnError::Connect(e))
            }
        }
    }

    async fn query_simple(&mut self, sql: &str, expect_tuples: bool) -> ConnEvent {
        let Some(client) = self.client.as_ref() else {
            return ConnEvent::ResultBad(ConnError::NotConnected);
        };
        debug!(%sql, "query_simple");
        self.wait = WaitState::Socket;
        let msgs = client.simple_query(sql).await;
        self.wait = WaitState::None;

        match msgs {
            Ok(messages) => {
                let mut rows = Vec::new();
                for msg in messages {
                    if let tokio_postgres::SimpleQueryMessage::Row(row) = msg {
                        let cells = (0..row.len())
                            .map(|i| row.get(i).map(|s| s.to_string()))
                            .collect();
                        rows.push(ResultRow(cells));
                    }
                }
                ConnEvent::ResultOk(QueryResult {
                    rows,
                    is_tuples: expect_tuples,
                })
            }
            Err(e) => ConnEvent::ResultBad(ConnError::Query(e)),
        }
    }

    async fn query_params(&mut self, sql: &str, params: &[String]) -> ConnEvent {
        let Some(client) = self.client.as_ref() else {
            return ConnEvent::ResultBad(ConnError::NotConnected);
        };
        debug!(%sql, ?params, "query_params");
        self.wait = WaitState::Socket;
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let result = client.query(sql, &refs).await;
        self.wait = WaitState::None;

        match result {
            Ok(rows) => {
                let rows = rows
                    .iter()
                    .map(|row| {
                        let cells = (0..row.len())
                            .map(|i| row.try_get::<_, Option<String>>(i).unwrap_or(None))
                            .collect();
                        ResultRow(cells)
                    })
                    .collect();
                ConnEvent::ResultOk(QueryResult::tuples(rows))
            }
            Err(e) => ConnEvent::ResultBad(ConnError::Query(e)),
        }
    }

    async fn sleep(&mut self, dur: Duration) -> ConnEvent {
        self.wait = WaitState::Timer;
        tokio::time::sleep(dur).await;
        self.wait = WaitState::None;
        ConnEvent::Timeout
    }

    fn disconnect(&mut self) {
        self.client = None;
        if let Some(task) = self.conn_task.take() {
            task.abort();
        }
        self.wait = WaitState::None;
        self.connected_at = None;
    }

    async fn reconnect(&mut self, sleep: Duration) -> ConnEvent {
        self.disconnect();
        self.sleep(sleep).await
    }

    fn is_valid(&self) -> bool {
        self.client.is_some() && !self.broken.load(Ordering::Relaxed)
    }

    fn set_lifetime(&mut self, dur: Duration) {
        self.lifetime = Some(dur);
    }

    fn lifetime_expired(&self) -> bool {
        match (self.lifetime, self.connected_at) {
            (Some(max), Some(since)) => since.elapsed() >= max,
            _ => false,
        }
    }

    fn wait_state(&self) -> WaitState {
        self.wait
    }
}

impl Drop for PgSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_socket_has_no_outstanding_wait() {
        let sk = PgSocket::new("dbname=test");
        assert_eq!(sk.wait_state(), WaitState::None);
        assert!(!sk.is_valid());
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_fails_and_clears_wait() {
        let mut sk = PgSocket::new("host=127.0.0.1 port=1 dbname=nope connect_timeout=1");
        let ev = sk.connect().await;
        assert!(matches!(ev, ConnEvent::ConnectFailed(_)));
        assert_eq!(sk.wait_state(), WaitState::None);
        assert!(!sk.is_valid());
    }

    #[tokio::test]
    async fn sleep_emits_timeout_and_clears_wait() {
        let mut sk = PgSocket::new("dbname=test");
        let ev = sk.sleep(Duration::from_millis(1)).await;
        assert!(matches!(ev, ConnEvent::Timeout));
        assert_eq!(sk.wait_state(), WaitState::None);
    }

    #[tokio::test]
    async fn query_without_connection_is_result_bad() {
        let mut sk = PgSocket::new("dbname=test");
        let ev = sk.query_simple("select 1", true).await;
        assert!(matches!(ev, ConnEvent::ResultBad(ConnError::NotConnected)));
    }

    #[test]
    fn lifetime_not_expired_without_a_connection() {
        let mut sk = PgSocket::new("dbname=test");
        sk.set_lifetime(Duration::from_secs(0));
        assert!(!sk.lifetime_expired());
    }
}
