//! A scripted [`PgConn`] double for unit-testing worker state machines without
//! a live PostgreSQL server (§8 end-to-end scenarios). Enabled via the `mock`
//! feature so `services/pgqd`'s test suite can depend on it without pulling
//! it into the production binary.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use crate::result::QueryResult;
use crate::socket::{ConnEvent, PgConn, WaitState};

/// One scripted reaction to a `PgConn` call, recorded so assertions can
/// inspect exactly what the worker loop sent.
#[derive(Debug, Clone)]
pub enum Scripted {
    ConnectOk,
    ConnectFailed,
    Result(QueryResult),
    ResultBad,
}

/// A `PgConn` whose responses are a fixed queue, fed in FIFO order regardless
/// of which method was called — tests construct the queue to match the exact
/// sequence of calls the scenario under test is expected to make, and the
/// recorded `calls` log lets them assert on the *shape* of each call too.
pub struct MockConn {
    script: VecDeque<Scripted>,
    pub calls: Vec<String>,
    valid: bool,
    wait: WaitState,
    lifetime: Option<Duration>,
    force_lifetime_expired: bool,
}

impl MockConn {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: script.into(),
            calls: Vec::new(),
            valid: false,
            wait: WaitState::None,
            lifetime: None,
            force_lifetime_expired: false,
        }
    }

    pub fn expire_lifetime(&mut self) {
        self.force_lifetime_expired = true;
    }

    /// Pops the next scripted reaction, or `fallback` once the script runs
    /// dry. A worker loop keeps running past the scenario a test cares
    /// about — falling back to a permanent failure is closer to reality
    /// than panicking the task the instant the interesting part is over.
    fn next_or(&mut self, fallback: Scripted) -> Scripted {
        self.script.pop_front().unwrap_or(fallback)
    }
}

#[async_trait]
impl PgConn for MockConn {
    async fn connect(&mut self) -> ConnEvent {
        self.calls.push("connect".into());
        match self.next_or(Scripted::ConnectFailed) {
            Scripted::ConnectOk => {
                self.valid = true;
                ConnEvent::ConnectOk
            }
            Scripted::ConnectFailed => {
                self.valid = false;
                ConnEvent::ConnectFailed(crate::error::ConnError::NotConnected)
            }
            other => panic!("unexpected script entry for connect(): {other:?}"),
        }
    }

    async fn query_simple(&mut self, sql: &str, _expect_tuples: bool) -> ConnEvent {
        self.calls.push(format!("query_simple: {sql}"));
        match self.next_or(Scripted::ResultBad) {
            Scripted::Result(r) => ConnEvent::ResultOk(r),
            Scripted::ResultBad => ConnEvent::ResultBad(crate::error::ConnError::NotConnected),
            other => panic!("unexpected script entry for query_simple(): {other:?}"),
        }
    }

    async fn query_params(&mut self, sql: &str, params: &[String]) -> ConnEvent {
        self.calls
            .push(format!("query_params: {sql} {params:?}"));
        match self.next_or(Scripted::ResultBad) {
            Scripted::Result(r) => ConnEvent::ResultOk(r),
            Scripted::ResultBad => ConnEvent::ResultBad(crate::error::ConnError::NotConnected),
            other => panic!("unexpected script entry for query_params(): {other:?}"),
        }
    }

    async fn sleep(&mut self, _dur: Duration) -> ConnEvent {
        self.calls.push("sleep".into());
        ConnEvent::Timeout
    }

    fn disconnect(&mut self) {
        self.calls.push("disconnect".into());
        self.valid = false;
    }

    async fn reconnect(&mut self, sleep: Duration) -> ConnEvent {
        self.disconnect();
        self.sleep(sleep).await
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn set_lifetime(&mut self, dur: Duration) {
        self.lifetime = Some(dur);
    }

    fn lifetime_expired(&self) -> bool {
        self.force_lifetime_expired
    }

    fn wait_state(&self) -> WaitState {
        self.wait
    }
}
