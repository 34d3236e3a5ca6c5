//! Retry loop (§4.5, C5). Two states only: connected/running and sleeping.

use std::sync::Arc;
use std::time::Duration;

use db_conn::{ConnEvent, PgConn};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::sql;

pub struct RetryConfig {
    pub retry_period: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Running,
}

enum Action {
    Proceed,
    Reconnect(Duration),
}

pub async fn run(
    mut conn: Box<dyn PgConn>,
    cancel: CancellationToken,
    cfg: RetryConfig,
    stats: Arc<telemetry::Stats>,
) {
    let mut state = State::Closed;

    loop {
        if cancel.is_cancelled() {
            conn.disconnect();
            return;
        }

        let event = match state {
            State::Closed => {
                tokio::select! {
                    _ = cancel.cancelled() => { conn.disconnect(); return; }
                    event = conn.connect() => event,
                }
            }
            State::Running => conn.query_simple(sql::RETRY_EVENTS, true).await,
        };

        let action = dispatch(&mut state, event, &cfg, &stats);

        match action {
            Action::Proceed => {}
            Action::Reconnect(backoff) => {
                conn.disconnect();
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = conn.sleep(backoff) => {}
                }
                state = State::Closed;
            }
        }
    }
}

fn dispatch(state: &mut State, event: ConnEvent, cfg: &RetryConfig, stats: &telemetry::Stats) -> Action {
    match (*state, event) {
        (State::Closed, ConnEvent::ConnectOk) => {
            *state = State::Running;
            Action::Proceed
        }
        (State::Closed, _) => Action::Reconnect(Duration::from_secs(30)),

        (State::Running, ConnEvent::ResultOk(r)) if r.is_tuples => {
            let n = r
                .single_row()
                .and_then(|row| row.col(0))
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            if n != 0 {
                stats.record_retry(n as u64);
                *state = State::Running;
                Action::Proceed
            } else {
                Action::Reconnect(cfg.retry_period)
            }
        }
        (State::Running, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::Running, ConnEvent::ResultBad(e)) => {
            warn!(error = %e, "retry query failed");
            Action::Reconnect(Duration::from_secs(20))
        }
        (State::Running, _) => Action::Reconnect(Duration::from_secs(30)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_conn::QueryResult;
    use db_conn::ResultRow;
    use db_conn::mock::{MockConn, Scripted};

    fn cfg() -> RetryConfig {
        RetryConfig {
            retry_period: Duration::from_millis(5),
        }
    }

    async fn let_background_task_spin() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn drains_nonzero_rows_then_sleeps_on_zero() {
        // §8 scenario 6: returns 42, then 0.
        let mock = MockConn::new(vec![
            Scripted::ConnectOk,
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("42".into())])])),
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("0".into())])])),
        ]);
        let stats = Arc::new(telemetry::Stats::new().unwrap());
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(run(Box::new(mock), cancel.clone(), cfg(), stats.clone()));

        let_background_task_spin().await;
        cancel2.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn non_tuples_result_backs_off_twenty_seconds() {
        let mock = MockConn::new(vec![Scripted::ConnectOk, Scripted::Result(QueryResult::command())]);
        let stats = Arc::new(telemetry::Stats::new().unwrap());
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(run(Box::new(mock), cancel.clone(), cfg(), stats.clone()));

        let_background_task_spin().await;
        cancel2.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}
