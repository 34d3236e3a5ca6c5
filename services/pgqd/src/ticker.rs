//! Ticker loop (§4.3, C3).
//!
//! States: `Closed` -> `CheckPgq` -> `CheckVersion` -> `Run` (steady). Expressed
//! as a state variable plus a dispatch match on `(state, event)` per §9's
//! "nested tagged union" design note, with the actual connection I/O
//! sequenced around it by the `run` loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use db_conn::{ConnEvent, PgConn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sql;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    CheckPgq,
    CheckVersion,
    Run,
}

pub struct TickerConfig {
    pub check_period: Duration,
    pub ticker_period: Duration,
    pub connection_lifetime: Duration,
}

/// What the loop should do before its next iteration.
enum Action {
    /// Issue the query appropriate to the (now current) state immediately.
    Proceed,
    /// Reconnect and back off for `Duration` before resuming at `Closed`.
    Reconnect(Duration),
    /// Stay connected, sleep, then resume issuing the steady-state tick.
    SleepThenTick(Duration),
}

/// Runs the per-database ticker loop until `cancel` fires. `on_version_confirmed`
/// is called at most once per connected session, the moment `pgq.version()`
/// passes the `>= '3'` check (§4.3) — the caller uses it to launch the
/// maintenance and retry loops (§8 "version gating").
pub async fn run(
    mut conn: Box<dyn PgConn>,
    cancel: CancellationToken,
    cfg: TickerConfig,
    has_pgq: Arc<AtomicBool>,
    stats: Arc<telemetry::Stats>,
    mut on_version_confirmed: impl FnMut() + Send,
) {
    conn.set_lifetime(cfg.connection_lifetime);
    let mut state = State::Closed;

    loop {
        if cancel.is_cancelled() {
            conn.disconnect();
            return;
        }

        let event = tokio::select! {
            _ = cancel.cancelled() => { conn.disconnect(); return; }
            event = async {
                match state {
                    State::Closed => conn.connect().await,
                    State::CheckPgq => conn.query_simple(sql::CHECK_PGQ, true).await,
                    State::CheckVersion => conn.query_simple(sql::CHECK_VERSION, true).await,
                    State::Run => conn.query_simple(sql::TICK, true).await,
                }
            } => event,
        };

        let action = dispatch(
            &mut state,
            event,
            &cfg,
            &has_pgq,
            &stats,
            &mut on_version_confirmed,
        );

        match action {
            Action::Proceed => {}
            Action::Reconnect(backoff) => {
                conn.disconnect();
                tokio::select! {
                    _ = cancel.cancelled() => { return; }
                    _ = conn.sleep(backoff) => {}
                }
                state = State::Closed;
            }
            Action::SleepThenTick(period) => {
                tokio::select! {
                    _ = cancel.cancelled() => { conn.disconnect(); return; }
                    _ = conn.sleep(period) => {}
                }
                if conn.lifetime_expired() {
                    debug!("ticker connection lifetime expired, recycling");
                    conn.reconnect(Duration::ZERO).await;
                    state = State::Closed;
                } else if !conn.is_valid() {
                    state = State::Closed;
                } else {
                    state = State::Run;
                }
            }
        }
    }
}

fn dispatch(
    state: &mut State,
    event: ConnEvent,
    cfg: &TickerConfig,
    has_pgq: &AtomicBool,
    stats: &telemetry::Stats,
    on_version_confirmed: &mut dyn FnMut(),
) -> Action {
    match (*state, event) {
        (State::Closed, ConnEvent::ConnectOk) => {
            *state = State::CheckPgq;
            Action::Proceed
        }
        (State::Closed, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::CheckPgq, ConnEvent::ResultOk(r)) if r.is_tuples => {
            if r.rows.is_empty() {
                has_pgq.store(false, Ordering::Relaxed);
                info!("no pgq extension present, backing off");
                Action::Reconnect(cfg.check_period)
            } else {
                *state = State::CheckVersion;
                Action::Proceed
            }
        }
        (State::CheckPgq, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(10)),
        (State::CheckPgq, ConnEvent::ResultBad(e)) => {
            warn!(error = %e, "pgq probe failed");
            Action::Reconnect(Duration::from_secs(60))
        }
        (State::CheckPgq, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::CheckVersion, ConnEvent::ResultOk(r)) if r.is_tuples => {
            let ok = r.rows.len() == 1
                && r.rows[0]
                    .col(0)
                    .and_then(|s| s.chars().next())
                    .is_some_and(|c| c >= '3');
            if ok {
                has_pgq.store(true, Ordering::Relaxed);
                on_version_confirmed();
                *state = State::Run;
                Action::Proceed
            } else {
                has_pgq.store(false, Ordering::Relaxed);
                warn!("bad pgq version, ignoring");
                Action::Reconnect(cfg.check_period)
            }
        }
        (State::CheckVersion, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(10)),
        (State::CheckVersion, ConnEvent::ResultBad(e)) => {
            warn!(error = %e, "version probe failed");
            Action::Reconnect(Duration::from_secs(60))
        }
        (State::CheckVersion, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::Run, ConnEvent::ResultOk(r)) if r.is_tuples => {
            if r.rows.len() == 1 {
                stats.record_tick();
            }
            Action::SleepThenTick(cfg.ticker_period)
        }
        (State::Run, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(10)),
        (State::Run, ConnEvent::ResultBad(e)) => {
            warn!(error = %e, "tick failed");
            Action::Reconnect(Duration::from_secs(60))
        }
        (State::Run, _) => Action::Reconnect(Duration::from_secs(60)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_conn::QueryResult;
    use db_conn::mock::{MockConn, Scripted};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    fn cfg() -> TickerConfig {
        TickerConfig {
            check_period: StdDuration::from_secs(60),
            ticker_period: StdDuration::from_millis(1),
            connection_lifetime: StdDuration::from_secs(3600),
        }
    }

    /// Lets a background task that never truly suspends (our `MockConn`
    /// resolves every call immediately) get scheduled a few times on this
    /// single-threaded test runtime before we act on it.
    async fn let_background_task_spin() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn missing_pgq_backs_off_and_never_confirms() {
        // Script covers exactly one CHECK_PGQ round; MockConn falls back to
        // ConnectFailed forever afterwards (see db_conn::mock), so the loop
        // just keeps backing off until we cancel it.
        let mock = MockConn::new(vec![
            Scripted::ConnectOk,
            Scripted::Result(QueryResult::tuples(vec![])), // CHECK_PGQ: 0 rows
        ]);
        let has_pgq = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(telemetry::Stats::new().unwrap());
        let confirmed = Arc::new(AtomicUsize::new(0));
        let confirmed2 = confirmed.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(run(
            Box::new(mock),
            cancel.clone(),
            cfg(),
            has_pgq.clone(),
            stats,
            move || {
                confirmed2.fetch_add(1, Ordering::Relaxed);
            },
        ));

        let_background_task_spin().await;
        cancel2.cancel();
        let _ = tokio::time::timeout(StdDuration::from_secs(1), handle).await;

        assert!(!has_pgq.load(Ordering::Relaxed));
        assert_eq!(confirmed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn bad_version_never_confirms() {
        let mock = MockConn::new(vec![
            Scripted::ConnectOk,
            Scripted::Result(QueryResult::tuples(vec![db_conn::ResultRow(vec![Some(
                "1".into(),
            )])])),
            Scripted::Result(QueryResult::tuples(vec![db_conn::ResultRow(vec![Some(
                "2.1.5".into(),
            )])])),
        ]);
        let has_pgq = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(telemetry::Stats::new().unwrap());
        let confirmed = Arc::new(AtomicUsize::new(0));
        let confirmed2 = confirmed.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(run(
            Box::new(mock),
            cancel.clone(),
            cfg(),
            has_pgq.clone(),
            stats,
            move || {
                confirmed2.fetch_add(1, Ordering::Relaxed);
            },
        ));

        let_background_task_spin().await;
        cancel2.cancel();
        let _ = tokio::time::timeout(StdDuration::from_secs(1), handle).await;

        assert!(!has_pgq.load(Ordering::Relaxed));
        assert_eq!(confirmed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn good_version_confirms_once_and_ticks() {
        // on_version_confirmed cancels the loop itself the moment it fires,
        // so the steady-state RUN query never needs to be scripted.
        let mock = MockConn::new(vec![
            Scripted::ConnectOk,
            Scripted::Result(QueryResult::tuples(vec![db_conn::ResultRow(vec![Some(
                "1".into(),
            )])])),
            Scripted::Result(QueryResult::tuples(vec![db_conn::ResultRow(vec![Some(
                "3.2".into(),
            )])])),
        ]);
        let has_pgq = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(telemetry::Stats::new().unwrap());
        let confirmed = Arc::new(AtomicUsize::new(0));
        let confirmed2 = confirmed.clone();
        let cancel = CancellationToken::new();
        let cancel_in_task = cancel.clone();

        let handle = tokio::spawn(run(
            Box::new(mock),
            cancel.clone(),
            cfg(),
            has_pgq.clone(),
            stats,
            move || {
                confirmed2.fetch_add(1, Ordering::Relaxed);
                cancel_in_task.cancel();
            },
        ));

        let result = tokio::time::timeout(StdDuration::from_secs(1), handle).await;
        assert!(result.is_ok(), "ticker loop did not stop after confirmation");

        assert!(has_pgq.load(Ordering::Relaxed));
        assert_eq!(confirmed.load(Ordering::Relaxed), 1);
    }
}
