//! Maintenance loop (§4.4, C4).
//!
//! Two paths share one state machine: the new-style operations API
//! (`LoadOps` -> `Op`) and the legacy rotate/vacuum path (`LoadQueues` ->
//! `Rot1` -> `Rot2` -> `VacuumList` -> `DoVacuum`), chosen once per connected
//! session by `TestVersion`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use db_conn::{ConnEvent, PgConn, QueryResult};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::sql::{self, quote_fqident};

#[derive(Debug, Clone)]
struct MaintOp {
    func_name: String,
    func_arg: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    TestVersion,
    LoadOps,
    Op,
    LoadQueues,
    Rot1,
    Rot2,
    VacuumList,
    DoVacuum,
}

pub struct MaintConfig {
    pub maint_period: Duration,
}

enum Action {
    Proceed,
    Reconnect(Duration),
}

/// Runs one database's maintenance loop until `cancel` fires. `has_maint_operations`
/// persists the new-vs-legacy path decision across reconnects within this
/// session (§4.4 "if `has_maint_operations` is already known true, go to `LoadOps`").
pub async fn run(
    mut conn: Box<dyn PgConn>,
    cancel: CancellationToken,
    cfg: MaintConfig,
    stats: Arc<telemetry::Stats>,
) {
    let mut state = State::Closed;
    let mut has_maint_operations = false;
    let mut ops: VecDeque<MaintOp> = VecDeque::new();
    let mut items: VecDeque<String> = VecDeque::new();
    let mut current_op: Option<MaintOp> = None;

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
            State::TestVersion => conn.query_simple(sql::CHECK_MAINT_OPERATIONS, true).await,
            State::LoadOps => conn.query_simple(sql::LOAD_MAINT_OPERATIONS, true).await,
            State::Op => {
                let op = current_op
                    .clone()
                    .expect("Op state always has a current operation");
                match issue_operation(conn.as_mut(), &op).await {
                    Ok(event) => event,
                    Err(_) => {
                        warn!(func_name = %op.func_name, "identifier too long to quote, skipping operation");
                        ops.pop_front();
                        current_op = None;
                        state = State::Op;
                        continue;
                    }
                }
            }
            State::LoadQueues => conn.query_simple(sql::LEGACY_QUEUE_LIST, true).await,
            State::Rot1 => {
                let table = items.front().cloned().unwrap_or_default();
                conn.query_params(sql::LEGACY_ROTATE_STEP1, &[table]).await
            }
            State::Rot2 => conn.query_simple(sql::LEGACY_ROTATE_STEP2, true).await,
            State::VacuumList => conn.query_simple(sql::LEGACY_VACUUM_LIST, true).await,
            State::DoVacuum => {
                let table = items.front().cloned().unwrap_or_default();
                let stmt = format!("vacuum {table}");
                conn.query_simple(&stmt, false).await
            }
        };

        let action = dispatch(
            &mut state,
            event,
            &cfg,
            &stats,
            &mut has_maint_operations,
            &mut ops,
            &mut items,
            &mut current_op,
        );

        match action {
            Action::Proceed => {}
            Action::Reconnect(backoff) => {
                conn.disconnect();
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = conn.sleep(backoff) => {}
                }
                state = State::Closed;
                ops.clear();
                items.clear();
                current_op = None;
            }
        }
    }
}

async fn issue_operation(conn: &mut dyn PgConn, op: &MaintOp) -> Result<ConnEvent, sql::IdentTooLong> {
    let is_magic = sql::MAGIC_STATEMENTS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(&op.func_name));

    if is_magic {
        let arg = op.func_arg.as_deref().unwrap_or_default();
        let ident = quote_fqident(arg)?;
        let stmt = format!("{} {ident}", op.func_name);
        Ok(conn.query_simple(&stmt, false).await)
    } else {
        let ident = quote_fqident(&op.func_name)?;
        match &op.func_arg {
            Some(arg) => {
                let stmt = format!("select {ident}($1)");
                Ok(conn.query_params(&stmt, &[arg.clone()]).await)
            }
            None => {
                let stmt = format!("select {ident}()");
                Ok(conn.query_simple(&stmt, true).await)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    state: &mut State,
    event: ConnEvent,
    cfg: &MaintConfig,
    stats: &telemetry::Stats,
    has_maint_operations: &mut bool,
    ops: &mut VecDeque<MaintOp>,
    items: &mut VecDeque<String>,
    current_op: &mut Option<MaintOp>,
) -> Action {
    match (*state, event) {
        (State::Closed, ConnEvent::ConnectOk) => {
            if *has_maint_operations {
                *state = State::LoadOps;
            } else {
                *state = State::TestVersion;
            }
            Action::Proceed
        }
        (State::Closed, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::TestVersion, ConnEvent::ResultOk(r)) if r.is_tuples => {
            let supported = r.rows.len() == 1 && r.rows[0].col(0) == Some("1");
            *has_maint_operations = supported;
            *state = if supported {
                State::LoadOps
            } else {
                State::LoadQueues
            };
            Action::Proceed
        }
        (State::TestVersion, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::TestVersion, ConnEvent::ResultBad(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::TestVersion, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::LoadOps, ConnEvent::ResultOk(r)) if r.is_tuples => {
            *ops = r
                .rows
                .iter()
                .map(|row| MaintOp {
                    func_name: row.col(0).unwrap_or_default().to_string(),
                    func_arg: row.col(1).map(str::to_string),
                })
                .collect();
            advance_to_next_op(ops, current_op, state, cfg, stats)
        }
        (State::LoadOps, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::LoadOps, ConnEvent::ResultBad(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::LoadOps, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::Op, ConnEvent::ResultOk(r)) => {
            // §4.4: a magic-statement vacuum never returns tuples, so the
            // "continue" signal only applies when the result actually has a
            // row to parse; a bare command-ok result always advances.
            let continues = r.is_tuples
                && r.rows.len() == 1
                && r.rows[0]
                    .col(0)
                    .and_then(|s| s.parse::<i64>().ok())
                    .is_some_and(|n| n != 0);
            if !continues {
                ops.pop_front();
                *current_op = None;
            }
            advance_to_next_op(ops, current_op, state, cfg, stats)
        }
        (State::Op, ConnEvent::ResultBad(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::Op, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::LoadQueues, ConnEvent::ResultOk(r)) if r.is_tuples => {
            *items = r
                .rows
                .iter()
                .filter_map(|row| row.col(0).map(str::to_string))
                .collect();
            *state = if items.is_empty() {
                State::Rot2
            } else {
                State::Rot1
            };
            Action::Proceed
        }
        (State::LoadQueues, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::LoadQueues, ConnEvent::ResultBad(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::LoadQueues, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::Rot1, ConnEvent::ResultOk(r)) if r.is_tuples => {
            items.pop_front();
            *state = if items.is_empty() {
                State::Rot2
            } else {
                State::Rot1
            };
            Action::Proceed
        }
        (State::Rot1, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::Rot1, ConnEvent::ResultBad(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::Rot1, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::Rot2, ConnEvent::ResultOk(r)) if r.is_tuples => {
            *state = State::VacuumList;
            Action::Proceed
        }
        (State::Rot2, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::Rot2, ConnEvent::ResultBad(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::Rot2, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::VacuumList, ConnEvent::ResultOk(r)) if r.is_tuples => {
            *items = r
                .rows
                .iter()
                .filter_map(|row| row.col(0).map(str::to_string))
                .collect();
            if items.is_empty() {
                stats.record_maint_round();
                Action::Reconnect(cfg.maint_period)
            } else {
                *state = State::DoVacuum;
                Action::Proceed
            }
        }
        (State::VacuumList, ConnEvent::ResultOk(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::VacuumList, ConnEvent::ResultBad(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::VacuumList, _) => Action::Reconnect(Duration::from_secs(60)),

        (State::DoVacuum, ConnEvent::ResultOk(_)) => {
            items.pop_front();
            if items.is_empty() {
                stats.record_maint_round();
                Action::Reconnect(cfg.maint_period)
            } else {
                *state = State::DoVacuum;
                Action::Proceed
            }
        }
        (State::DoVacuum, ConnEvent::ResultBad(_)) => Action::Reconnect(Duration::from_secs(20)),
        (State::DoVacuum, _) => Action::Reconnect(Duration::from_secs(60)),
    }
}

fn advance_to_next_op(
    ops: &mut VecDeque<MaintOp>,
    current_op: &mut Option<MaintOp>,
    state: &mut State,
    cfg: &MaintConfig,
    stats: &telemetry::Stats,
) -> Action {
    match ops.front() {
        Some(op) => {
            *current_op = Some(op.clone());
            *state = State::Op;
            Action::Proceed
        }
        None => {
            *current_op = None;
            stats.record_maint_round();
            Action::Reconnect(cfg.maint_period)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_conn::ResultRow;
    use db_conn::mock::{MockConn, Scripted};

    fn cfg() -> MaintConfig {
        MaintConfig {
            maint_period: Duration::from_millis(5),
        }
    }

    async fn let_background_task_spin() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn operation_continuation_reinvokes_same_operation_then_advances() {
        // §8 scenario 4: one op, result 1, 1, then 0.
        let mock = MockConn::new(vec![
            Scripted::ConnectOk,
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("1".into())])])), // TestVersion: supported
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![
                Some("pgq.maint_rotate_insert".into()),
                None,
            ])])), // LoadOps
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("1".into())])])), // Op #1 -> continue
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("1".into())])])), // Op #2 -> continue
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("0".into())])])), // Op #3 -> drained
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
    async fn legacy_path_runs_rotate_then_vacuum_then_sleeps() {
        let mock = MockConn::new(vec![
            Scripted::ConnectOk,
            Scripted::Result(QueryResult::tuples(vec![])), // TestVersion: not supported (0 rows)
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("events".into())])])), // LoadQueues
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("1".into())])])), // Rot1
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some("1".into())])])), // Rot2
            Scripted::Result(QueryResult::tuples(vec![ResultRow(vec![Some(
                "events_0".into(),
            )])])), // VacuumList
            Scripted::Result(QueryResult::command()), // DoVacuum
        ]);
        let stats = Arc::new(telemetry::Stats::new().unwrap());
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(run(Box::new(mock), cancel.clone(), cfg(), stats.clone()));

        let_background_task_spin().await;
        cancel2.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[test]
    fn empty_queue_list_routes_directly_to_rot2() {
        // §4.4 "while the item list is non-empty, pop one and invoke step1;
        // when drained go to ROT2" — an empty LoadQueues result must route
        // straight to ROT2 rather than sending step1 with an empty arg.
        let stats = telemetry::Stats::new().unwrap();
        let mut state = State::LoadQueues;
        let mut has_maint_operations = false;
        let mut ops = VecDeque::new();
        let mut items = VecDeque::new();
        let mut current_op = None;

        let action = dispatch(
            &mut state,
            ConnEvent::ResultOk(QueryResult::tuples(vec![])),
            &cfg(),
            &stats,
            &mut has_maint_operations,
            &mut ops,
            &mut items,
            &mut current_op,
        );

        assert!(matches!(action, Action::Proceed));
        assert_eq!(state, State::Rot2);
    }

    #[test]
    fn nonempty_queue_list_routes_to_rot1() {
        let stats = telemetry::Stats::new().unwrap();
        let mut state = State::LoadQueues;
        let mut has_maint_operations = false;
        let mut ops = VecDeque::new();
        let mut items = VecDeque::new();
        let mut current_op = None;

        let action = dispatch(
            &mut state,
            ConnEvent::ResultOk(QueryResult::tuples(vec![ResultRow(vec![Some(
                "events".into(),
            )])])),
            &cfg(),
            &stats,
            &mut has_maint_operations,
            &mut ops,
            &mut items,
            &mut current_op,
        );

        assert!(matches!(action, Action::Proceed));
        assert_eq!(state, State::Rot1);
    }
}
