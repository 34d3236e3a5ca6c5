//! Discovery/reconciliation driver (§4.6 C7).
//!
//! Either reconciles against a fixed `database_list`, or lazily opens a
//! template connection and polls `pg_database` every `check_period`. The
//! template connection exists only while auto-discovery is active; it is
//! dropped the moment an explicit `database_list` takes over.
//!
//! Reads the live config out of a shared `RwLock` on every round rather than
//! taking a fixed snapshot, so a SIGHUP reload (`signals.rs`) that flips
//! `database_list` or `check_period` takes effect on this loop's very next
//! iteration without this module needing to know anything about signals.

use std::sync::Arc;

use db_conn::{ConnEvent, PgConn, PgSocket};
use pgqd_config::Config;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::registry::Registry;
use crate::sql;

pub async fn run(
    registry: Arc<tokio::sync::Mutex<Registry>>,
    config: Arc<RwLock<Arc<Config>>>,
    stats: Arc<telemetry::Stats>,
    reconcile_now: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut template: Option<Box<dyn PgConn>> = None;

    loop {
        if cancel.is_cancelled() {
            if let Some(mut conn) = template.take() {
                conn.disconnect();
            }
            return;
        }

        let cfg = config.read().await.clone();

        if !cfg.database_list.is_empty() {
            template = None;
            registry
                .lock()
                .await
                .reconcile(&cfg.database_list, cfg.clone(), stats.clone())
                .await;
        } else {
            let names = discover(&mut template, &cfg).await.unwrap_or_default();
            registry
                .lock()
                .await
                .reconcile(&names, cfg.clone(), stats.clone())
                .await;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(mut conn) = template.take() {
                    conn.disconnect();
                }
                return;
            }
            _ = reconcile_now.notified() => {}
            _ = tokio::time::sleep(cfg.check_period) => {}
        }
    }
}

/// Polls `pg_database` over the lazily-created template connection,
/// reconnecting once on failure before giving up for this round.
async fn discover(template: &mut Option<Box<dyn PgConn>>, cfg: &Config) -> Result<Vec<String>, ()> {
    if template.is_none() {
        let connstr = cfg.make_connstr(&cfg.initial_database);
        let mut conn: Box<dyn PgConn> = Box::new(PgSocket::new(connstr));
        match conn.connect().await {
            ConnEvent::ConnectOk => *template = Some(conn),
            ConnEvent::ConnectFailed(e) => {
                warn!(error = %e, "discovery template connection failed");
                return Err(());
            }
            _ => return Err(()),
        }
    }

    let conn = template.as_mut().expect("template just ensured present");
    match conn.query_simple(sql::DISCOVER_DATABASES, true).await {
        ConnEvent::ResultOk(r) if r.is_tuples => Ok(r
            .rows
            .iter()
            .filter_map(|row| row.col(0).map(str::to_string))
            .collect()),
        ConnEvent::ResultOk(_) => Err(()),
        ConnEvent::ResultBad(e) => {
            warn!(error = %e, "discovery query failed");
            template.take();
            Err(())
        }
        _ => {
            template.take();
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_conn::QueryResult;
    use db_conn::ResultRow;
    use db_conn::mock::{MockConn, Scripted};

    fn cfg() -> Config {
        Config {
            pidfile: "/tmp/pgqd-discovery-test.pid".into(),
            base_connstr: String::new(),
            initial_database: "template1".to_string(),
            database_list: vec![],
            check_period: std::time::Duration::from_secs(60),
            maint_period: std::time::Duration::from_secs(120),
            retry_period: std::time::Duration::from_secs(30),
            ticker_period: std::time::Duration::from_secs(1),
            stats_period: std::time::Duration::from_secs(30),
            connection_lifetime: std::time::Duration::from_secs(3600),
            syslog: false,
            syslog_ident: None,
            logfile: None,
        }
    }

    /// §8 scenario 1: discovery returns two database names.
    #[tokio::test]
    async fn discover_parses_rows_into_names() {
        let mock: Box<dyn PgConn> = Box::new(MockConn::new(vec![Scripted::Result(
            QueryResult::tuples(vec![
                ResultRow(vec![Some("app1".into())]),
                ResultRow(vec![Some("app2".into())]),
            ]),
        )]));
        let mut template = Some(mock);
        let names = discover(&mut template, &cfg()).await.unwrap();
        assert_eq!(names, vec!["app1".to_string(), "app2".to_string()]);
        assert!(template.is_some(), "a successful round keeps the template alive");
    }

    #[tokio::test]
    async fn discover_drops_template_on_query_failure() {
        let mock: Box<dyn PgConn> = Box::new(MockConn::new(vec![Scripted::ResultBad]));
        let mut template = Some(mock);
        assert!(discover(&mut template, &cfg()).await.is_err());
        assert!(
            template.is_none(),
            "a failed query drops the template so the next round reconnects"
        );
    }

    #[tokio::test]
    async fn discover_with_no_databases_returns_empty_not_error() {
        // Confirmed behavior from the original `detect_handler`: zero rows
        // is not an error, just nothing launched this round.
        let mock: Box<dyn PgConn> =
            Box::new(MockConn::new(vec![Scripted::Result(QueryResult::tuples(vec![]))]));
        let mut template = Some(mock);
        let names = discover(&mut template, &cfg()).await.unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn discover_opens_template_lazily_on_first_call() {
        // template starts `None`; discover() must create one via PgSocket.
        // Against an unreachable host this resolves to ConnectFailed, which
        // is the exercised path here (no live Postgres assumed available).
        let mut cfg = cfg();
        cfg.base_connstr = "host=127.0.0.1 port=1 connect_timeout=1".to_string();
        let mut template: Option<Box<dyn PgConn>> = None;
        assert!(discover(&mut template, &cfg).await.is_err());
        assert!(template.is_none());
    }
}
