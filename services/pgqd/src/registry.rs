//! Database registry (§3 "Database record", §4.6 C6) and reconciliation (§4.6 C7).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use db_conn::{PgConn, PgSocket};
use pgqd_config::Config;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::maint::{self, MaintConfig};
use crate::retry::{self, RetryConfig};
use crate::ticker::{self, TickerConfig};

struct MaintRetryHandles {
    maint: JoinHandle<()>,
    maint_cancel: CancellationToken,
    retry: JoinHandle<()>,
    retry_cancel: CancellationToken,
}

/// One entry per managed database (§3 `PgDatabase`). Connections aren't
/// modeled as fields here the way §3 names `c_ticker`/`c_maint`/`c_retry` —
/// each is owned outright by the tokio task driving it instead of by this
/// record, which only holds the handles needed to cancel and join them. The
/// maintenance/retry tasks are spawned lazily, from inside the ticker task,
/// the moment it confirms a good `pgq.version()` (§8 "version gating").
pub struct PgDatabase {
    pub name: String,
    pub has_pgq: Arc<AtomicBool>,
    ticker: JoinHandle<()>,
    ticker_cancel: CancellationToken,
    maint_retry: Arc<std::sync::Mutex<Option<MaintRetryHandles>>>,
    dropped: bool,
}

impl PgDatabase {
    fn spawn(name: String, cfg: Arc<Config>, stats: Arc<telemetry::Stats>) -> Self {
        let has_pgq = Arc::new(AtomicBool::new(false));
        let ticker_cancel = CancellationToken::new();
        let maint_retry: Arc<std::sync::Mutex<Option<MaintRetryHandles>>> =
            Arc::new(std::sync::Mutex::new(None));

        let connstr = cfg.make_connstr(&name);
        let ticker_conn: Box<dyn PgConn> = Box::new(PgSocket::new(connstr.clone()));

        let on_confirmed = {
            let name = name.clone();
            let cfg = cfg.clone();
            let stats = stats.clone();
            let ticker_cancel_child = ticker_cancel.clone();
            let maint_retry = maint_retry.clone();
            move || {
                let mut slot = maint_retry.lock().expect("maint_retry mutex poisoned");
                if slot.is_some() {
                    return;
                }
                info!(db = %name, "pgq confirmed, launching maintenance and retry loops");

                let maint_cancel = ticker_cancel_child.child_token();
                let maint_conn: Box<dyn PgConn> =
                    Box::new(PgSocket::new(cfg.make_connstr(&name)));
                let maint = tokio::spawn(maint::run(
                    maint_conn,
                    maint_cancel.clone(),
                    MaintConfig {
                        maint_period: cfg.maint_period,
                    },
                    stats.clone(),
                ));

                let retry_cancel = ticker_cancel_child.child_token();
                let retry_conn: Box<dyn PgConn> =
                    Box::new(PgSocket::new(cfg.make_connstr(&name)));
                let retry = tokio::spawn(retry::run(
                    retry_conn,
                    retry_cancel.clone(),
                    RetryConfig {
                        retry_period: cfg.retry_period,
                    },
                    stats.clone(),
                ));

                *slot = Some(MaintRetryHandles {
                    maint,
                    maint_cancel,
                    retry,
                    retry_cancel,
                });
            }
        };

        let ticker = tokio::spawn(ticker::run(
            ticker_conn,
            ticker_cancel.clone(),
            TickerConfig {
                check_period: cfg.check_period,
                ticker_period: cfg.ticker_period,
                connection_lifetime: cfg.connection_lifetime,
            },
            has_pgq.clone(),
            stats,
            on_confirmed,
        ));

        Self {
            name,
            has_pgq,
            ticker,
            ticker_cancel,
            maint_retry,
            dropped: false,
        }
    }

    /// Cancels and aborts all owned loops. Safe to call in any state (§8
    /// invariant "`drop_db(db)` is safe for any record in any state").
    async fn shutdown(self) {
        self.ticker_cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), self.ticker).await;

        let handles = self
            .maint_retry
            .lock()
            .expect("maint_retry mutex poisoned")
            .take();
        if let Some(h) = handles {
            h.maint_cancel.cancel();
            h.retry_cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(2), h.maint).await;
            let _ = tokio::time::timeout(Duration::from_secs(2), h.retry).await;
        }
    }
}

/// The live set of managed databases (§3 invariant: "a map keyed by name
/// with unique keys").
#[derive(Default)]
pub struct Registry {
    databases: HashMap<String, PgDatabase>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    /// §4.6 `launch_db`: idempotent — a database that already has a live
    /// ticker is never given a second connection (§8 "ticker idempotence").
    pub fn launch_db(&mut self, name: &str, cfg: Arc<Config>, stats: Arc<telemetry::Stats>) {
        if let Some(db) = self.databases.get_mut(name) {
            db.dropped = false;
            return;
        }
        let db = PgDatabase::spawn(name.to_string(), cfg, stats);
        self.databases.insert(db.name.clone(), db);
    }

    /// §4.6 `drop_db`: removes the record and frees its three connections.
    pub async fn drop_db(&mut self, name: &str) {
        if let Some(db) = self.databases.remove(name) {
            info!(db = %name, "dropping database record");
            db.shutdown().await;
        }
    }

    fn tag_all_dropped(&mut self) {
        for db in self.databases.values_mut() {
            db.dropped = true;
        }
    }

    fn tagged_dropped_names(&self) -> Vec<String> {
        self.databases
            .iter()
            .filter(|(_, db)| db.dropped)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Two-phase tag-then-sweep reconciliation (§3, §9): tag every existing
    /// record dropped, launch/un-tag every name in `wanted`, then sweep any
    /// record still tagged. Idempotent: running it twice with the same
    /// `wanted` set leaves the registry unchanged (§8).
    pub async fn reconcile(&mut self, wanted: &[String], cfg: Arc<Config>, stats: Arc<telemetry::Stats>) {
        self.tag_all_dropped();
        for name in wanted {
            self.launch_db(name, cfg.clone(), stats.clone());
        }
        for name in self.tagged_dropped_names() {
            self.drop_db(&name).await;
        }
    }
}
