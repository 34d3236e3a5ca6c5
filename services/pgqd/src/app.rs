//! Ties the registry, discovery, signal handling and stats timer together
//! into the running daemon (§2 "Data flow").

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pgqd_config::Config;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::registry::Registry;
use crate::signals::{self, Shutdown};
use crate::{discovery, pidfile};

pub async fn run(config_path: PathBuf, initial_config: Config) -> anyhow::Result<()> {
    pidfile::write(&initial_config.pidfile)?;
    let pidfile_path = initial_config.pidfile.clone();
    let result = run_inner(config_path, initial_config).await;
    pidfile::remove(&pidfile_path);
    result
}

async fn run_inner(config_path: PathBuf, initial_config: Config) -> anyhow::Result<()> {
    let stats = Arc::new(telemetry::Stats::new()?);
    let config = Arc::new(RwLock::new(Arc::new(initial_config)));
    let registry = Arc::new(Mutex::new(Registry::new()));
    let reconcile_now = Arc::new(Notify::new());
    let cancel = CancellationToken::new();

    let stats_period = config.read().await.stats_period;

    let discovery_task = tokio::spawn(discovery::run(
        registry.clone(),
        config.clone(),
        stats.clone(),
        reconcile_now.clone(),
        cancel.clone(),
    ));

    let stats_task = tokio::spawn(stats_loop(stats.clone(), stats_period, cancel.clone()));

    let shutdown_kind = signals::run(config_path, config, reconcile_now, cancel.clone()).await;

    match shutdown_kind {
        Shutdown::Immediate => {
            info!("shutting down immediately");
        }
        Shutdown::Graceful => {
            info!("draining before shutdown");
            cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(10), discovery_task).await;
            let _ = tokio::time::timeout(Duration::from_secs(10), stats_task).await;
            drain_registry(registry).await;
        }
    }

    Ok(())
}

async fn drain_registry(registry: Arc<Mutex<Registry>>) {
    let names: Vec<String> = registry.lock().await.names().map(str::to_string).collect();
    let mut reg = registry.lock().await;
    for name in names {
        reg.drop_db(&name).await;
    }
}

/// Stats timer (§4.8 C9): logs and zeroes the window counters every
/// `stats_period`.
async fn stats_loop(stats: Arc<telemetry::Stats>, period: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(period) => stats.log_and_reset(),
        }
    }
}
