//! Signal handling (§4.7, C8).
//!
//! SIGTERM exits immediately; SIGINT drains (cancels every worker loop,
//! waits for them to finish) and then exits; SIGHUP reloads the config file
//! and wakes the discovery loop to re-run reconciliation against it.
//! SIGPIPE needs no handling here: Rust's runtime already ignores it before
//! `main` runs, unlike a C process where pgqd had to block it itself.
//! Grounded on the teacher's `listen_for_shutdown_signals`
//! (`services/api/server/src/shutdown.rs`), generalized from its two-signal
//! select to pgqd's three.

use std::path::PathBuf;
use std::sync::Arc;

use pgqd_config::Config;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub enum Shutdown {
    Immediate,
    Graceful,
}

/// Runs until SIGTERM or SIGINT, notifying `reconcile_now` on every SIGHUP
/// after a successful reload. Returns which kind of shutdown was requested.
pub async fn run(
    config_path: PathBuf,
    config: Arc<RwLock<Arc<Config>>>,
    reconcile_now: Arc<Notify>,
    cancel: CancellationToken,
) -> Shutdown {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, exiting immediately");
                return Shutdown::Immediate;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, draining");
                return Shutdown::Graceful;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading config");
                match Config::load(&config_path) {
                    Ok(new_cfg) => {
                        *config.write().await = Arc::new(new_cfg);
                        reconcile_now.notify_one();
                    }
                    Err(e) => {
                        warn!(error = %e, "config reload failed, keeping previous configuration");
                    }
                }
            }
            _ = cancel.cancelled() => {
                return Shutdown::Graceful;
            }
        }
    }
}
