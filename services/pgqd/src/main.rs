//! Binary entrypoint: CLI parsing (§6), logging setup, and the three
//! `-s`/`-k`/`-r` one-shot signal switches, before handing off to
//! [`app::run`] for the long-running daemon.
//!
//! Grounded on the teacher's `services/api/server/src/main.rs` `main()`/
//! `setup()` split: a synchronous `main` builds a multi-threaded `tokio`
//! runtime and `block_on`s an async `setup`, which does logging init first
//! (so every subsequent line, including config errors, is logged) and then
//! the real work.

mod app;
mod cli;
mod discovery;
mod error;
mod maint;
mod pidfile;
mod registry;
mod retry;
mod signals;
mod sql;
mod ticker;

use std::path::PathBuf;

use clap::Parser;
use cli::{Cli, OneShotSignal};
use error::FatalError;
use pgqd_config::Config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();

    // `fork(2)` only duplicates the calling thread; it must happen before
    // the multi-threaded tokio runtime below spawns its worker pool, or the
    // child inherits a runtime with half its threads missing.
    if cli.daemonize && cli.one_shot_signal().is_none() && !cli.print_ini {
        if let Err(e) = daemonize() {
            eprintln!("pgqd: fatal: {e:#}");
            std::process::exit(1);
        }
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async {
            if let Err(e) = setup(cli).await {
                // init_logging may not have run yet (e.g. bad CLI args
                // never reach here, but a fatal config-load error can) —
                // eprintln is the fallback of last resort, mirroring the
                // teacher's `tracing::error!("Fatal error during setup")`
                // plus process::exit(1).
                eprintln!("pgqd: fatal: {e:#}");
                std::process::exit(1);
            }
        });
}

async fn setup(cli: Cli) -> anyhow::Result<()> {
    if cli.print_ini {
        print!("{}", Config::sample());
        return Ok(());
    }

    let Some(config_path) = cli.config_file.clone() else {
        anyhow::bail!("a config file is required unless --ini is given");
    };

    if let Some(sig) = cli.one_shot_signal() {
        return run_one_shot(&config_path, sig).map_err(Into::into);
    }

    init_logging(cli.log_level(), cli.daemonize);

    let config = Config::load(&config_path).map_err(FatalError::from)?;

    app::run(config_path, config).await
}

/// §6 CLI one-shots: read the pidfile named by the config and signal the
/// running daemon, then exit. No logging subsystem is initialized for this
/// path — it's a thin, synchronous client operation, not part of the daemon.
fn run_one_shot(config_path: &PathBuf, sig: OneShotSignal) -> Result<(), FatalError> {
    let config = Config::load(config_path)?;
    match sig {
        OneShotSignal::Int => pidfile::sigint(&config.pidfile),
        OneShotSignal::Term => pidfile::sigterm(&config.pidfile),
        OneShotSignal::Hup => pidfile::sighup(&config.pidfile),
    }
}

/// Grounded on the teacher's `setup()` pretty-vs-json `EnvFilter`/
/// `fmt::layer()` split (`services/api/server/src/main.rs`): pretty for an
/// interactive terminal, JSON once daemonized, toggled here by `-d` instead
/// of a config key since §6 ties `syslog`/`logfile` to the *destination*,
/// not the format.
fn init_logging(default_level: &str, daemonized: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    if daemonized {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .json();
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

/// §6 `-d`: daemonize after startup. The pidfile is written by `app::run`
/// after this returns, so it records the forked child's pid, not the
/// parent's. Called from `main` before the tokio runtime is built.
#[cfg(unix)]
fn daemonize() -> anyhow::Result<()> {
    use nix::unistd::{ForkResult, fork, setsid};

    // Safety: called before any thread other than the initial one exists.
    match unsafe { fork() }.map_err(|e| anyhow::anyhow!("fork failed: {e}"))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {
            setsid().map_err(|e| anyhow::anyhow!("setsid failed: {e}"))?;
            Ok(())
        }
    }
}
