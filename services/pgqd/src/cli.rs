//! CLI surface (§6): `pgqd [switches] <config-file>`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "pgqd", version, about = "Queue-maintenance ticker daemon")]
pub struct Cli {
    /// Daemonize after startup.
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Increase verbosity; repeatable.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease verbosity to warnings and errors only.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Print a commented sample config file and exit.
    #[arg(long = "ini")]
    pub print_ini: bool,

    /// Send SIGINT (graceful shutdown) to the running daemon and exit.
    #[arg(short = 's')]
    pub signal_int: bool,

    /// Send SIGTERM (immediate exit) to the running daemon and exit.
    #[arg(short = 'k')]
    pub signal_term: bool,

    /// Send SIGHUP (reload config, reconcile) to the running daemon and exit.
    #[arg(short = 'r')]
    pub signal_hup: bool,

    /// Path to the INI config file. Required unless `--ini` is given.
    pub config_file: Option<PathBuf>,
}

impl Cli {
    /// The effective `tracing` filter directive implied by `-v`/`-q` (§6).
    /// `-q` wins over any number of `-v`; the default with neither is `info`.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn one_shot_signal(&self) -> Option<OneShotSignal> {
        if self.signal_int {
            Some(OneShotSignal::Int)
        } else if self.signal_term {
            Some(OneShotSignal::Term)
        } else if self.signal_hup {
            Some(OneShotSignal::Hup)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShotSignal {
    Int,
    Term,
    Hup,
}
