use std::path::PathBuf;

/// Fatal, startup-only errors (§7 item 4, item 5). Anything reached after
/// the worker loops start is absorbed by reconnect/backoff instead — see
/// `ticker.rs`/`maint.rs`/`retry.rs`, none of which return a `Result` to
/// their caller.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error(transparent)]
    Config(#[from] pgqd_config::ConfigError),

    #[error("cannot write pidfile {path}: {source}")]
    Pidfile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no running pgqd found at pidfile {0}")]
    NoSuchProcess(PathBuf),

    #[error(transparent)]
    Signal(#[from] nix::Error),
}
