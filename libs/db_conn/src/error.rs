use thiserror::Error;

/// Failure kinds surfaced by a [`crate::PgConn`] implementation.
///
/// These are never propagated to a caller with `?` out of a worker loop (see
/// `pgqd`'s ticker/maintenance/retry loops) — they are logged and turned into a
/// `reconnect`-with-backoff. The enum exists so loops and tests can match on
/// *why* a connection failed rather than only on the fact that it did.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("connect failed: {0}")]
    Connect(#[source] tokio_postgres::Error),

    #[error("query failed: {0}")]
    Query(#[source] tokio_postgres::Error),

    #[error("not connected")]
    NotConnected,
}
