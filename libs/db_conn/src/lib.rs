//! Async, nonblocking-style database connection primitive (§4.2 / C2).
//!
//! Exposes [`PgConn`], the trait every per-database worker loop programs
//! against, with [`PgSocket`] as the real `tokio-postgres`-backed
//! implementation and (behind the `mock` feature) `mock::MockConn` as a
//! scripted test double.

mod error;
mod result;
mod socket;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::ConnError;
pub use result::{QueryResult, ResultRow};
pub use socket::{ConnEvent, PgConn, PgSocket, WaitState};
