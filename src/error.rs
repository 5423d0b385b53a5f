//! Service-wide error taxonomy
//!
//! Decision-path variants map onto the authorization response; metering-path
//! variants are only ever logged and counted.

use thiserror::Error;

use crate::db::DbError;
use crate::quota::CounterError;

#[derive(Debug, Error)]
pub enum GateError {
    /// Missing, malformed, unknown or revoked credential
    #[error("authorization denied: {0}")]
    AuthDenied(&'static str),

    #[error("quota exceeded for {window} window ({count} > {limit})")]
    QuotaExceeded {
        window: &'static str,
        count: i64,
        limit: i64,
    },

    /// Credential or counter store unreachable or too slow
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Access-log entry without attribution. Expected traffic, never a failure.
    #[error("log entry dropped: {0}")]
    IngestDropped(&'static str),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("external report failure: {0}")]
    ExternalReportFailure(String),
}

impl From<DbError> for GateError {
    fn from(e: DbError) -> Self {
        GateError::StoreUnavailable(e.to_string())
    }
}

impl From<CounterError> for GateError {
    fn from(e: CounterError) -> Self {
        GateError::StoreUnavailable(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GateError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GateError::StoreUnavailable("timed out".to_string())
    }
}
