use crate::jobs::result::ResultError;

/// Error kinds surfaced by the gateway core.
///
/// Callers match on the kind, not on the wrapped source: the HTTP layer maps
/// kinds to status codes, the consumer loops decide between skip-and-continue
/// (`Decode`) and fail-fast (`Database`, `Broker`, `Replication`).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    State(#[from] ResultError),

    #[error("cannot retry job when job status is {0}")]
    RetryNotAllowed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("replication error: {0}")]
    Replication(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

impl From<base64::DecodeError> for GatewayError {
    fn from(err: base64::DecodeError) -> Self {
        GatewayError::Decode(format!("invalid base64: {err}"))
    }
}

impl From<arrow::error::ArrowError> for GatewayError {
    fn from(err: arrow::error::ArrowError) -> Self {
        GatewayError::Decode(format!("invalid arrow stream: {err}"))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Replication(err.to_string())
    }
}
