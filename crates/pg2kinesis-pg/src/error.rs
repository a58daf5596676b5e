use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("replication stream error: {0}")]
    Stream(String),

    #[error("replication slot '{0}' does not exist")]
    SlotNotFound(String),

    #[error("failed to create replication slot: {0}")]
    SlotCreationFailed(String),

    #[error("replication slot '{slot}' is unusable: {reason}")]
    SlotInvalid { slot: String, reason: String },

    #[error("failed to decode change payload: {reason}")]
    Decode { reason: String, payload: String },

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),
}

impl PgError {
    /// Transient errors are recovered with reconnect-and-backoff; anything
    /// else halts the worker for operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PgError::Postgres(_) | PgError::Connection(_) | PgError::Stream(_)
        )
    }

    pub fn decode(reason: impl Into<String>, payload: impl Into<String>) -> Self {
        PgError::Decode {
            reason: reason.into(),
            payload: payload.into(),
        }
    }
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            return PgError::Connection(e.to_string());
        }
        // Extract database error details if available
        if let Some(db_err) = e.as_db_error() {
            let msg = format!(
                "{}: {} (code: {})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            );
            PgError::Postgres(msg)
        } else {
            PgError::Postgres(e.to_string())
        }
    }
}

pub type PgResult<T> = Result<T, PgError>;
