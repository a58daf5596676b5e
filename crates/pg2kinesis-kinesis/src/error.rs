use thiserror::Error;

/// Errors from the downstream stream sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink throttled the write")]
    Throttled,

    #[error("network error: {0}")]
    Network(String),

    #[error("sink service error ({code}): {message}")]
    Service { code: String, message: String },

    #[error("record rejected ({code}): {message}")]
    RecordRejected { code: String, message: String },

    #[error("sink write failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SinkError::Throttled | SinkError::Network(_) | SinkError::RecordRejected { .. }
        )
    }
}

pub type SinkResult<T> = Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SinkError::Throttled.is_retryable());
        assert!(SinkError::Network("reset".into()).is_retryable());
        assert!(!SinkError::Service {
            code: "ValidationException".into(),
            message: "bad stream name".into()
        }
        .is_retryable());
        assert!(!SinkError::RetriesExhausted {
            attempts: 5,
            last: "throttled".into()
        }
        .is_retryable());
    }
}
