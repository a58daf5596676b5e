use thiserror::Error;

/// Errors that can occur in pg2kinesis-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("change at {lsn} arrived outside a transaction (xid {xid})")]
    OrphanedChange { lsn: u64, xid: u32 },

    #[error("commit marker at {lsn} without a matching begin")]
    OrphanedCommit { lsn: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
