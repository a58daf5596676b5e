pub mod assembler;
pub mod backoff;
pub mod error;
pub mod position;
pub mod types;

pub use assembler::{DecodedMessage, TxnAssembler};
pub use backoff::{Backoff, BackoffConfig};
pub use error::{Error, Result};
pub use position::PositionTracker;
pub use types::{ChangeEvent, Operation, RowMap, TransactionBatch, Value};
