use crate::error::{Error, Result};
use crate::types::{ChangeEvent, TransactionBatch};

/// One decoded message from the logical decoding stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    /// Transaction begin marker.
    Begin { xid: u32 },
    /// A row-level change inside the current transaction.
    Change(ChangeEvent),
    /// Transaction commit marker. `end_lsn` is the commit record's LSN.
    Commit {
        end_lsn: u64,
        timestamp: Option<String>,
    },
    /// Non-data control message (logical message, truncate, keepalive).
    Skip,
}

/// Folds decoded messages into complete transaction batches.
///
/// wal2json serializes transactions, so at most one is in flight at a time.
/// A batch is released only when its commit marker arrives; a partial
/// transaction left behind after a disconnect is simply discarded and
/// re-delivered on the next attach.
#[derive(Debug, Default)]
pub struct TxnAssembler {
    current: Option<PendingTxn>,
}

#[derive(Debug)]
struct PendingTxn {
    xid: u32,
    events: Vec<ChangeEvent>,
}

impl TxnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one message. Returns a complete batch when a commit closes the
    /// in-flight transaction.
    pub fn push(&mut self, msg: DecodedMessage) -> Result<Option<TransactionBatch>> {
        match msg {
            DecodedMessage::Begin { xid } => {
                // A begin while a transaction is open means the previous one
                // was cut off mid-stream; its changes cannot be trusted.
                self.current = Some(PendingTxn {
                    xid,
                    events: Vec::new(),
                });
                Ok(None)
            }
            DecodedMessage::Change(event) => match self.current.as_mut() {
                Some(txn) => {
                    txn.events.push(event);
                    Ok(None)
                }
                None => Err(Error::OrphanedChange {
                    lsn: event.lsn,
                    xid: event.xid,
                }),
            },
            DecodedMessage::Commit { end_lsn, timestamp } => match self.current.take() {
                Some(txn) => {
                    let mut events = txn.events;
                    for event in &mut events {
                        event.commit_timestamp = timestamp.clone();
                    }
                    Ok(Some(TransactionBatch {
                        xid: txn.xid,
                        commit_lsn: end_lsn,
                        commit_timestamp: timestamp,
                        events,
                    }))
                }
                None => Err(Error::OrphanedCommit { lsn: end_lsn }),
            },
            DecodedMessage::Skip => Ok(None),
        }
    }

    /// True if a transaction is open and not yet committed.
    pub fn in_transaction(&self) -> bool {
        self.current.is_some()
    }

    /// Drop any partial transaction, e.g. before re-attaching after a
    /// disconnect. The source re-delivers it from the confirmed position.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operation, Value};

    fn change(xid: u32, lsn: u64, table: &str) -> ChangeEvent {
        ChangeEvent {
            op: Operation::Insert,
            schema: "public".into(),
            table: table.into(),
            new: Some([("id".into(), Value::Int(lsn as i64))].into_iter().collect()),
            old: None,
            lsn,
            xid,
            commit_timestamp: None,
        }
    }

    #[test]
    fn test_assembles_complete_transaction() {
        let mut asm = TxnAssembler::new();

        assert!(asm.push(DecodedMessage::Begin { xid: 700 }).unwrap().is_none());
        assert!(asm.push(DecodedMessage::Change(change(700, 10, "orders"))).unwrap().is_none());
        assert!(asm.push(DecodedMessage::Change(change(700, 11, "orders"))).unwrap().is_none());
        assert!(asm.in_transaction());

        let batch = asm
            .push(DecodedMessage::Commit {
                end_lsn: 12,
                timestamp: Some("2024-01-01 00:00:00".into()),
            })
            .unwrap()
            .expect("commit should release the batch");

        assert_eq!(batch.xid, 700);
        assert_eq!(batch.commit_lsn, 12);
        assert_eq!(batch.events.len(), 2);
        // Statement order preserved, commit timestamp backfilled.
        assert_eq!(batch.events[0].lsn, 10);
        assert_eq!(batch.events[1].lsn, 11);
        assert!(batch.events.iter().all(|e| e.commit_timestamp.is_some()));
        assert!(!asm.in_transaction());
    }

    #[test]
    fn test_empty_transaction_yields_empty_batch() {
        let mut asm = TxnAssembler::new();
        asm.push(DecodedMessage::Begin { xid: 1 }).unwrap();
        let batch = asm
            .push(DecodedMessage::Commit {
                end_lsn: 5,
                timestamp: None,
            })
            .unwrap()
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.commit_lsn, 5);
    }

    #[test]
    fn test_skip_messages_do_not_emit() {
        let mut asm = TxnAssembler::new();
        assert!(asm.push(DecodedMessage::Skip).unwrap().is_none());
        asm.push(DecodedMessage::Begin { xid: 2 }).unwrap();
        assert!(asm.push(DecodedMessage::Skip).unwrap().is_none());
        assert!(asm.in_transaction());
    }

    #[test]
    fn test_orphaned_change_is_an_error() {
        let mut asm = TxnAssembler::new();
        let err = asm
            .push(DecodedMessage::Change(change(9, 42, "users")))
            .unwrap_err();
        assert!(matches!(err, Error::OrphanedChange { lsn: 42, xid: 9 }));
    }

    #[test]
    fn test_orphaned_commit_is_an_error() {
        let mut asm = TxnAssembler::new();
        let err = asm
            .push(DecodedMessage::Commit {
                end_lsn: 99,
                timestamp: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::OrphanedCommit { lsn: 99 }));
    }

    #[test]
    fn test_reset_discards_partial_transaction() {
        let mut asm = TxnAssembler::new();
        asm.push(DecodedMessage::Begin { xid: 3 }).unwrap();
        asm.push(DecodedMessage::Change(change(3, 1, "t"))).unwrap();
        asm.reset();
        assert!(!asm.in_transaction());

        // Re-delivery after reset starts a fresh transaction cleanly.
        asm.push(DecodedMessage::Begin { xid: 3 }).unwrap();
        asm.push(DecodedMessage::Change(change(3, 1, "t"))).unwrap();
        let batch = asm
            .push(DecodedMessage::Commit {
                end_lsn: 2,
                timestamp: None,
            })
            .unwrap()
            .unwrap();
        assert_eq!(batch.events.len(), 1);
    }
}
