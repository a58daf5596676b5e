use std::time::Duration;

use pg2kinesis_core::{Backoff, BackoffConfig, TransactionBatch};
use tracing::{debug, info, warn};

use crate::client::{SinkRecord, StreamSink};
use crate::error::{SinkError, SinkResult};

/// Configuration for publishing to the downstream stream.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Target stream name.
    pub stream_name: String,
    /// Maximum records per sink call; larger batches are split. The split
    /// is transport-level only: a transaction is always fully published
    /// within one `publish` call.
    pub max_records_per_call: usize,
    /// Maximum retries per sink call before the batch fails.
    pub max_retries: u32,
    /// Base delay for the retry backoff.
    pub base_delay: Duration,
    /// Cap for the retry backoff.
    pub max_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            // Kinesis PutRecords accepts at most 500 records per call.
            max_records_per_call: 500,
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Emits transaction batches to the stream sink.
///
/// Holds no persistent state: each batch is serialized (one wire record per
/// event, partition key `schema.table`), written through, and either fully
/// acknowledged or failed. On success the batch's commit LSN is returned so
/// the position tracker can confirm it.
pub struct Publisher<S: StreamSink> {
    sink: S,
    config: PublisherConfig,
}

impl<S: StreamSink> Publisher<S> {
    pub fn new(sink: S, config: PublisherConfig) -> Self {
        Self { sink, config }
    }

    /// Publish one complete transaction batch. Never leaves a transaction
    /// partially visible: a failed call fails the whole batch, and the
    /// caller must not confirm its position.
    pub async fn publish(&self, batch: &TransactionBatch) -> SinkResult<u64> {
        if batch.is_empty() {
            // Empty transactions (e.g. only filtered tables changed) still
            // advance the confirmed position.
            return Ok(batch.commit_lsn);
        }

        let mut records = Vec::with_capacity(batch.len());
        for event in &batch.events {
            records.push(SinkRecord {
                partition_key: event.partition_key(),
                data: serde_json::to_vec(event)?,
            });
        }

        for chunk in records.chunks(self.config.max_records_per_call) {
            self.put_with_retry(chunk.to_vec()).await?;
        }

        info!(
            stream = %self.config.stream_name,
            xid = batch.xid,
            events = batch.len(),
            "Published transaction batch"
        );

        Ok(batch.commit_lsn)
    }

    async fn put_with_retry(&self, records: Vec<SinkRecord>) -> SinkResult<()> {
        let mut backoff = Backoff::new(BackoffConfig {
            base_delay: self.config.base_delay,
            max_delay: self.config.max_delay,
            max_attempts: self.config.max_retries,
        });

        loop {
            match self
                .sink
                .put_records(&self.config.stream_name, records.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            stream = %self.config.stream_name,
                            attempt = backoff.attempt(),
                            max_retries = self.config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Sink write failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(SinkError::RetriesExhausted {
                            attempts: backoff.attempt(),
                            last: e.to_string(),
                        });
                    }
                },
                Err(e) => {
                    debug!(error = %e, "Sink write failed permanently");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSink;
    use pg2kinesis_core::{ChangeEvent, Operation, Value};

    fn config(stream: &str) -> PublisherConfig {
        PublisherConfig {
            stream_name: stream.to_string(),
            max_records_per_call: 500,
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn batch(xid: u32, commit_lsn: u64, tables: &[&str]) -> TransactionBatch {
        let events = tables
            .iter()
            .enumerate()
            .map(|(i, table)| ChangeEvent {
                op: Operation::Insert,
                schema: "public".into(),
                table: table.to_string(),
                new: Some([("id".into(), Value::Int(i as i64))].into_iter().collect()),
                old: None,
                lsn: commit_lsn - tables.len() as u64 + i as u64,
                xid,
                commit_timestamp: Some("2024-05-01 12:00:00+00".into()),
            })
            .collect();

        TransactionBatch {
            xid,
            commit_lsn,
            commit_timestamp: Some("2024-05-01 12:00:00+00".into()),
            events,
        }
    }

    #[tokio::test]
    async fn test_publish_one_record_per_event_with_table_partition_key() {
        let sink = MockSink::new();
        let publisher = Publisher::new(sink.clone(), config("events"));

        let lsn = publisher
            .publish(&batch(700, 120, &["orders", "orders", "orders"]))
            .await
            .unwrap();

        assert_eq!(lsn, 120);
        let writes = sink.get_writes("events");
        assert_eq!(writes.len(), 1, "one transaction, one sink batch");
        assert_eq!(writes[0].len(), 3);
        assert!(writes[0]
            .iter()
            .all(|r| r.partition_key == "public.orders"));

        // Each record carries the transaction id and commit time.
        let decoded: ChangeEvent = serde_json::from_slice(&writes[0][0].data).unwrap();
        assert_eq!(decoded.xid, 700);
        assert!(decoded.commit_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_publish_splits_oversized_batches() {
        let sink = MockSink::new();
        let mut cfg = config("events");
        cfg.max_records_per_call = 2;
        let publisher = Publisher::new(sink.clone(), cfg);

        publisher
            .publish(&batch(1, 100, &["a", "b", "c", "d", "e"]))
            .await
            .unwrap();

        let writes = sink.get_writes("events");
        assert_eq!(writes.len(), 3);
        assert_eq!(writes.iter().map(|w| w.len()).sum::<usize>(), 5);
    }

    #[tokio::test]
    async fn test_publish_retries_throttling_then_succeeds() {
        let sink = MockSink::new();
        sink.throttle_next(2);
        let publisher = Publisher::new(sink.clone(), config("events"));

        publisher.publish(&batch(1, 100, &["t"])).await.unwrap();

        assert_eq!(sink.total_calls(), 3);
        assert_eq!(sink.total_batches(), 1);
    }

    #[tokio::test]
    async fn test_publish_exhausts_retries() {
        let sink = MockSink::new();
        sink.throttle_next(10);
        let publisher = Publisher::new(sink.clone(), config("events"));

        let err = publisher.publish(&batch(1, 100, &["t"])).await.unwrap_err();
        assert!(matches!(
            err,
            SinkError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(sink.total_batches(), 0, "nothing was accepted");
    }

    #[tokio::test]
    async fn test_publish_fails_fast_on_permanent_error() {
        let sink = MockSink::failing("access denied");
        let publisher = Publisher::new(sink.clone(), config("events"));

        let err = publisher.publish(&batch(1, 100, &["t"])).await.unwrap_err();
        assert!(matches!(err, SinkError::Service { .. }));
        assert_eq!(sink.total_calls(), 1, "permanent errors are not retried");
    }

    #[tokio::test]
    async fn test_empty_batch_advances_without_writing() {
        let sink = MockSink::new();
        let publisher = Publisher::new(sink.clone(), config("events"));

        let lsn = publisher.publish(&batch(1, 50, &[])).await.unwrap();
        assert_eq!(lsn, 50);
        assert_eq!(sink.total_calls(), 0);
    }
}
