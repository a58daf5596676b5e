use std::future::Future;

use aws_sdk_kinesis::error::ProvideErrorMetadata;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::PutRecordsRequestEntry;
use tracing::{debug, warn};

use crate::error::{SinkError, SinkResult};

/// One wire record for the downstream stream: an opaque payload routed by
/// partition key.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub partition_key: String,
    pub data: Vec<u8>,
}

/// Trait for the downstream append-only, partition-keyed stream.
pub trait StreamSink: Send + Sync {
    /// Write a batch of records to the named stream. The write is atomic
    /// from the caller's perspective: any rejected record fails the call.
    fn put_records(
        &self,
        stream: &str,
        records: Vec<SinkRecord>,
    ) -> impl Future<Output = SinkResult<()>> + Send;
}

/// Sink backed by AWS Kinesis.
pub struct KinesisSink {
    client: aws_sdk_kinesis::Client,
}

impl KinesisSink {
    pub fn new(client: aws_sdk_kinesis::Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS environment (credentials chain,
    /// region, endpoint overrides).
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_kinesis::Client::new(&sdk_config),
        }
    }
}

impl StreamSink for KinesisSink {
    fn put_records(
        &self,
        stream: &str,
        records: Vec<SinkRecord>,
    ) -> impl Future<Output = SinkResult<()>> + Send {
        let client = self.client.clone();
        let stream = stream.to_string();

        async move {
            let mut entries = Vec::with_capacity(records.len());
            for record in records {
                let entry = PutRecordsRequestEntry::builder()
                    .data(Blob::new(record.data))
                    .partition_key(record.partition_key)
                    .build()
                    .map_err(|e| SinkError::Service {
                        code: "InvalidRecord".to_string(),
                        message: e.to_string(),
                    })?;
                entries.push(entry);
            }
            let count = entries.len();

            let output = client
                .put_records()
                .stream_name(&stream)
                .set_records(Some(entries))
                .send()
                .await
                .map_err(|e| {
                    if let Some(service_err) = e.as_service_error() {
                        if service_err.is_provisioned_throughput_exceeded_exception() {
                            return SinkError::Throttled;
                        }
                        return SinkError::Service {
                            code: service_err.meta().code().unwrap_or("unknown").to_string(),
                            message: e.to_string(),
                        };
                    }
                    SinkError::Network(e.to_string())
                })?;

            let failed = output.failed_record_count().unwrap_or(0);
            if failed > 0 {
                // Per-record failures (usually shard throttling) fail the
                // whole call; the publisher re-sends the batch.
                let first = output
                    .records()
                    .iter()
                    .find(|r| r.error_code().is_some());
                let code = first
                    .and_then(|r| r.error_code())
                    .unwrap_or("unknown")
                    .to_string();
                let message = first
                    .and_then(|r| r.error_message())
                    .unwrap_or("record rejected by sink")
                    .to_string();
                warn!(stream = %stream, failed, code = %code, "Partial put_records failure");
                return Err(SinkError::RecordRejected { code, message });
            }

            debug!(stream = %stream, count, "Wrote records to sink");
            Ok(())
        }
    }
}
