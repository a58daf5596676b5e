use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::client::{SinkRecord, StreamSink};
use crate::error::{SinkError, SinkResult};

/// A mock stream sink for testing.
#[derive(Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Successful record batches by stream name.
    writes: HashMap<String, Vec<Vec<SinkRecord>>>,
    /// Number of upcoming calls to reject as throttled before succeeding.
    throttle_next: u32,
    /// If set, all writes fail permanently with this message.
    fail_with: Option<String>,
    /// Total put_records calls, including failed ones.
    calls: u32,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink whose writes always fail.
    pub fn failing(error_message: impl Into<String>) -> Self {
        let sink = Self::new();
        sink.state.lock().unwrap().fail_with = Some(error_message.into());
        sink
    }

    /// Throttle the next `n` calls, then accept writes again.
    pub fn throttle_next(&self, n: u32) {
        self.state.lock().unwrap().throttle_next = n;
    }

    /// Successful batches written to a stream.
    pub fn get_writes(&self, stream: &str) -> Vec<Vec<SinkRecord>> {
        let state = self.state.lock().unwrap();
        state.writes.get(stream).cloned().unwrap_or_default()
    }

    /// Total number of successful batches across all streams.
    pub fn total_batches(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.writes.values().map(|v| v.len()).sum()
    }

    /// Total records accepted across all streams.
    pub fn total_records(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .writes
            .values()
            .flat_map(|v| v.iter())
            .map(|b| b.len())
            .sum()
    }

    /// Total put_records calls, including throttled and failed ones.
    pub fn total_calls(&self) -> u32 {
        self.state.lock().unwrap().calls
    }

    /// Clear all recorded writes.
    pub fn clear(&self) {
        self.state.lock().unwrap().writes.clear();
    }
}

impl StreamSink for MockSink {
    fn put_records(
        &self,
        stream: &str,
        records: Vec<SinkRecord>,
    ) -> impl Future<Output = SinkResult<()>> + Send {
        let state = self.state.clone();
        let stream = stream.to_string();
        async move {
            let mut state = state.lock().unwrap();
            state.calls += 1;

            if let Some(ref error) = state.fail_with {
                return Err(SinkError::Service {
                    code: "MockFailure".to_string(),
                    message: error.clone(),
                });
            }

            if state.throttle_next > 0 {
                state.throttle_next -= 1;
                return Err(SinkError::Throttled);
            }

            state.writes.entry(stream).or_default().push(records);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<SinkRecord> {
        (0..n)
            .map(|i| SinkRecord {
                partition_key: "public.users".to_string(),
                data: format!("{{\"i\":{}}}", i).into_bytes(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_mock_sink_records_writes() {
        let sink = MockSink::new();

        sink.put_records("events", records(3)).await.unwrap();
        sink.put_records("events", records(2)).await.unwrap();

        assert_eq!(sink.total_batches(), 2);
        assert_eq!(sink.total_records(), 5);
        assert_eq!(sink.get_writes("events")[0].len(), 3);
    }

    #[tokio::test]
    async fn test_mock_sink_throttles_then_recovers() {
        let sink = MockSink::new();
        sink.throttle_next(2);

        assert!(matches!(
            sink.put_records("events", records(1)).await,
            Err(SinkError::Throttled)
        ));
        assert!(matches!(
            sink.put_records("events", records(1)).await,
            Err(SinkError::Throttled)
        ));
        assert!(sink.put_records("events", records(1)).await.is_ok());
        assert_eq!(sink.total_calls(), 3);
        assert_eq!(sink.total_batches(), 1);
    }

    #[tokio::test]
    async fn test_mock_sink_failing() {
        let sink = MockSink::failing("simulated outage");
        let result = sink.put_records("events", records(1)).await;
        assert!(matches!(result, Err(SinkError::Service { .. })));
        assert_eq!(sink.total_batches(), 0);
    }
}
