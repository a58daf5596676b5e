//! Scripted replication source for worker-loop tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::{PgError, PgResult};
use crate::session::{RawEntry, RawSegment, ReplicationSource, SourceConnector};

/// A scripted source that plays back a fixed sequence of segments and
/// errors, recording every acknowledged position.
pub struct MockSource {
    steps: VecDeque<PgResult<Option<RawSegment>>>,
    acks: Arc<Mutex<Vec<u64>>>,
    confirmed: u64,
}

impl MockSource {
    pub fn new(confirmed: u64) -> Self {
        Self {
            steps: VecDeque::new(),
            acks: Arc::new(Mutex::new(Vec::new())),
            confirmed,
        }
    }

    /// Queue a segment of raw entries, given as (lsn, xid, payload).
    pub fn push_segment(mut self, entries: &[(u64, u32, &str)]) -> Self {
        self.steps.push_back(Ok(Some(RawSegment {
            entries: entries
                .iter()
                .map(|(lsn, xid, data)| RawEntry {
                    lsn: *lsn,
                    xid: *xid,
                    data: data.to_string(),
                })
                .collect(),
        })));
        self
    }

    /// Queue an error to be returned from the next fetch.
    pub fn push_error(mut self, err: PgError) -> Self {
        self.steps.push_back(Err(err));
        self
    }

    /// Handle to the positions acknowledged so far.
    pub fn acks(&self) -> Arc<Mutex<Vec<u64>>> {
        self.acks.clone()
    }

    fn with_acks(mut self, acks: Arc<Mutex<Vec<u64>>>) -> Self {
        self.acks = acks;
        self
    }
}

impl ReplicationSource for MockSource {
    fn next_segment(&mut self) -> impl Future<Output = PgResult<Option<RawSegment>>> + Send {
        // Exhausting the script ends the stream.
        let step = self.steps.pop_front().unwrap_or(Ok(None));
        async move { step }
    }

    fn acknowledge(&mut self, lsn: u64) -> impl Future<Output = PgResult<()>> + Send {
        if lsn > self.confirmed {
            self.confirmed = lsn;
        }
        self.acks.lock().unwrap().push(lsn);
        async move { Ok(()) }
    }

    fn confirmed_flush_lsn(&mut self) -> impl Future<Output = PgResult<u64>> + Send {
        let confirmed = self.confirmed;
        async move { Ok(confirmed) }
    }
}

/// Connector handing out a scripted sequence of sessions. Queue an `Err` to
/// simulate a connection attempt that fails.
#[derive(Clone, Default)]
pub struct MockConnector {
    sessions: Arc<Mutex<VecDeque<PgResult<MockSource>>>>,
    acks: Arc<Mutex<Vec<u64>>>,
    connect_attempts: Arc<Mutex<u32>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a session; its acknowledgments land in this connector's
    /// shared ack log so tests can observe them across reconnects.
    pub fn push_session(&self, source: MockSource) {
        let source = source.with_acks(self.acks.clone());
        self.sessions.lock().unwrap().push_back(Ok(source));
    }

    /// Queue a failed connection attempt.
    pub fn push_failure(&self, err: PgError) {
        self.sessions.lock().unwrap().push_back(Err(err));
    }

    /// Positions acknowledged by every session handed out so far.
    pub fn acks(&self) -> Vec<u64> {
        self.acks.lock().unwrap().clone()
    }

    /// Number of connection attempts made.
    pub fn connect_attempts(&self) -> u32 {
        *self.connect_attempts.lock().unwrap()
    }
}

impl SourceConnector for MockConnector {
    type Source = MockSource;

    fn connect(&self) -> impl Future<Output = PgResult<MockSource>> + Send {
        *self.connect_attempts.lock().unwrap() += 1;
        let next = self.sessions.lock().unwrap().pop_front();
        async move {
            match next {
                Some(result) => result,
                None => Err(PgError::Connection("no scripted sessions left".into())),
            }
        }
    }
}
