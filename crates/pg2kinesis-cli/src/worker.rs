//! The replication worker loop.
//!
//! An explicit state machine rather than an implicit consume loop:
//! `Starting -> Streaming -> (Recovering -> Streaming)* -> Stopped`, with
//! `Failed` terminal on fatal decode or slot errors. Processing is strictly
//! serial (fetch, decode, publish, confirm, acknowledge), so confirmations
//! are trivially in batch-position order.

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pg2kinesis_core::{Backoff, BackoffConfig, PositionTracker, TxnAssembler};
use pg2kinesis_kinesis::{Publisher, SinkError, StreamSink};
use pg2kinesis_pg::{
    decode_payload, format_lsn, PgError, RawSegment, ReplicationSource, SourceConnector,
};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Streaming,
    Recovering,
    Stopped,
    Failed,
}

/// Fatal worker failures. Transient source errors never surface here; they
/// are absorbed by reconnect-with-backoff.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("fatal decode error: {0}")]
    Decode(PgError),

    #[error("transaction stream inconsistency: {0}")]
    Assembly(#[from] pg2kinesis_core::Error),

    #[error("publish failed: {0}")]
    Publish(#[from] SinkError),

    #[error("replication source failed: {0}")]
    Source(PgError),
}

/// Tuning for the worker's reconnect behavior.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    pub reconnect: BackoffConfig,
}

enum StepError {
    Transient(PgError),
    Fatal(WorkerError),
}

/// The worker: owns the position tracker and transaction assembler, drives
/// a replication source into a publisher.
pub struct Worker<C: SourceConnector, S: StreamSink> {
    connector: C,
    publisher: Publisher<S>,
    options: WorkerOptions,
    state: WorkerState,
    tracker: PositionTracker,
    assembler: TxnAssembler,
}

impl<C: SourceConnector, S: StreamSink> Worker<C, S> {
    pub fn new(connector: C, publisher: Publisher<S>, options: WorkerOptions) -> Self {
        Self {
            connector,
            publisher,
            options,
            state: WorkerState::Starting,
            tracker: PositionTracker::new(),
            assembler: TxnAssembler::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// The highest position confirmed by the sink so far.
    pub fn confirmed_position(&self) -> u64 {
        self.tracker.current()
    }

    /// Run until the stream ends, the shutdown signal fires, or a fatal
    /// error halts the worker. Returns the final confirmed position.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<u64, WorkerError> {
        self.state = WorkerState::Starting;

        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) if e.is_transient() => match self.recover(&mut shutdown, e).await? {
                Some(session) => session,
                None => return self.stop_disconnected(),
            },
            Err(e) => return Err(self.fail(WorkerError::Source(e))),
        };

        // The slot's confirmed-flush position is the only restart state.
        let confirmed = match session.confirmed_flush_lsn().await {
            Ok(lsn) => lsn,
            Err(e) => return Err(self.fail(WorkerError::Source(e))),
        };
        self.tracker = PositionTracker::starting_at(confirmed);
        info!(confirmed = %format_lsn(confirmed), "Streaming from confirmed position");
        self.state = WorkerState::Streaming;

        loop {
            if *shutdown.borrow() {
                return self.stop(&mut session).await;
            }

            let fetched = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Shutdown handle dropped; treat as a stop request.
                        return self.stop(&mut session).await;
                    }
                    continue;
                }
                segment = session.next_segment() => segment,
            };

            match fetched {
                Ok(Some(segment)) => {
                    match self.process_segment(&mut session, segment).await {
                        Ok(()) => {}
                        Err(StepError::Transient(e)) => {
                            match self.recover(&mut shutdown, e).await? {
                                Some(s) => session = s,
                                None => return self.stop(&mut session).await,
                            }
                        }
                        Err(StepError::Fatal(e)) => return Err(self.fail(e)),
                    }
                }
                Ok(None) => return self.stop(&mut session).await,
                Err(e) if e.is_transient() => match self.recover(&mut shutdown, e).await? {
                    Some(s) => session = s,
                    None => return self.stop(&mut session).await,
                },
                Err(e) => return Err(self.fail(WorkerError::Source(e))),
            }
        }
    }

    /// Decode a segment, publish every completed transaction, confirm, and
    /// acknowledge. A batch is either confirmed or the loop halts; nothing
    /// is ever silently dropped.
    async fn process_segment(
        &mut self,
        session: &mut C::Source,
        segment: RawSegment,
    ) -> Result<(), StepError> {
        for entry in segment.entries {
            let msg = decode_payload(&entry.data, entry.lsn, entry.xid)
                .map_err(|e| StepError::Fatal(WorkerError::Decode(e)))?;

            let Some(batch) = self
                .assembler
                .push(msg)
                .map_err(|e| StepError::Fatal(WorkerError::Assembly(e)))?
            else {
                continue;
            };

            self.tracker.record(batch.commit_lsn);
            let confirmed = self
                .publisher
                .publish(&batch)
                .await
                .map_err(|e| StepError::Fatal(WorkerError::Publish(e)))?;
            self.tracker.confirm(confirmed);

            match session.acknowledge(self.tracker.current()).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => return Err(StepError::Transient(e)),
                Err(e) => return Err(StepError::Fatal(WorkerError::Source(e))),
            }
        }

        Ok(())
    }

    /// Reconnect with capped, jittered exponential backoff. Returns `None`
    /// if shutdown was requested while waiting.
    async fn recover(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        cause: PgError,
    ) -> Result<Option<C::Source>, WorkerError> {
        self.state = WorkerState::Recovering;
        // A partial transaction cannot survive the session; the source
        // re-delivers it from the confirmed position.
        self.assembler.reset();

        warn!(error = %cause, "Replication session lost, reconnecting");

        let mut backoff = Backoff::new(self.options.reconnect.clone());
        let mut last_err = cause;

        loop {
            let Some(delay) = backoff.next_delay() else {
                return Err(self.fail(WorkerError::Source(last_err)));
            };

            warn!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Backing off before reconnect"
            );

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            if *shutdown.borrow() {
                return Ok(None);
            }

            match self.connector.connect().await {
                Ok(mut session) => {
                    // Re-sync the slot with anything confirmed but not yet
                    // acknowledged before the disconnect.
                    match session.acknowledge(self.tracker.current()).await {
                        Ok(()) => {
                            info!(
                                confirmed = %format_lsn(self.tracker.current()),
                                "Reconnected, resuming stream"
                            );
                            self.state = WorkerState::Streaming;
                            return Ok(Some(session));
                        }
                        Err(e) if e.is_transient() => last_err = e,
                        Err(e) => return Err(self.fail(WorkerError::Source(e))),
                    }
                }
                Err(e) if e.is_transient() => last_err = e,
                Err(e) => return Err(self.fail(WorkerError::Source(e))),
            }
        }
    }

    /// Graceful shutdown: discard any incomplete transaction, push the
    /// final acknowledgment, and close.
    async fn stop(&mut self, session: &mut C::Source) -> Result<u64, WorkerError> {
        self.assembler.reset();
        if let Err(e) = session.acknowledge(self.tracker.current()).await {
            warn!(error = %e, "Final acknowledge failed during shutdown");
        }
        self.state = WorkerState::Stopped;
        info!(confirmed = %format_lsn(self.tracker.current()), "Worker stopped");
        Ok(self.tracker.current())
    }

    fn stop_disconnected(&mut self) -> Result<u64, WorkerError> {
        self.state = WorkerState::Stopped;
        info!(confirmed = %format_lsn(self.tracker.current()), "Worker stopped");
        Ok(self.tracker.current())
    }

    fn fail(&mut self, err: WorkerError) -> WorkerError {
        self.state = WorkerState::Failed;
        error!(
            confirmed = %format_lsn(self.tracker.current()),
            error = %err,
            "Worker halted; operator intervention required"
        );
        err
    }
}
