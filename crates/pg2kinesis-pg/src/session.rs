//! The replication session: one live connection, one slot.
//!
//! The source permits a single consumer per slot, so a session exclusively
//! owns its connection and slot handle. Undelivered changes are *peeked*,
//! never consumed; the slot's confirmed-flush position moves only through
//! [`ReplicationSession::acknowledge`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_postgres::{Client, NoTls};
use tracing::{debug, info};

use crate::error::{PgError, PgResult};
use crate::lsn::{format_lsn, parse_lsn};
use crate::slot::{ensure_slot, get_confirmed_flush_lsn};

/// Configuration for a replication session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Postgres connection string (key-value or URL form).
    pub connection_string: String,
    /// Replication slot name.
    pub slot_name: String,
    /// Logical decoding plugin the slot must use.
    pub plugin: String,
    /// Whether to create the slot if it doesn't exist.
    pub create_slot: bool,
    /// Maximum number of changes to peek per segment.
    pub max_changes: i64,
    /// How long to wait before re-peeking when the log is idle.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            slot_name: "pg2kinesis".to_string(),
            plugin: "wal2json".to_string(),
            create_slot: true,
            max_changes: 1000,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// One undelivered change row peeked from the slot.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    /// Position of this change in the WAL.
    pub lsn: u64,
    /// Transaction the change belongs to.
    pub xid: u32,
    /// Raw decoder plugin payload, one JSON object.
    pub data: String,
}

/// A contiguous run of undelivered changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSegment {
    pub entries: Vec<RawEntry>,
}

/// The source side of the worker loop, abstracted so the loop's state
/// machine can be driven by a scripted source in tests.
pub trait ReplicationSource: Send {
    /// Wait for the next run of undelivered changes. `None` means the
    /// stream has ended (only scripted sources ever end).
    fn next_segment(&mut self) -> impl Future<Output = PgResult<Option<RawSegment>>> + Send;

    /// Advance the slot's confirmed-flush position. Must only be called
    /// with positions the position tracker has confirmed.
    fn acknowledge(&mut self, lsn: u64) -> impl Future<Output = PgResult<()>> + Send;

    /// The slot's confirmed-flush position, the restart source of truth.
    fn confirmed_flush_lsn(&mut self) -> impl Future<Output = PgResult<u64>> + Send;
}

/// Opens sessions; the worker reconnects through this during recovery.
pub trait SourceConnector: Send + Sync {
    type Source: ReplicationSource;

    fn connect(&self) -> impl Future<Output = PgResult<Self::Source>> + Send;
}

/// A live logical-replication session against the source database.
pub struct ReplicationSession {
    client: Client,
    config: SessionConfig,
    /// Highest position already acknowledged on this connection.
    last_ack: u64,
}

impl ReplicationSession {
    /// Connect and attach to the slot, creating it if configured to.
    ///
    /// Idempotent with respect to the slot: an existing slot with the same
    /// plugin is reused along with its confirmed position.
    pub async fn open(config: SessionConfig) -> PgResult<Self> {
        info!(slot = %config.slot_name, plugin = %config.plugin, "Connecting to Postgres");

        let (client, connection) = tokio_postgres::connect(&config.connection_string, NoTls)
            .await
            .map_err(|e| PgError::Connection(e.to_string()))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Postgres connection error: {}", e);
            }
        });

        ensure_slot(&client, &config.slot_name, &config.plugin, config.create_slot).await?;

        let last_ack = match get_confirmed_flush_lsn(&client, &config.slot_name).await? {
            Some(lsn) => parse_lsn(&lsn)?,
            None => 0,
        };

        info!(
            slot = %config.slot_name,
            confirmed = %format_lsn(last_ack),
            "Replication session open"
        );

        Ok(Self {
            client,
            config,
            last_ack,
        })
    }

    async fn peek(&self, limit: i64) -> PgResult<Vec<RawEntry>> {
        // pg_logical_slot_peek_changes takes the option list inline, so the
        // query is assembled with the limit rather than bound.
        let query = format!(
            "SELECT lsn::text, xid::text, data FROM pg_logical_slot_peek_changes($1, NULL, {}, \
             'format-version', '2', 'include-xids', 'true', 'include-timestamp', 'true')",
            limit
        );

        let rows = self
            .client
            .query(&query, &[&self.config.slot_name])
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let lsn: String = row.get(0);
            let xid: String = row.get(1);
            let data: String = row.get(2);

            entries.push(RawEntry {
                lsn: parse_lsn(&lsn)?,
                xid: xid
                    .parse::<u32>()
                    .map_err(|_| PgError::Stream(format!("invalid xid '{}' from slot", xid)))?,
                data,
            });
        }

        Ok(entries)
    }
}

impl ReplicationSource for ReplicationSession {
    async fn next_segment(&mut self) -> PgResult<Option<RawSegment>> {
        let mut limit = self.config.max_changes;
        loop {
            let entries = self.peek(limit).await?;
            if entries.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            // Peeking restarts from the confirmed position every time, so a
            // transaction larger than the window would never show its commit
            // and never be acknowledged. Widen the window until at least one
            // commit record fits.
            if entries.len() as i64 >= limit && !entries.iter().any(|e| is_commit_payload(&e.data))
            {
                limit = limit.saturating_mul(2);
                debug!(limit, "No commit inside peek window, widening");
                continue;
            }

            debug!(count = entries.len(), "Peeked undelivered changes");
            return Ok(Some(RawSegment { entries }));
        }
    }

    async fn acknowledge(&mut self, lsn: u64) -> PgResult<()> {
        if lsn <= self.last_ack {
            return Ok(());
        }

        debug!(
            lsn = %format_lsn(lsn),
            prev_ack = %format_lsn(self.last_ack),
            "Acknowledging position"
        );

        self.client
            .execute(
                "SELECT pg_replication_slot_advance($1, $2::pg_lsn)",
                &[&self.config.slot_name, &format_lsn(lsn)],
            )
            .await?;

        self.last_ack = lsn;
        Ok(())
    }

    async fn confirmed_flush_lsn(&mut self) -> PgResult<u64> {
        match get_confirmed_flush_lsn(&self.client, &self.config.slot_name).await? {
            Some(lsn) => parse_lsn(&lsn),
            None => Ok(0),
        }
    }
}

/// wal2json v2 writes `action` as the first key of every payload.
fn is_commit_payload(data: &str) -> bool {
    data.starts_with(r#"{"action":"C""#)
}

/// Connector for real sessions.
///
/// `create_slot` only applies to the first successful attach. During
/// recovery the slot must already exist: recreating a dropped slot would
/// resume from a fresh position and silently skip undelivered changes, so a
/// missing slot on re-attach surfaces as `SlotNotFound` instead.
#[derive(Debug, Clone)]
pub struct SessionConnector {
    config: SessionConfig,
    attached: Arc<AtomicBool>,
}

impl SessionConnector {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            attached: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SourceConnector for SessionConnector {
    type Source = ReplicationSession;

    fn connect(&self) -> impl Future<Output = PgResult<ReplicationSession>> + Send {
        let mut config = self.config.clone();
        let attached = self.attached.clone();
        async move {
            if attached.load(Ordering::SeqCst) {
                config.create_slot = false;
            }
            let session = ReplicationSession::open(config).await?;
            attached.store(true, Ordering::SeqCst);
            Ok(session)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_payload_detection() {
        assert!(is_commit_payload(
            r#"{"action":"C","timestamp":"2024-05-01 12:00:00.000000+00"}"#
        ));
        assert!(!is_commit_payload(r#"{"action":"B"}"#));
        // Column data containing a commit-shaped string is not a commit.
        assert!(!is_commit_payload(
            r#"{"action":"I","schema":"public","table":"t","columns":[{"name":"body","type":"text","value":"{\"action\":\"C\"}"}]}"#
        ));
    }
}
