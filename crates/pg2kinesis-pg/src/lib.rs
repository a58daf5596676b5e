//! Logical replication session management against PostgreSQL.
//!
//! Changes are read with `pg_logical_slot_peek_changes` (peek, not get) and
//! the slot's confirmed-flush position is advanced explicitly with
//! `pg_replication_slot_advance`, so nothing is consumed on the source until
//! the downstream sink has durably accepted it.

mod error;
pub mod lsn;
pub mod mock;
pub mod session;
pub mod slot;
pub mod wal2json;

pub use error::{PgError, PgResult};
pub use lsn::{format_lsn, parse_lsn};
pub use mock::{MockConnector, MockSource};
pub use session::{
    RawEntry, RawSegment, ReplicationSession, ReplicationSource, SessionConfig, SessionConnector,
    SourceConnector,
};
pub use slot::{
    drop_slot, ensure_slot, get_confirmed_flush_lsn, get_slot_info, slot_exists, SlotInfo,
};
pub use wal2json::decode_payload;
