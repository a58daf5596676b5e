//! LSN (Log Sequence Number) utilities for PostgreSQL replication.

use crate::error::{PgError, PgResult};

/// Parse LSN from "X/Y" format to u64.
pub fn parse_lsn(lsn: &str) -> PgResult<u64> {
    let parts: Vec<&str> = lsn.split('/').collect();
    if parts.len() != 2 {
        return Err(PgError::InvalidLsn(lsn.to_string()));
    }

    let high =
        u64::from_str_radix(parts[0], 16).map_err(|_| PgError::InvalidLsn(lsn.to_string()))?;
    let low =
        u64::from_str_radix(parts[1], 16).map_err(|_| PgError::InvalidLsn(lsn.to_string()))?;

    Ok((high << 32) | low)
}

/// Format u64 LSN to "X/Y" format.
pub fn format_lsn(lsn: u64) -> String {
    let high = lsn >> 32;
    let low = lsn & 0xFFFFFFFF;
    format!("{:X}/{:X}", high, low)
}
