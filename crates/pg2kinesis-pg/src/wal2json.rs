//! Stateless decoding of wal2json format-version 2 payloads.
//!
//! Each payload is one JSON object describing a single action: `B` (begin),
//! `C` (commit), `I`/`U`/`D` (row changes), `M` (logical message), `T`
//! (truncate). Malformed payloads are never guessed at; they surface as a
//! decode error carrying the raw payload for operator inspection.

use std::collections::HashMap;

use pg2kinesis_core::{ChangeEvent, DecodedMessage, Operation, Value};
use serde::Deserialize;

use crate::error::{PgError, PgResult};

/// wal2json v2 message envelope.
#[derive(Debug, Deserialize)]
struct Wal2JsonMessage {
    action: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    columns: Option<Vec<Wal2JsonColumn>>,
    #[serde(default)]
    identity: Option<Vec<Wal2JsonColumn>>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    xid: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Wal2JsonColumn {
    name: String,
    #[serde(rename = "type")]
    #[allow(dead_code)] // Required for serde deserialization
    col_type: String,
    value: serde_json::Value,
}

/// Decode one wal2json v2 payload into a stream message.
///
/// `lsn` and `xid` come from the peeked slot row the payload arrived in;
/// for a commit action `lsn` is the commit record's position.
pub fn decode_payload(data: &str, lsn: u64, xid: u32) -> PgResult<DecodedMessage> {
    let msg: Wal2JsonMessage = serde_json::from_str(data)
        .map_err(|e| PgError::decode(format!("invalid JSON: {}", e), data))?;

    let op = match msg.action.as_str() {
        "B" => {
            return Ok(DecodedMessage::Begin {
                xid: msg.xid.unwrap_or(xid),
            })
        }
        "C" => {
            return Ok(DecodedMessage::Commit {
                end_lsn: lsn,
                timestamp: msg.timestamp,
            })
        }
        // Logical messages and truncates carry no row data.
        "M" | "T" => return Ok(DecodedMessage::Skip),
        "I" => Operation::Insert,
        "U" => Operation::Update,
        "D" => Operation::Delete,
        other => {
            return Err(PgError::decode(format!("unknown action: {}", other), data));
        }
    };

    let schema = msg.schema.unwrap_or_else(|| "public".to_string());
    let table = msg
        .table
        .ok_or_else(|| PgError::decode("missing table in change payload", data))?;

    let new = msg.columns.map(|cols| columns_to_row(&cols));
    let old = msg.identity.map(|cols| columns_to_row(&cols));

    match op {
        Operation::Insert | Operation::Update if new.is_none() => {
            return Err(PgError::decode("change payload has no column data", data));
        }
        Operation::Delete if old.is_none() => {
            return Err(PgError::decode("delete payload has no identity data", data));
        }
        _ => {}
    }

    Ok(DecodedMessage::Change(ChangeEvent {
        op,
        schema,
        table,
        new,
        old,
        lsn,
        xid,
        commit_timestamp: None,
    }))
}

fn columns_to_row(columns: &[Wal2JsonColumn]) -> HashMap<String, Value> {
    columns
        .iter()
        .map(|col| (col.name.clone(), Value::from(col.value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_insert() {
        let data = r#"{"action":"I","schema":"public","table":"users","columns":[{"name":"id","type":"integer","value":1},{"name":"name","type":"text","value":"Alice"}]}"#;

        let msg = decode_payload(data, 100, 700).unwrap();
        let DecodedMessage::Change(event) = msg else {
            panic!("expected change, got {:?}", msg);
        };

        assert_eq!(event.op, Operation::Insert);
        assert_eq!(event.schema, "public");
        assert_eq!(event.table, "users");
        assert_eq!(event.lsn, 100);
        assert_eq!(event.xid, 700);

        let new = event.new.as_ref().unwrap();
        assert_eq!(new.get("id"), Some(&Value::Int(1)));
        assert_eq!(new.get("name"), Some(&Value::String("Alice".into())));
    }

    #[test]
    fn test_decode_update_carries_old_and_new() {
        let data = r#"{"action":"U","schema":"public","table":"users","columns":[{"name":"id","type":"integer","value":1},{"name":"name","type":"text","value":"Bob"}],"identity":[{"name":"id","type":"integer","value":1}]}"#;

        let msg = decode_payload(data, 100, 701).unwrap();
        let DecodedMessage::Change(event) = msg else {
            panic!("expected change");
        };
        assert_eq!(event.op, Operation::Update);
        assert!(event.new.is_some());
        assert!(event.old.is_some());
    }

    #[test]
    fn test_decode_delete() {
        let data = r#"{"action":"D","schema":"public","table":"users","identity":[{"name":"id","type":"integer","value":1}]}"#;

        let msg = decode_payload(data, 100, 702).unwrap();
        let DecodedMessage::Change(event) = msg else {
            panic!("expected change");
        };
        assert_eq!(event.op, Operation::Delete);
        assert!(event.new.is_none());
        assert!(event.old.is_some());
    }

    #[test]
    fn test_decode_begin_and_commit() {
        let begin = decode_payload(r#"{"action":"B","xid":742}"#, 10, 742).unwrap();
        assert_eq!(begin, DecodedMessage::Begin { xid: 742 });

        let commit = decode_payload(
            r#"{"action":"C","timestamp":"2024-05-01 12:00:00.000000+00"}"#,
            20,
            742,
        )
        .unwrap();
        assert_eq!(
            commit,
            DecodedMessage::Commit {
                end_lsn: 20,
                timestamp: Some("2024-05-01 12:00:00.000000+00".into()),
            }
        );
    }

    #[test]
    fn test_begin_without_embedded_xid_uses_row_xid() {
        let begin = decode_payload(r#"{"action":"B"}"#, 10, 900).unwrap();
        assert_eq!(begin, DecodedMessage::Begin { xid: 900 });
    }

    #[test]
    fn test_control_messages_are_skipped() {
        let msg = r#"{"action":"M","transactional":true,"prefix":"app","content":"hello"}"#;
        assert_eq!(decode_payload(msg, 5, 1).unwrap(), DecodedMessage::Skip);

        let truncate = r#"{"action":"T","schema":"public","table":"users"}"#;
        assert_eq!(decode_payload(truncate, 6, 1).unwrap(), DecodedMessage::Skip);
    }

    #[test]
    fn test_malformed_payload_carries_raw_data() {
        let raw = r#"{"action":"I","schema":"public""#;
        let err = decode_payload(raw, 100, 1).unwrap_err();
        match err {
            PgError::Decode { payload, .. } => assert_eq!(payload, raw),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_is_a_decode_error() {
        let raw = r#"{"action":"Z"}"#;
        let err = decode_payload(raw, 100, 1).unwrap_err();
        assert!(matches!(err, PgError::Decode { .. }));
    }

    #[test]
    fn test_insert_without_columns_is_a_decode_error() {
        let raw = r#"{"action":"I","schema":"public","table":"users"}"#;
        let err = decode_payload(raw, 100, 1).unwrap_err();
        assert!(matches!(err, PgError::Decode { .. }));
    }
}
