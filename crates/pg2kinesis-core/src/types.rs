use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A value from a Postgres row, supporting common types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(obj) => serde_json::Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// The type of database operation that produced this event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// A row map containing column name to value mappings.
pub type RowMap = HashMap<String, Value>;

/// A single row-level change decoded from the WAL.
///
/// Immutable once produced; the commit timestamp is filled in by the
/// assembler when the enclosing transaction's commit marker arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The type of operation (insert, update, delete).
    pub op: Operation,
    /// The schema name (e.g., "public").
    pub schema: String,
    /// The table name.
    pub table: String,
    /// The new row values (present for insert/update).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<RowMap>,
    /// The old row values (present for update/delete with replica identity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<RowMap>,
    /// The log sequence number of this change.
    pub lsn: u64,
    /// Transaction ID this change belongs to.
    pub xid: u32,
    /// Commit timestamp of the enclosing transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Partition key for the downstream stream: per-table ordering is
    /// preserved by routing all changes of one table to the same shard.
    pub fn partition_key(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Get the relevant row data for this event.
    /// For inserts/updates, returns new; for deletes, returns old.
    pub fn row(&self) -> Option<&RowMap> {
        match self.op {
            Operation::Insert | Operation::Update => self.new.as_ref(),
            Operation::Delete => self.old.as_ref(),
        }
    }
}

/// An ordered sequence of changes sharing one transaction, terminated by
/// its commit marker. Published downstream only as a complete unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionBatch {
    /// Transaction ID shared by all events.
    pub xid: u32,
    /// LSN of the commit record; acknowledging this position releases the
    /// whole transaction on the source.
    pub commit_lsn: u64,
    /// Commit timestamp reported by the decoder plugin, if enabled.
    pub commit_timestamp: Option<String>,
    /// Events in source statement order.
    pub events: Vec<ChangeEvent>,
}

impl TransactionBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());
        assert!(!Value::Int(42).is_null());
        assert!(!Value::String("test".into()).is_null());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::String("hello".into()).as_str(), Some("hello"));
    }

    #[test]
    fn test_value_json_roundtrip() {
        let original = Value::Object(
            [
                ("name".to_string(), Value::String("test".into())),
                ("count".to_string(), Value::Int(42)),
                ("active".to_string(), Value::Bool(true)),
            ]
            .into_iter()
            .collect(),
        );

        let json: serde_json::Value = original.clone().into();
        let back: Value = json.into();
        assert_eq!(original, back);
    }

    #[test]
    fn test_partition_key() {
        let event = ChangeEvent {
            op: Operation::Insert,
            schema: "public".into(),
            table: "orders".into(),
            new: Some([("id".into(), Value::Int(1))].into_iter().collect()),
            old: None,
            lsn: 100,
            xid: 742,
            commit_timestamp: None,
        };
        assert_eq!(event.partition_key(), "public.orders");
    }

    #[test]
    fn test_change_event_row() {
        let insert = ChangeEvent {
            op: Operation::Insert,
            schema: "public".into(),
            table: "users".into(),
            new: Some([("id".into(), Value::Int(1))].into_iter().collect()),
            old: None,
            lsn: 100,
            xid: 1,
            commit_timestamp: None,
        };
        assert!(insert.row().is_some());

        let delete = ChangeEvent {
            op: Operation::Delete,
            schema: "public".into(),
            table: "users".into(),
            new: None,
            old: Some([("id".into(), Value::Int(1))].into_iter().collect()),
            lsn: 101,
            xid: 1,
            commit_timestamp: None,
        };
        assert_eq!(delete.row(), delete.old.as_ref());
    }
}
