// ── Record identity and shape ──
//
// A Record is one row as the backend sees it: the full JSON object plus its
// extracted identifier. Identity is by id, never by value.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Name of the primary key column on every synchronized table.
pub const ID_FIELD: &str = "id";

// ── RecordId ────────────────────────────────────────────────────────

/// Stable row identifier.
///
/// Backends hand out integer keys on some tables and text/uuid keys on
/// others. Both normalize to their textual form, so `1` and `"1"` are the
/// same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract an id from a JSON value. Only strings and numbers qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("record id must be a string or a number"))
    }
}

// ── Record ──────────────────────────────────────────────────────────

/// One row: its id plus every column, including the id column itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "Value")]
pub struct Record {
    id: RecordId,
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from a row object. Fails if the id column is missing
    /// or not a string/number.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, SyncError> {
        let id = fields
            .get(ID_FIELD)
            .and_then(RecordId::from_value)
            .ok_or_else(|| SyncError::InvalidRecord {
                reason: format!("missing or non-scalar '{ID_FIELD}' column"),
            })?;
        Ok(Self { id, fields })
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Overlay `other`'s columns on top of this record's. Columns absent from
    /// `other` keep their current value.
    pub fn merged_with(&self, other: &Record) -> Record {
        let mut fields = self.fields.clone();
        for (key, value) in &other.fields {
            fields.insert(key.clone(), value.clone());
        }
        Record {
            id: self.id.clone(),
            fields,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl TryFrom<Value> for Record {
    type Error = SyncError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Self::from_fields(fields),
            other => Err(SyncError::InvalidRecord {
                reason: format!("expected a JSON object, got {other}"),
            }),
        }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.fields)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::deserialize(deserializer)?;
        Self::from_fields(fields).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_text_ids_normalize() {
        let a = Record::try_from(json!({ "id": 1, "amount": 100 })).unwrap();
        let b = Record::try_from(json!({ "id": "1" })).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().as_str(), "1");
    }

    #[test]
    fn missing_id_is_rejected() {
        assert!(Record::try_from(json!({ "amount": 100 })).is_err());
        assert!(Record::try_from(json!({ "id": null })).is_err());
        assert!(Record::try_from(json!({ "id": "" })).is_err());
        assert!(Record::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn merge_overlays_present_columns_only() {
        let base = Record::try_from(json!({ "id": 1, "amount": 100, "status": "draft" })).unwrap();
        let patch = Record::try_from(json!({ "id": 1, "amount": 150 })).unwrap();

        let merged = base.merged_with(&patch);
        assert_eq!(merged.to_value(), json!({ "id": 1, "amount": 150, "status": "draft" }));
    }

    #[test]
    fn serde_round_trips_through_plain_objects() {
        let record: Record = serde_json::from_value(json!({ "id": "c_1", "name": "Acme" })).unwrap();
        assert_eq!(record.id().as_str(), "c_1");
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({ "id": "c_1", "name": "Acme" }));
    }
}
