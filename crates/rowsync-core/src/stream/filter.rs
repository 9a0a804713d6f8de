// ── Filter predicates for scope views ──
//
// Used by consumers to narrow a view without another subscription.

use std::collections::HashSet;

use serde_json::Value;

use crate::model::{Record, RecordId};

/// Filter predicate for records in a scope view.
pub enum RecordFilter {
    All,
    /// Column equals the given JSON value.
    FieldEquals { field: String, value: Value },
    /// Column present and not null.
    HasField(String),
    Ids(HashSet<RecordId>),
    Custom(Box<dyn Fn(&Record) -> bool + Send + Sync>),
}

impl RecordFilter {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::FieldEquals { field, value } => record.get(field) == Some(value),
            Self::HasField(field) => record.get(field).is_some_and(|v| !v.is_null()),
            Self::Ids(ids) => ids.contains(record.id()),
            Self::Custom(f) => f(record),
        }
    }
}

impl std::fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::FieldEquals { field, value } => write!(f, "FieldEquals({field} = {value})"),
            Self::HasField(field) => write!(f, "HasField({field})"),
            Self::Ids(ids) => write!(f, "Ids({})", ids.len()),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
