// ── Change events ──
//
// Typed form of one row-level change. Decoding from the wire is strict:
// anything that would force the reconciler to guess is rejected here as
// malformed and never reaches a collection.

use chrono::{DateTime, Utc};
use rowsync_api::RawChange;
use serde_json::{Map, Value};

use super::record::{Record, RecordId};
use super::scope::SubscriptionScope;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn from_wire(event_type: &str) -> Option<Self> {
        match event_type {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One row-level change for a scope.
///
/// `before` / `after` are full row images, not diffs. There is no sequence
/// number: the only order is delivery order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub scope: SubscriptionScope,
    pub before: Option<Record>,
    pub after: Option<Record>,
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert(scope: SubscriptionScope, after: Record) -> Self {
        Self::new(ChangeKind::Insert, scope, None, Some(after))
    }

    pub fn update(scope: SubscriptionScope, after: Record) -> Self {
        Self::new(ChangeKind::Update, scope, None, Some(after))
    }

    pub fn delete(scope: SubscriptionScope, before: Record) -> Self {
        Self::new(ChangeKind::Delete, scope, Some(before), None)
    }

    fn new(
        kind: ChangeKind,
        scope: SubscriptionScope,
        before: Option<Record>,
        after: Option<Record>,
    ) -> Self {
        Self {
            kind,
            scope,
            before,
            after,
            received_at: Utc::now(),
        }
    }

    /// The id this event is about: the after image for inserts/updates,
    /// the before image for deletes.
    pub fn record_id(&self) -> Option<&RecordId> {
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => self.after.as_ref().map(Record::id),
            ChangeKind::Delete => self.before.as_ref().map(Record::id),
        }
    }

    /// Decode a raw wire change for `scope`.
    ///
    /// Rejects unknown event types, missing row images, images without an
    /// id, and rows whose tenant column names a different tenant.
    pub fn from_wire(
        scope: &SubscriptionScope,
        raw: RawChange,
        received_at: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        let kind = ChangeKind::from_wire(&raw.event_type).ok_or_else(|| {
            SyncError::malformed(format!("unknown eventType '{}'", raw.event_type))
        })?;

        let after = raw.new.map(|fields| image(scope, fields, "new")).transpose()?;
        let before = raw.old.map(|fields| image(scope, fields, "old")).transpose()?;

        match kind {
            ChangeKind::Insert | ChangeKind::Update if after.is_none() => {
                return Err(SyncError::malformed(format!("{kind} without a 'new' row")));
            }
            ChangeKind::Delete if before.is_none() => {
                return Err(SyncError::malformed("Delete without an 'old' row"));
            }
            _ => {}
        }

        Ok(Self {
            kind,
            scope: scope.clone(),
            before,
            after,
            received_at,
        })
    }
}

fn image(
    scope: &SubscriptionScope,
    fields: Map<String, Value>,
    which: &str,
) -> Result<Record, SyncError> {
    if let Some(Value::String(tenant)) = fields.get(scope.kind.tenant_column()) {
        if tenant != scope.tenant.as_str() {
            return Err(SyncError::malformed(format!(
                "'{which}' row belongs to tenant '{tenant}', not '{}'",
                scope.tenant
            )));
        }
    }
    Record::from_fields(fields)
        .map_err(|e| SyncError::malformed(format!("'{which}' row: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use serde_json::json;

    fn scope() -> SubscriptionScope {
        SubscriptionScope::new(EntityKind::Invoice, "org-42")
    }

    fn raw(value: Value) -> RawChange {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn decodes_insert() {
        let event = ChangeEvent::from_wire(
            &scope(),
            raw(json!({ "eventType": "INSERT", "new": { "id": 2, "amount": 50, "org_id": "org-42" } })),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record_id().unwrap().as_str(), "2");
        assert!(event.before.is_none());
    }

    #[test]
    fn decodes_delete_with_key_only_image() {
        let event = ChangeEvent::from_wire(
            &scope(),
            raw(json!({ "eventType": "DELETE", "old": { "id": 2 } })),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(event.kind, ChangeKind::Delete);
        assert_eq!(event.record_id().unwrap().as_str(), "2");
    }

    #[test]
    fn rejects_unknown_event_type() {
        let err = ChangeEvent::from_wire(
            &scope(),
            raw(json!({ "eventType": "TRUNCATE" })),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedEvent { .. }));
    }

    #[test]
    fn rejects_missing_id_and_missing_image() {
        let no_id = ChangeEvent::from_wire(
            &scope(),
            raw(json!({ "eventType": "UPDATE", "new": { "amount": 1 } })),
            Utc::now(),
        );
        assert!(matches!(no_id, Err(SyncError::MalformedEvent { .. })));

        let no_image = ChangeEvent::from_wire(
            &scope(),
            raw(json!({ "eventType": "DELETE", "old": {} })),
            Utc::now(),
        );
        assert!(matches!(no_image, Err(SyncError::MalformedEvent { .. })));
    }

    #[test]
    fn rejects_rows_from_other_tenants() {
        let err = ChangeEvent::from_wire(
            &scope(),
            raw(json!({ "eventType": "INSERT", "new": { "id": 9, "org_id": "org-7" } })),
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("org-7"));
    }
}
