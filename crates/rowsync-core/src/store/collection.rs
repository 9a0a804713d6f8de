// ── Local ordered collection ──
//
// One scope's records, keyed by id, in display order. `IndexMap` gives O(1)
// id lookup and a stable position for every entry. Only the reconciler and
// the snapshot constructor mutate it; readers get immutable snapshots.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::model::{Record, RecordId, SubscriptionScope};

// ── Ordering ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Where new and updated records land in a collection.
///
/// Parses from `newest_first`, `arrival`, or `field:<name>[:asc|desc]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OrderingPolicy {
    /// New ids go to the front; updates keep their position.
    #[default]
    NewestFirst,
    /// New ids go to the back; updates keep their position.
    Arrival,
    /// Sorted by one column, stable on ties. Updates are repositioned.
    Field { field: String, direction: Direction },
}

impl OrderingPolicy {
    pub fn by_field(field: impl Into<String>, direction: Direction) -> Self {
        Self::Field {
            field: field.into(),
            direction,
        }
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewestFirst => f.write_str("newest_first"),
            Self::Arrival => f.write_str("arrival"),
            Self::Field {
                field,
                direction: Direction::Ascending,
            } => write!(f, "field:{field}:asc"),
            Self::Field {
                field,
                direction: Direction::Descending,
            } => write!(f, "field:{field}:desc"),
        }
    }
}

impl FromStr for OrderingPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SyncError::Config {
            message: format!(
                "invalid ordering '{s}': expected newest_first, arrival or field:<name>[:asc|desc]"
            ),
        };

        match s.trim() {
            "newest_first" => return Ok(Self::NewestFirst),
            "arrival" => return Ok(Self::Arrival),
            _ => {}
        }

        let mut parts = s.trim().splitn(3, ':');
        if parts.next() != Some("field") {
            return Err(invalid());
        }
        let field = parts.next().filter(|f| !f.is_empty()).ok_or_else(invalid)?;
        let direction = match parts.next() {
            None | Some("asc") => Direction::Ascending,
            Some("desc") => Direction::Descending,
            Some(_) => return Err(invalid()),
        };
        Ok(Self::by_field(field, direction))
    }
}

impl TryFrom<String> for OrderingPolicy {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrderingPolicy> for String {
    fn from(policy: OrderingPolicy) -> Self {
        policy.to_string()
    }
}

/// Total order over JSON column values: missing/null < bool < number <
/// string < everything else.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_by(field: &str, direction: Direction, a: &Record, b: &Record) -> Ordering {
    let ord = compare_values(a.get(field), b.get(field));
    match direction {
        Direction::Ascending => ord,
        Direction::Descending => ord.reverse(),
    }
}

// ── LocalCollection ─────────────────────────────────────────────────

/// Ordered, id-keyed record set for one scope. At most one entry per id.
#[derive(Debug, Clone)]
pub struct LocalCollection {
    scope: SubscriptionScope,
    policy: OrderingPolicy,
    records: IndexMap<RecordId, Arc<Record>>,
}

impl LocalCollection {
    pub fn new(scope: SubscriptionScope, policy: OrderingPolicy) -> Self {
        Self {
            scope,
            policy,
            records: IndexMap::new(),
        }
    }

    /// Build a collection from a full snapshot.
    ///
    /// The loader's order is kept for `NewestFirst` and `Arrival`; `Field`
    /// policies sort it. A repeated id is a consistency violation.
    pub fn from_snapshot(
        scope: SubscriptionScope,
        policy: OrderingPolicy,
        records: Vec<Record>,
    ) -> Result<Self, SyncError> {
        let mut map = IndexMap::with_capacity(records.len());
        for record in records {
            let id = record.id().clone();
            if map.insert(id.clone(), Arc::new(record)).is_some() {
                return Err(SyncError::ConsistencyViolation {
                    scope: scope.to_string(),
                    detail: format!("snapshot contains id '{id}' more than once"),
                });
            }
        }

        if let OrderingPolicy::Field { field, direction } = &policy {
            map.sort_by(|_, a, _, b| compare_by(field, *direction, a, b));
        }

        Ok(Self {
            scope,
            policy,
            records: map,
        })
    }

    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    pub fn policy(&self) -> &OrderingPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<&Arc<Record>> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.values()
    }

    /// Immutable copy of the current order, for publishing to readers.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Record>>> {
        Arc::new(self.records.values().cloned().collect())
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Check that every entry is stored under its own id.
    pub fn verify(&self) -> Result<(), SyncError> {
        for (key, record) in &self.records {
            if key != record.id() {
                return Err(SyncError::ConsistencyViolation {
                    scope: self.scope.to_string(),
                    detail: format!("entry keyed '{key}' holds record '{}'", record.id()),
                });
            }
        }
        Ok(())
    }

    // ── Mutation (reconciler only) ───────────────────────────────────

    /// Add a record whose id is not present, at the policy's position.
    pub(crate) fn place(&mut self, record: Record) {
        let id = record.id().clone();
        let record = Arc::new(record);
        match &self.policy {
            OrderingPolicy::NewestFirst => {
                self.records.shift_insert(0, id, record);
            }
            OrderingPolicy::Arrival => {
                self.records.insert(id, record);
            }
            OrderingPolicy::Field { field, direction } => {
                let index = self.records.partition_point(|_, existing| {
                    compare_by(field, *direction, existing, &record) != Ordering::Greater
                });
                self.records.shift_insert(index, id, record);
            }
        }
    }

    /// Swap in a new version of a present record.
    pub(crate) fn replace(&mut self, record: Record) {
        if matches!(self.policy, OrderingPolicy::Field { .. }) {
            self.records.shift_remove(record.id());
            self.place(record);
        } else {
            // insert on an existing key keeps its slot
            self.records.insert(record.id().clone(), Arc::new(record));
        }
    }

    pub(crate) fn remove(&mut self, id: &RecordId) -> Option<Arc<Record>> {
        self.records.shift_remove(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use serde_json::json;

    fn scope() -> SubscriptionScope {
        SubscriptionScope::new(EntityKind::Customer, "org-1")
    }

    fn rec(value: Value) -> Record {
        Record::try_from(value).unwrap()
    }

    fn ids(collection: &LocalCollection) -> Vec<String> {
        collection.iter().map(|r| r.id().to_string()).collect()
    }

    #[test]
    fn parses_ordering_policies() {
        assert_eq!("newest_first".parse::<OrderingPolicy>().unwrap(), OrderingPolicy::NewestFirst);
        assert_eq!("arrival".parse::<OrderingPolicy>().unwrap(), OrderingPolicy::Arrival);
        assert_eq!(
            "field:name".parse::<OrderingPolicy>().unwrap(),
            OrderingPolicy::by_field("name", Direction::Ascending)
        );
        assert_eq!(
            "field:due_date:desc".parse::<OrderingPolicy>().unwrap(),
            OrderingPolicy::by_field("due_date", Direction::Descending)
        );
        assert!("field:".parse::<OrderingPolicy>().is_err());
        assert!("field:name:sideways".parse::<OrderingPolicy>().is_err());
        assert!("random".parse::<OrderingPolicy>().is_err());
    }

    #[test]
    fn policy_display_parses_back() {
        let policy = OrderingPolicy::by_field("amount", Direction::Descending);
        assert_eq!(policy.to_string().parse::<OrderingPolicy>().unwrap(), policy);
    }

    #[test]
    fn snapshot_rejects_duplicate_ids() {
        let result = LocalCollection::from_snapshot(
            scope(),
            OrderingPolicy::Arrival,
            vec![rec(json!({ "id": 1 })), rec(json!({ "id": "1" }))],
        );
        assert!(matches!(result, Err(SyncError::ConsistencyViolation { .. })));
    }

    #[test]
    fn newest_first_places_new_ids_in_front() {
        let mut c = LocalCollection::from_snapshot(
            scope(),
            OrderingPolicy::NewestFirst,
            vec![rec(json!({ "id": "a" })), rec(json!({ "id": "b" }))],
        )
        .unwrap();

        c.place(rec(json!({ "id": "c" })));
        c.replace(rec(json!({ "id": "b", "v": 2 })));

        assert_eq!(ids(&c), ["c", "a", "b"]);
        assert_eq!(c.get(&"b".into()).unwrap().get("v"), Some(&json!(2)));
    }

    #[test]
    fn arrival_appends() {
        let mut c = LocalCollection::new(scope(), OrderingPolicy::Arrival);
        c.place(rec(json!({ "id": "a" })));
        c.place(rec(json!({ "id": "b" })));
        assert_eq!(ids(&c), ["a", "b"]);
    }

    #[test]
    fn field_policy_sorts_and_repositions() {
        let mut c = LocalCollection::from_snapshot(
            scope(),
            OrderingPolicy::by_field("name", Direction::Ascending),
            vec![
                rec(json!({ "id": 1, "name": "Cobalt" })),
                rec(json!({ "id": 2, "name": "Acme" })),
                rec(json!({ "id": 3 })),
            ],
        )
        .unwrap();
        assert_eq!(ids(&c), ["3", "2", "1"]);

        c.place(rec(json!({ "id": 4, "name": "Birch" })));
        assert_eq!(ids(&c), ["3", "2", "4", "1"]);

        c.replace(rec(json!({ "id": 2, "name": "Zenith" })));
        assert_eq!(ids(&c), ["3", "4", "1", "2"]);
    }

    #[test]
    fn field_policy_is_stable_on_ties() {
        let mut c = LocalCollection::new(
            scope(),
            OrderingPolicy::by_field("amount", Direction::Descending),
        );
        c.place(rec(json!({ "id": "x", "amount": 10 })));
        c.place(rec(json!({ "id": "y", "amount": 10 })));
        c.place(rec(json!({ "id": "z", "amount": 20 })));
        assert_eq!(ids(&c), ["z", "x", "y"]);
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let mut c = LocalCollection::from_snapshot(
            scope(),
            OrderingPolicy::Arrival,
            vec![rec(json!({ "id": 1 })), rec(json!({ "id": 2 })), rec(json!({ "id": 3 }))],
        )
        .unwrap();
        assert!(c.remove(&RecordId::from(2)).is_some());
        assert!(c.remove(&RecordId::from(2)).is_none());
        assert_eq!(ids(&c), ["1", "3"]);
        assert!(c.verify().is_ok());
    }
}
