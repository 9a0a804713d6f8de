// ── Entity kinds ──
//
// The closed set of synchronized tables. Each variant knows its table, its
// tenant column and its default ordering, and has a typed record shape
// implementing `Entity`. Nothing dispatches on table-name strings.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use super::record::RecordId;
use crate::store::{Direction, OrderingPolicy};

/// One synchronized entity type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Invoice,
    Customer,
    Payment,
    Product,
    Expense,
}

impl EntityKind {
    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            Self::Invoice => "invoices",
            Self::Customer => "customers",
            Self::Payment => "payments",
            Self::Product => "products",
            Self::Expense => "expenses",
        }
    }

    /// Column holding the tenant key on this table.
    pub fn tenant_column(self) -> &'static str {
        "org_id"
    }

    /// Ordering used when `SyncConfig` carries no override for this kind.
    pub fn default_ordering(self) -> OrderingPolicy {
        match self {
            Self::Invoice | Self::Payment | Self::Expense => OrderingPolicy::NewestFirst,
            Self::Customer | Self::Product => OrderingPolicy::Field {
                field: "name".into(),
                direction: Direction::Ascending,
            },
        }
    }
}

/// A typed record shape bound to one [`EntityKind`].
pub trait Entity: DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &RecordId;
}

// ── Record shapes ───────────────────────────────────────────────────
//
// Columns beyond the ones a dashboard reads are not modelled; they stay
// available on the untyped `Record`.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: RecordId,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    #[serde(default)]
    pub number: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: RecordId,
    #[serde(default)]
    pub org_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: RecordId,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub invoice_id: Option<RecordId>,
    pub amount: f64,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: RecordId,
    #[serde(default)]
    pub org_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: RecordId,
    #[serde(default)]
    pub org_id: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub incurred_at: Option<DateTime<Utc>>,
}

macro_rules! impl_entity {
    ($($ty:ident => $kind:ident),+ $(,)?) => {
        $(
            impl Entity for $ty {
                const KIND: EntityKind = EntityKind::$kind;

                fn id(&self) -> &RecordId {
                    &self.id
                }
            }
        )+
    };
}

impl_entity! {
    Invoice => Invoice,
    Customer => Customer,
    Payment => Payment,
    Product => Product,
    Expense => Expense,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[test]
    fn kind_names_round_trip() {
        for kind in EntityKind::iter() {
            let name = kind.to_string();
            assert_eq!(name.parse::<EntityKind>().unwrap(), kind);
        }
        assert_eq!(EntityKind::Invoice.to_string(), "invoice");
        assert_eq!(EntityKind::Invoice.table(), "invoices");
    }

    #[test]
    fn typed_invoice_accepts_numeric_ids() {
        let invoice: Invoice = serde_json::from_value(json!({
            "id": 1,
            "org_id": "org-42",
            "amount": 100,
            "created_at": "2026-10-01T09:30:00Z"
        }))
        .unwrap();

        assert_eq!(invoice.id().as_str(), "1");
        assert!((invoice.amount - 100.0).abs() < f64::EPSILON);
        assert!(invoice.created_at.is_some());
        assert_eq!(Invoice::KIND, EntityKind::Invoice);
    }

    #[test]
    fn catalogue_kinds_sort_by_name() {
        assert_eq!(
            EntityKind::Customer.default_ordering(),
            OrderingPolicy::Field {
                field: "name".into(),
                direction: Direction::Ascending
            }
        );
        assert_eq!(
            EntityKind::Payment.default_ordering(),
            OrderingPolicy::NewestFirst
        );
    }
}
