// ── Domain model ──
//
// Records, entity kinds, scopes and change events. Everything here is plain
// data: no I/O, no tasks.

pub mod entity;
pub mod event;
pub mod record;
pub mod scope;

pub use entity::{Customer, Entity, EntityKind, Expense, Invoice, Payment, Product};
pub use event::{ChangeEvent, ChangeKind};
pub use record::{ID_FIELD, Record, RecordId};
pub use scope::{ConsumerId, SubscriptionScope, TenantKey};
