// rowsync-core: tenant-scoped collections kept live from a row change stream.

pub mod change_stream;
pub mod config;
pub mod error;
pub mod loader;
pub mod manager;
pub mod model;
pub mod store;
pub mod stream;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use change_stream::{ChangeStream, StreamLease, StreamMessage, StreamSubscription};
pub use config::SyncConfig;
pub use error::{SnapshotError, SyncError};
pub use loader::SnapshotLoader;
pub use manager::{Observation, SubscriptionManager};
pub use store::{Applied, Direction, EventBuffer, LocalCollection, OrderingPolicy};
pub use stream::{ReadView, RecordFilter, ScopeView, ScopeViewStream, SyncStatus, TypedView};
pub use supervisor::{
    BackoffConfig, ConnectionState, ConnectionSupervisor, InvalidTransition, SupervisorInput,
    Transition,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ChangeEvent, ChangeKind, ConsumerId, Customer, Entity, EntityKind, Expense, Invoice, Payment,
    Product, Record, RecordId, SubscriptionScope, TenantKey,
};
