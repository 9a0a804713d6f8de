// ── Snapshot loader contract ──
//
// The engine never fetches rows itself. Whoever embeds it supplies a
// `SnapshotLoader` that returns the full current row set for a scope.

use std::future::Future;

use crate::error::SnapshotError;
use crate::model::{EntityKind, Record, TenantKey};

/// Fetches the complete current collection for `(kind, tenant)`.
///
/// Called once per scope on first observe and again on every resync. A
/// failed load is retried with backoff; the scope stays not-live until one
/// succeeds.
///
/// Any `Fn(EntityKind, TenantKey) -> impl Future<...>` closure is a loader:
///
/// ```ignore
/// let loader = |kind: EntityKind, tenant: TenantKey| async move {
///     api.fetch_rows(kind.table(), tenant.as_str()).await
/// };
/// ```
pub trait SnapshotLoader: Send + Sync + 'static {
    fn load(
        &self,
        kind: EntityKind,
        tenant: &TenantKey,
    ) -> impl Future<Output = Result<Vec<Record>, SnapshotError>> + Send;
}

impl<F, Fut> SnapshotLoader for F
where
    F: Fn(EntityKind, TenantKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>, SnapshotError>> + Send,
{
    fn load(
        &self,
        kind: EntityKind,
        tenant: &TenantKey,
    ) -> impl Future<Output = Result<Vec<Record>, SnapshotError>> + Send {
        self(kind, tenant.clone())
    }
}
