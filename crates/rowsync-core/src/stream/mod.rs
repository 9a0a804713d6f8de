// ── Consumer read views ──
//
// What observers of a scope see. Every published `ScopeView` is an immutable
// snapshot: a reader never observes a half-applied change.

mod filter;
mod typed;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub use filter::RecordFilter;
pub use typed::TypedView;

use crate::error::SyncError;
use crate::model::{Entity, Record, RecordId, SubscriptionScope};
use crate::supervisor::ConnectionState;

/// How far a scope's data can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SyncStatus {
    /// No trusted data yet (initial load, or rebuilding after a fault).
    Loading,
    /// Snapshot loaded in the current connection epoch and changes flowing.
    Live,
    /// Data present but possibly behind: a resync is pending or the
    /// connection is not subscribed.
    Stale,
}

/// One published state of a scope.
#[derive(Debug, Clone)]
pub struct ScopeView {
    pub(crate) scope: SubscriptionScope,
    pub(crate) records: Arc<Vec<Arc<Record>>>,
    /// Position of each id in `records`.
    pub(crate) positions: Arc<HashMap<RecordId, usize>>,
    pub(crate) connection: ConnectionState,
    pub(crate) status: SyncStatus,
    pub(crate) version: u64,
    pub(crate) synced_at: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<String>,
}

impl ScopeView {
    pub(crate) fn loading(scope: SubscriptionScope, connection: ConnectionState) -> Self {
        Self {
            scope,
            records: Arc::new(Vec::new()),
            positions: Arc::new(HashMap::new()),
            connection,
            status: SyncStatus::Loading,
            version: 0,
            synced_at: None,
            last_error: None,
        }
    }

    /// Replace the records, reindexing them.
    pub(crate) fn with_records(mut self, records: Arc<Vec<Arc<Record>>>) -> Self {
        self.positions = Arc::new(
            records
                .iter()
                .enumerate()
                .map(|(i, record)| (record.id().clone(), i))
                .collect(),
        );
        self.records = records;
        self
    }

    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    /// Records in display order.
    pub fn data(&self) -> &Arc<Vec<Arc<Record>>> {
        &self.records
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn is_live(&self) -> bool {
        self.status == SyncStatus::Live
    }

    /// Bumped on every publish.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When the current snapshot was loaded.
    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    /// Most recent snapshot failure, cleared by the next successful load.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn get(&self, id: &RecordId) -> Option<&Arc<Record>> {
        self.positions.get(id).and_then(|&i| self.records.get(i))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn filtered(&self, filter: &RecordFilter) -> Vec<Arc<Record>> {
        self.records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// Decode every record into `T`.
    pub fn decode<T: Entity>(&self) -> Result<Vec<T>, SyncError> {
        if self.scope.kind != T::KIND {
            return Err(SyncError::KindMismatch {
                expected: T::KIND,
                actual: self.scope.kind,
            });
        }
        self.records
            .iter()
            .map(|record| {
                serde_json::from_value(record.to_value()).map_err(|e| SyncError::InvalidRecord {
                    reason: format!("record '{}' as {}: {e}", record.id(), T::KIND),
                })
            })
            .collect()
    }
}

/// A subscription to one scope's published views.
///
/// Provides both point-in-time access and change notification via
/// [`changed`](Self::changed) or by converting to a `Stream`.
#[derive(Debug)]
pub struct ReadView {
    current: Arc<ScopeView>,
    receiver: watch::Receiver<Arc<ScopeView>>,
}

impl ReadView {
    pub(crate) fn new(receiver: watch::Receiver<Arc<ScopeView>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The view captured at creation or at the last `changed()`.
    pub fn current(&self) -> &Arc<ScopeView> {
        &self.current
    }

    /// The most recently published view.
    pub fn latest(&self) -> Arc<ScopeView> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next publish. Returns `None` once the scope has been
    /// torn down.
    pub async fn changed(&mut self) -> Option<Arc<ScopeView>> {
        self.receiver.changed().await.ok()?;
        let view = self.receiver.borrow_and_update().clone();
        self.current = view.clone();
        Some(view)
    }

    /// Wait until a published view satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&ScopeView) -> bool,
    ) -> Option<Arc<ScopeView>> {
        let view = self
            .receiver
            .wait_for(|view| predicate(view.as_ref()))
            .await
            .ok()?
            .clone();
        self.current = view.clone();
        Some(view)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> ScopeViewStream {
        ScopeViewStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

impl Clone for ReadView {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields the current view first, then one item per publish.
pub struct ScopeViewStream {
    inner: WatchStream<Arc<ScopeView>>,
}

impl Stream for ScopeViewStream {
    type Item = Arc<ScopeView>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Customer, EntityKind, Invoice};
    use serde_json::json;

    fn view(kind: EntityKind, rows: Vec<serde_json::Value>) -> ScopeView {
        let mut view = ScopeView::loading(
            SubscriptionScope::new(kind, "org-1"),
            ConnectionState::Subscribed,
        )
        .with_records(Arc::new(
            rows.into_iter()
                .map(|r| Arc::new(Record::try_from(r).unwrap()))
                .collect(),
        ));
        view.status = SyncStatus::Live;
        view
    }

    #[test]
    fn decodes_typed_records() {
        let v = view(
            EntityKind::Invoice,
            vec![json!({ "id": 1, "amount": 150 }), json!({ "id": 2, "amount": 50 })],
        );
        let invoices: Vec<Invoice> = v.decode().unwrap();
        assert_eq!(invoices.len(), 2);
        assert_eq!(invoices[0].id.as_str(), "1");
        assert!(v.get(&RecordId::from(2)).is_some());
    }

    #[test]
    fn get_finds_records_by_position() {
        let v = view(
            EntityKind::Invoice,
            vec![json!({ "id": "c" }), json!({ "id": 7 }), json!({ "id": "a" })],
        );
        for (i, record) in v.data().iter().enumerate() {
            assert_eq!(v.get(record.id()), v.data().get(i));
        }
        assert_eq!(v.get(&RecordId::from(7)).unwrap().id().as_str(), "7");
        assert!(v.get(&RecordId::from("missing")).is_none());
    }

    #[test]
    fn decode_rejects_other_kinds() {
        let v = view(EntityKind::Invoice, vec![]);
        let err = v.decode::<Customer>().unwrap_err();
        assert!(matches!(err, SyncError::KindMismatch { .. }));
    }

    #[test]
    fn decode_reports_bad_rows() {
        let v = view(EntityKind::Customer, vec![json!({ "id": 1 })]);
        let err = v.decode::<Customer>().unwrap_err();
        assert!(err.to_string().contains("record '1'"));
    }

    #[tokio::test]
    async fn read_view_tracks_publishes() {
        let (tx, rx) = watch::channel(Arc::new(ScopeView::loading(
            SubscriptionScope::new(EntityKind::Invoice, "org-1"),
            ConnectionState::Connecting,
        )));
        let mut reader = ReadView::new(rx);
        assert_eq!(reader.current().status(), SyncStatus::Loading);

        tx.send_replace(Arc::new(view(EntityKind::Invoice, vec![json!({ "id": 1 })])));
        let next = reader.changed().await.unwrap();
        assert!(next.is_live());
        assert_eq!(reader.current().len(), 1);

        drop(tx);
        assert!(reader.changed().await.is_none());
    }

    #[tokio::test]
    async fn typed_view_checks_kind() {
        let (_tx, rx) = watch::channel(Arc::new(view(EntityKind::Invoice, vec![])));
        assert!(TypedView::<Invoice>::new(ReadView::new(rx.clone())).is_ok());
        assert!(TypedView::<Customer>::new(ReadView::new(rx)).is_err());
    }
}
