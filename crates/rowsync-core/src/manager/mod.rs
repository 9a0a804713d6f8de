// ── Subscription manager ──
//
// Public entry point. Registers interest in (kind, tenant) scopes,
// multiplexes consumers over one driver per scope, and tears a scope down
// when its last consumer leaves.

mod driver;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use rowsync_api::Transport;

use crate::change_stream::{ChangeStream, StreamLease};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::loader::SnapshotLoader;
use crate::model::{ConsumerId, Entity, EntityKind, SubscriptionScope, TenantKey};
use crate::stream::{ReadView, ScopeView, TypedView};

use self::driver::{Control, ScopeDriver};

// ── Scope registry ───────────────────────────────────────────────────

/// Identifies one `Observation` for the lifetime of its registry. Never
/// reused, so a handle from a torn-down scope cannot release a newer one.
type ObservationId = u64;

struct ScopeEntry {
    /// Live observations per consumer.
    consumers: HashMap<ConsumerId, HashSet<ObservationId>>,
    view: watch::Receiver<Arc<ScopeView>>,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    // Dropped with the entry, which closes an unshared connection.
    _lease: StreamLease,
}

impl ScopeEntry {
    fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

/// Every observed scope. Shared with `Observation`s so they can release
/// themselves on drop without knowing the manager's type parameters.
#[derive(Default)]
struct ScopeRegistry {
    scopes: DashMap<SubscriptionScope, ScopeEntry>,
    next_observation: AtomicU64,
}

enum Release {
    /// One observation went away.
    One(ObservationId),
    /// The consumer unobserved explicitly: all of its observations.
    All,
}

impl ScopeRegistry {
    fn next_id(&self) -> ObservationId {
        self.next_observation.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns `true` if the scope was torn down.
    fn release(&self, scope: &SubscriptionScope, consumer: &ConsumerId, release: Release) -> bool {
        let removed = self.scopes.remove_if_mut(scope, |_, entry| {
            match release {
                Release::All => {
                    entry.consumers.remove(consumer);
                }
                Release::One(id) => {
                    let Some(observations) = entry.consumers.get_mut(consumer) else {
                        return false;
                    };
                    // unknown id: the handle outlived its registration
                    if !observations.remove(&id) {
                        return false;
                    }
                    if observations.is_empty() {
                        entry.consumers.remove(consumer);
                    }
                }
            }
            entry.consumers.is_empty()
        });

        match removed {
            Some((scope, entry)) => {
                entry.cancel.cancel();
                info!(%scope, "last consumer gone, scope torn down");
                true
            }
            None => false,
        }
    }
}

// ── Observation ──────────────────────────────────────────────────────

/// One consumer's handle on a scope: a read view plus the unobserve.
///
/// Dropping it unobserves. Explicit [`SubscriptionManager::unobserve`] and
/// drop are idempotent with each other.
pub struct Observation {
    id: ObservationId,
    scope: SubscriptionScope,
    consumer: ConsumerId,
    view: ReadView,
    registry: Weak<ScopeRegistry>,
    released: bool,
}

impl Observation {
    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    pub fn view(&self) -> &ReadView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ReadView {
        &mut self.view
    }

    /// The most recently published view.
    pub fn latest(&self) -> Arc<ScopeView> {
        self.view.latest()
    }

    /// Wait for the next publish. `None` once the scope is gone.
    pub async fn changed(&mut self) -> Option<Arc<ScopeView>> {
        self.view.changed().await
    }

    /// A typed reader over the same scope. The observation still owns the
    /// subscription: keep it alive as long as the typed view is used.
    pub fn typed<T: Entity>(&self) -> Result<TypedView<T>, SyncError> {
        TypedView::new(self.view.clone())
    }

    pub fn unobserve(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.scope, &self.consumer, Release::One(self.id));
        }
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observation")
            .field("scope", &self.scope)
            .field("consumer", &self.consumer)
            .field("released", &self.released)
            .finish()
    }
}

// ── SubscriptionManager ──────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Each observed scope gets one
/// driver task that owns its collection; consumers only ever read.
pub struct SubscriptionManager<L: SnapshotLoader, Tr: Transport> {
    inner: Arc<ManagerInner<L, Tr>>,
}

struct ManagerInner<L: SnapshotLoader, Tr: Transport> {
    config: SyncConfig,
    loader: Arc<L>,
    stream: ChangeStream<Tr>,
    registry: Arc<ScopeRegistry>,
    cancel: CancellationToken,
}

impl<L: SnapshotLoader, Tr: Transport> Clone for SubscriptionManager<L, Tr> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: SnapshotLoader, Tr: Transport> Drop for ManagerInner<L, Tr> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<L: SnapshotLoader, Tr: Transport> SubscriptionManager<L, Tr> {
    /// Create a manager. Nothing connects until the first `observe`.
    pub fn new(loader: L, transport: Tr, config: SyncConfig) -> Self {
        let stream = ChangeStream::new(transport, &config);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                loader: Arc::new(loader),
                stream,
                registry: Arc::new(ScopeRegistry::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The shared change stream, for connection introspection.
    pub fn change_stream(&self) -> &ChangeStream<Tr> {
        &self.inner.stream
    }

    /// Register `consumer`'s interest in `(kind, tenant)`.
    ///
    /// The first observer of a scope starts it: the stream subscription is
    /// opened and the snapshot requested in the same step, so no change
    /// delivered after this call is missed. A snapshot counts toward the
    /// first subscription only if that subscription is acknowledged within
    /// `SyncConfig::snapshot_timeout` of the request; a slower first connect
    /// reloads. Later observers share the running scope. Must be called
    /// inside a Tokio runtime.
    pub fn observe(
        &self,
        kind: EntityKind,
        tenant: impl Into<TenantKey>,
        consumer: ConsumerId,
    ) -> Observation {
        let scope = SubscriptionScope::new(kind, tenant);
        let id = self.inner.registry.next_id();

        let view = match self.inner.registry.scopes.entry(scope.clone()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry
                    .consumers
                    .entry(consumer.clone())
                    .or_default()
                    .insert(id);
                debug!(%scope, %consumer, consumers = entry.consumer_count(), "observing running scope");
                entry.view.clone()
            }
            Entry::Vacant(slot) => {
                let entry = self.start_scope(&scope, consumer.clone(), id);
                let view = entry.view.clone();
                slot.insert(entry);
                info!(%scope, %consumer, "scope observed");
                view
            }
        };

        Observation {
            id,
            scope,
            consumer,
            view: ReadView::new(view),
            registry: Arc::downgrade(&self.inner.registry),
            released: false,
        }
    }

    /// [`observe`](Self::observe) keyed by an entity type.
    pub fn observe_entity<T: Entity>(
        &self,
        tenant: impl Into<TenantKey>,
        consumer: ConsumerId,
    ) -> Observation {
        self.observe(T::KIND, tenant, consumer)
    }

    /// Remove `consumer` from `scope`. At zero consumers the stream lease
    /// is released and the scope's collection discarded. Returns `true` if
    /// the scope was torn down.
    pub fn unobserve(&self, scope: &SubscriptionScope, consumer: &ConsumerId) -> bool {
        self.inner.registry.release(scope, consumer, Release::All)
    }

    /// Force a snapshot reload for `scope`. Returns `false` if the scope is
    /// not observed.
    pub fn request_resync(&self, scope: &SubscriptionScope) -> bool {
        self.inner
            .registry
            .scopes
            .get(scope)
            .is_some_and(|entry| entry.control.send(Control::Resync).is_ok())
    }

    /// A fresh read view of an observed scope, without registering a consumer.
    pub fn view(&self, scope: &SubscriptionScope) -> Option<ReadView> {
        self.inner
            .registry
            .scopes
            .get(scope)
            .map(|entry| ReadView::new(entry.view.clone()))
    }

    /// Currently observed scopes.
    pub fn scopes(&self) -> Vec<SubscriptionScope> {
        self.inner
            .registry
            .scopes
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Distinct consumers observing `scope`.
    pub fn consumer_count(&self, scope: &SubscriptionScope) -> usize {
        self.inner
            .registry
            .scopes
            .get(scope)
            .map_or(0, |entry| entry.consumer_count())
    }

    /// Tear down every scope and wait for the drivers to stop.
    pub async fn shutdown(&self) {
        let scopes = self.scopes();
        let mut handles = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if let Some((_, entry)) = self.inner.registry.scopes.remove(&scope) {
                entry.cancel.cancel();
                handles.push(entry.task);
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
        self.inner.stream.shutdown();
        debug!("subscription manager shut down");
    }

    fn start_scope(
        &self,
        scope: &SubscriptionScope,
        consumer: ConsumerId,
        id: ObservationId,
    ) -> ScopeEntry {
        let (messages, state, lease) = self.inner.stream.subscribe(scope).into_parts();
        let connection = state.borrow().clone();

        let (view_tx, view_rx) = watch::channel(Arc::new(ScopeView::loading(
            scope.clone(),
            connection.clone(),
        )));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = self.inner.cancel.child_token();

        let driver = ScopeDriver::new(
            scope.clone(),
            Arc::clone(&self.inner.loader),
            &self.inner.config,
            connection,
            view_tx,
        );
        let task = tokio::spawn(driver.run(messages, control_rx, cancel.clone()));

        ScopeEntry {
            consumers: HashMap::from([(consumer, HashSet::from([id]))]),
            view: view_rx,
            control: control_tx,
            cancel,
            task,
            _lease: lease,
        }
    }
}
