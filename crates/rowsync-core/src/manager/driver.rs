// ── Scope driver ──
//
// One task per observed scope. It exclusively owns the scope's collection
// and serialises everything that touches it: snapshot completion, stream
// messages, resync requests and retry timers. Mutation only goes through
// the reconciler.
//
// Epochs: every transition into `Subscribed` starts a new epoch. A snapshot
// remembers the epoch it was requested in and the scope is only live when
// that matches the current one. A snapshot requested before the scope ever
// saw a subscription belongs to the first epoch, unless that subscription
// took longer than a snapshot fetch may take; one requested during a later
// outage belongs to none and is reloaded once the stream is back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::change_stream::StreamMessage;
use crate::config::SyncConfig;
use crate::error::{SnapshotError, SyncError};
use crate::loader::SnapshotLoader;
use crate::model::{ChangeEvent, Record, SubscriptionScope};
use crate::store::{EventBuffer, LocalCollection, OrderingPolicy, apply};
use crate::stream::{ScopeView, SyncStatus};
use crate::supervisor::{BackoffConfig, ConnectionState, jitter_seed};

type SnapshotResult = Result<Vec<Record>, SnapshotError>;

/// Requests from the manager to a running driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Resync,
}

pub(crate) struct ScopeDriver<L: SnapshotLoader> {
    scope: SubscriptionScope,
    loader: Arc<L>,
    policy: OrderingPolicy,
    snapshot_timeout: std::time::Duration,
    retry_backoff: BackoffConfig,
    retry_seed: f64,

    /// `None` until a snapshot lands, and again after a consistency fault.
    collection: Option<LocalCollection>,
    buffer: EventBuffer,
    pending: Option<oneshot::Receiver<SnapshotResult>>,
    requested_at: Option<Instant>,
    retry_at: Option<Instant>,
    retry_attempt: u32,

    connection: ConnectionState,
    epoch: u64,
    snapshot_epoch: Option<u64>,

    synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    version: u64,
    view: watch::Sender<Arc<ScopeView>>,
}

impl<L: SnapshotLoader> ScopeDriver<L> {
    pub(crate) fn new(
        scope: SubscriptionScope,
        loader: Arc<L>,
        config: &SyncConfig,
        connection: ConnectionState,
        view: watch::Sender<Arc<ScopeView>>,
    ) -> Self {
        let epoch = u64::from(connection.is_subscribed());
        Self {
            policy: config.ordering_for(scope.kind),
            retry_seed: jitter_seed(&scope.filter()),
            scope,
            loader,
            snapshot_timeout: config.snapshot_timeout,
            retry_backoff: config.snapshot_retry,
            collection: None,
            buffer: EventBuffer::new(config.buffer_capacity),
            pending: None,
            requested_at: None,
            retry_at: None,
            retry_attempt: 0,
            connection,
            epoch,
            snapshot_epoch: None,
            synced_at: None,
            last_error: None,
            version: 0,
            view,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut messages: broadcast::Receiver<StreamMessage>,
        mut control: mpsc::UnboundedReceiver<Control>,
        cancel: CancellationToken,
    ) {
        info!(scope = %self.scope, "scope started");
        self.request_snapshot();
        self.publish();

        let mut stream_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(request) = control.recv() => self.on_control(request),
                message = messages.recv(), if stream_open => match message {
                    Ok(message) => self.on_message(message),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(scope = %self.scope, skipped, "fell behind the change stream");
                        self.reload("change stream lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!(scope = %self.scope, "change stream closed");
                        stream_open = false;
                        self.connection = ConnectionState::Disconnected;
                        self.publish();
                    }
                },
                result = next_snapshot(&mut self.pending) => self.on_snapshot(result),
                () = retry_timer(self.retry_at) => {
                    self.retry_at = None;
                    self.request_snapshot();
                    self.publish();
                }
            }
        }

        debug!(scope = %self.scope, "scope stopped");
    }

    // ── Inputs ───────────────────────────────────────────────────────

    fn on_control(&mut self, request: Control) {
        match request {
            Control::Resync => self.reload("resync requested"),
        }
    }

    fn on_message(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Change(event) => self.on_change(&event),
            StreamMessage::State(state) => self.on_state(state),
            StreamMessage::ResyncRequired => {
                if self.snapshot_epoch == Some(self.epoch) {
                    debug!(scope = %self.scope, epoch = self.epoch, "snapshot already current");
                } else {
                    self.reload("reconnected after outage");
                }
            }
        }
    }

    fn on_state(&mut self, state: ConnectionState) {
        let entering = state.is_subscribed() && !self.connection.is_subscribed();
        if entering {
            self.epoch += 1;
        }
        self.connection = state;

        if entering && self.is_ready() && self.snapshot_epoch != Some(self.epoch) {
            self.reload("snapshot predates subscription");
            return;
        }
        if entering && self.first_subscription_was_slow() {
            self.reload("first subscription outlived the snapshot");
            return;
        }
        self.publish();
    }

    fn on_change(&mut self, event: &ChangeEvent) {
        if !self.is_ready() {
            if !self.buffer.push(event.clone()) {
                warn!(
                    scope = %self.scope,
                    capacity = self.buffer.capacity(),
                    "event buffer overflow"
                );
                self.reload("event buffer overflow");
            }
            return;
        }

        if let Some(collection) = self.collection.as_mut() {
            if apply(collection, event).changed() {
                self.publish();
            }
        }
    }

    fn on_snapshot(&mut self, result: SnapshotResult) {
        self.pending = None;

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!(scope = %self.scope, error = %e, attempt = self.retry_attempt, "snapshot failed");
                self.last_error = Some(e.to_string());
                self.schedule_retry();
                self.publish();
                return;
            }
        };

        let mut collection = match LocalCollection::from_snapshot(
            self.scope.clone(),
            self.policy.clone(),
            records,
        ) {
            Ok(collection) => collection,
            Err(e) => return self.fault(e),
        };

        let replayed = self.buffer.len();
        for event in self.buffer.drain() {
            apply(&mut collection, &event);
        }
        if let Err(e) = collection.verify() {
            return self.fault(e);
        }

        info!(
            scope = %self.scope,
            records = collection.len(),
            replayed,
            epoch = ?self.snapshot_epoch,
            "snapshot loaded"
        );
        self.collection = Some(collection);
        self.retry_attempt = 0;
        self.last_error = None;
        self.synced_at = Some(Utc::now());

        if self.connection.is_subscribed() && self.snapshot_epoch != Some(self.epoch) {
            self.reload("snapshot predates subscription");
            return;
        }
        self.publish();
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Discard pending work and fetch a fresh snapshot. The current
    /// collection stays visible, flagged stale, until the new one lands.
    fn reload(&mut self, reason: &str) {
        info!(scope = %self.scope, reason, "resyncing");
        self.buffer.clear();
        self.pending = None;
        self.request_snapshot();
        self.publish();
    }

    /// A broken invariant: drop everything and rebuild after a backoff.
    fn fault(&mut self, e: SyncError) {
        error!(scope = %self.scope, error = %e, "discarding collection");
        self.collection = None;
        self.buffer.clear();
        self.pending = None;
        self.last_error = Some(e.to_string());
        self.schedule_retry();
        self.publish();
    }

    fn request_snapshot(&mut self) {
        let (tx, rx) = oneshot::channel();
        let loader = Arc::clone(&self.loader);
        let kind = self.scope.kind;
        let tenant = self.scope.tenant.clone();
        let timeout = self.snapshot_timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, loader.load(kind, &tenant)).await {
                Ok(result) => result,
                Err(_) => Err(SnapshotError::Timeout {
                    timeout_secs: timeout.as_secs(),
                }),
            };
            // receiver gone: the scope was torn down or reloaded meanwhile
            let _ = tx.send(result);
        });

        self.pending = Some(rx);
        self.requested_at = Some(Instant::now());
        self.retry_at = None;
        self.snapshot_epoch = if self.connection.is_subscribed() {
            Some(self.epoch)
        } else if self.epoch == 0 {
            // before the first subscription: counts toward it
            Some(1)
        } else {
            None
        };
        debug!(scope = %self.scope, epoch = ?self.snapshot_epoch, "snapshot requested");
    }

    fn schedule_retry(&mut self) {
        let delay = self.retry_backoff.delay(self.retry_attempt, self.retry_seed);
        self.retry_attempt = self.retry_attempt.saturating_add(1);
        self.retry_at = Some(Instant::now() + delay);
        info!(
            scope = %self.scope,
            delay_ms = delay.as_millis() as u64,
            "retrying snapshot"
        );
    }

    // ── Publishing ───────────────────────────────────────────────────

    /// The first epoch began so long after the snapshot was requested that
    /// changes committed in between may be missing from it.
    fn first_subscription_was_slow(&self) -> bool {
        self.epoch == 1
            && self.retry_at.is_none()
            && self
                .requested_at
                .is_some_and(|at| at.elapsed() > self.snapshot_timeout)
    }

    fn is_ready(&self) -> bool {
        self.pending.is_none() && self.retry_at.is_none() && self.collection.is_some()
    }

    fn status(&self) -> SyncStatus {
        if self.collection.is_none() {
            SyncStatus::Loading
        } else if self.is_ready()
            && self.connection.is_subscribed()
            && self.snapshot_epoch == Some(self.epoch)
        {
            SyncStatus::Live
        } else {
            SyncStatus::Stale
        }
    }

    fn publish(&mut self) {
        self.version += 1;
        let records = self
            .collection
            .as_ref()
            .map(LocalCollection::snapshot)
            .unwrap_or_default();
        let view = ScopeView {
            status: self.status(),
            version: self.version,
            synced_at: self.synced_at,
            last_error: self.last_error.clone(),
            ..ScopeView::loading(self.scope.clone(), self.connection.clone())
        }
        .with_records(records);
        self.view.send_replace(Arc::new(view));
    }
}

async fn next_snapshot(pending: &mut Option<oneshot::Receiver<SnapshotResult>>) -> SnapshotResult {
    match pending {
        Some(rx) => rx.await.unwrap_or_else(|_| {
            Err(SnapshotError::Network {
                message: "snapshot task ended without a result".into(),
            })
        }),
        None => std::future::pending().await,
    }
}

async fn retry_timer(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
