// ── Change stream ──
//
// Shares physical connections between subscribers. One connection task per
// unique transport filter; subscribers hold a lease and the last lease to
// drop tears the connection down. The task decodes raw frames into typed
// change events and drives the connection supervisor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use rowsync_api::{FrameStream, InboundFrame, Transport, TransportFilter};

use crate::config::SyncConfig;
use crate::model::{ChangeEvent, SubscriptionScope};
use crate::supervisor::{
    BackoffConfig, ConnectionState, ConnectionSupervisor, SupervisorInput, jitter_seed,
};

/// One item on a connection's broadcast channel, in delivery order.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Change(Arc<ChangeEvent>),
    State(ConnectionState),
    /// The connection re-subscribed after an outage. Changes made while it
    /// was down were not delivered.
    ResyncRequired,
}

// ── Hub registry ─────────────────────────────────────────────────────

struct Hub {
    refs: usize,
    messages: broadcast::Sender<StreamMessage>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

type Hubs = DashMap<TransportFilter, Hub>;

/// Keeps a shared connection alive. Dropping it is the unsubscribe.
pub struct StreamLease {
    hubs: Arc<Hubs>,
    filter: TransportFilter,
}

impl std::fmt::Debug for StreamLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLease")
            .field("filter", &self.filter)
            .finish()
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.hubs.entry(self.filter.clone()) {
            let hub = entry.get_mut();
            hub.refs = hub.refs.saturating_sub(1);
            if hub.refs == 0 {
                let hub = entry.remove();
                hub.cancel.cancel();
                debug!(filter = %self.filter, "last subscriber gone, closing connection");
            }
        }
    }
}

/// A live subscription to one scope's change stream.
pub struct StreamSubscription {
    messages: broadcast::Receiver<StreamMessage>,
    state: watch::Receiver<ConnectionState>,
    lease: StreamLease,
}

impl StreamSubscription {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn messages(&mut self) -> &mut broadcast::Receiver<StreamMessage> {
        &mut self.messages
    }

    pub fn into_parts(
        self,
    ) -> (
        broadcast::Receiver<StreamMessage>,
        watch::Receiver<ConnectionState>,
        StreamLease,
    ) {
        (self.messages, self.state, self.lease)
    }
}

// ── ChangeStream ─────────────────────────────────────────────────────

/// Connection-sharing front end over a [`Transport`].
///
/// Cheaply cloneable; clones share connections.
pub struct ChangeStream<Tr: Transport> {
    transport: Arc<Tr>,
    hubs: Arc<Hubs>,
    settings: ConnectionSettings,
}

impl<Tr: Transport> Clone for ChangeStream<Tr> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            hubs: Arc::clone(&self.hubs),
            settings: self.settings,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    backoff: BackoffConfig,
    stability_window: Duration,
    channel_capacity: usize,
}

impl<Tr: Transport> ChangeStream<Tr> {
    pub fn new(transport: Tr, config: &SyncConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            hubs: Arc::new(DashMap::new()),
            settings: ConnectionSettings {
                backoff: config.reconnect,
                stability_window: config.stability_window,
                channel_capacity: config.channel_capacity.max(1),
            },
        }
    }

    /// Subscribe to `scope`'s changes, opening a connection if none is
    /// shared for its filter yet. Must be called inside a Tokio runtime.
    pub fn subscribe(&self, scope: &SubscriptionScope) -> StreamSubscription {
        let filter = scope.filter();

        let (messages, state) = match self.hubs.entry(filter.clone()) {
            Entry::Occupied(mut entry) => {
                let hub = entry.get_mut();
                hub.refs += 1;
                trace!(%filter, refs = hub.refs, "sharing connection");
                (hub.messages.subscribe(), hub.state.clone())
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(self.settings.channel_capacity);
                let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
                let cancel = CancellationToken::new();

                tokio::spawn(connection_loop(
                    Arc::clone(&self.transport),
                    scope.clone(),
                    tx.clone(),
                    state_tx,
                    cancel.clone(),
                    self.settings,
                ));

                entry.insert(Hub {
                    refs: 1,
                    messages: tx,
                    state: state_rx.clone(),
                    cancel,
                });
                (rx, state_rx)
            }
        };

        StreamSubscription {
            messages,
            state,
            lease: StreamLease {
                hubs: Arc::clone(&self.hubs),
                filter,
            },
        }
    }

    /// Number of open physical connections.
    pub fn connection_count(&self) -> usize {
        self.hubs.len()
    }

    /// Subscribers sharing the connection for `filter`.
    pub fn subscriber_count(&self, filter: &TransportFilter) -> usize {
        self.hubs.get(filter).map_or(0, |hub| hub.refs)
    }

    /// Close every connection. Outstanding leases become no-ops.
    pub fn shutdown(&self) {
        for hub in self.hubs.iter() {
            hub.cancel.cancel();
        }
        self.hubs.clear();
    }
}

// ── Connection task ──────────────────────────────────────────────────

struct Publisher {
    messages: broadcast::Sender<StreamMessage>,
    state: watch::Sender<ConnectionState>,
}

impl Publisher {
    fn state(&self, state: ConnectionState) {
        self.state.send_replace(state.clone());
        // no receivers just means nobody is listening right now
        let _ = self.messages.send(StreamMessage::State(state));
    }

    fn message(&self, message: StreamMessage) {
        let _ = self.messages.send(message);
    }
}

/// Main loop: connect → read → on failure, backoff → reconnect.
async fn connection_loop<Tr: Transport>(
    transport: Arc<Tr>,
    scope: SubscriptionScope,
    messages: broadcast::Sender<StreamMessage>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    settings: ConnectionSettings,
) {
    let filter = scope.filter();
    let publish = Publisher { messages, state };
    let mut supervisor = ConnectionSupervisor::new(
        settings.backoff,
        settings.stability_window,
        jitter_seed(&filter),
    );

    loop {
        drive(&mut supervisor, &publish, SupervisorInput::Connect);
        info!(%filter, "connecting");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            opened = transport.open(&filter) => opened,
        };

        let reason = match opened {
            Ok(frames) => {
                match read_frames(frames, &scope, &mut supervisor, &publish, &cancel).await {
                    Some(reason) => reason,
                    None => break,
                }
            }
            Err(e) => e.to_string(),
        };

        warn!(%filter, reason = %reason, "connection lost");
        drive(&mut supervisor, &publish, SupervisorInput::Error(reason));

        let delay = supervisor.next_delay();
        info!(
            %filter,
            delay_ms = delay.as_millis() as u64,
            attempt = supervisor.attempt(),
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    drive(&mut supervisor, &publish, SupervisorInput::Close);
    debug!(%filter, "connection loop exiting");
}

/// Read one connection until it fails. Returns the failure reason, or
/// `None` if cancelled.
async fn read_frames(
    mut frames: FrameStream,
    scope: &SubscriptionScope,
    supervisor: &mut ConnectionSupervisor,
    publish: &Publisher,
    cancel: &CancellationToken,
) -> Option<String> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(InboundFrame::Subscribed)) => {
                if drive(supervisor, publish, SupervisorInput::Ack) {
                    info!(%scope, "resubscribed after outage, resync required");
                    publish.message(StreamMessage::ResyncRequired);
                }
            }
            Some(Ok(InboundFrame::Change(raw))) => {
                match ChangeEvent::from_wire(scope, raw, Utc::now()) {
                    Ok(event) => publish.message(StreamMessage::Change(Arc::new(event))),
                    Err(e) => warn!(%scope, error = %e, "dropping change event"),
                }
            }
            Some(Ok(InboundFrame::Heartbeat)) => trace!(%scope, "heartbeat"),
            Some(Ok(InboundFrame::Error { message })) => {
                return Some(format!("server error: {message}"));
            }
            Some(Err(e)) => return Some(e.to_string()),
            None => return Some("connection closed".into()),
        }
    }
}

/// Apply one input and publish the resulting state. Returns whether the
/// transition requires a resync.
fn drive(supervisor: &mut ConnectionSupervisor, publish: &Publisher, input: SupervisorInput) -> bool {
    match supervisor.handle(input, tokio::time::Instant::now()) {
        Ok(transition) => {
            publish.state(transition.state);
            transition.resync_required
        }
        Err(e) => {
            debug!(error = %e, "ignoring supervisor input");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use futures_util::stream;
    use rowsync_api::Error;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Opens a connection that acks and then stays open forever.
    struct PendingTransport {
        opened: Arc<AtomicUsize>,
    }

    impl Transport for PendingTransport {
        fn open(
            &self,
            _filter: &TransportFilter,
        ) -> impl Future<Output = Result<FrameStream, Error>> + Send {
            self.opened.fetch_add(1, Ordering::SeqCst);
            async {
                let frames: FrameStream = Box::pin(
                    stream::iter([Ok::<_, Error>(InboundFrame::Subscribed)])
                        .chain(stream::pending()),
                );
                Ok(frames)
            }
        }
    }

    fn change_stream() -> (ChangeStream<PendingTransport>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let transport = PendingTransport {
            opened: Arc::clone(&opened),
        };
        (ChangeStream::new(transport, &SyncConfig::default()), opened)
    }

    #[tokio::test(start_paused = true)]
    async fn equal_filters_share_one_connection() {
        let (stream, opened) = change_stream();
        let scope = SubscriptionScope::new(EntityKind::Invoice, "org-1");
        let other = SubscriptionScope::new(EntityKind::Invoice, "org-2");

        let a = stream.subscribe(&scope);
        let b = stream.subscribe(&scope);
        let c = stream.subscribe(&other);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(stream.connection_count(), 2);
        assert_eq!(stream.subscriber_count(&scope.filter()), 2);
        assert_eq!(opened.load(Ordering::SeqCst), 2);

        drop(a);
        assert_eq!(stream.subscriber_count(&scope.filter()), 1);
        drop(b);
        assert_eq!(stream.connection_count(), 1);
        drop(c);
        assert_eq!(stream.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_subscribed_state() {
        let (stream, _) = change_stream();
        let scope = SubscriptionScope::new(EntityKind::Payment, "org-1");

        let sub = stream.subscribe(&scope);
        let (mut messages, mut state, _lease) = sub.into_parts();

        state
            .wait_for(ConnectionState::is_subscribed)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(message) = messages.try_recv() {
            if let StreamMessage::State(s) = message {
                seen.push(s);
            }
        }
        assert_eq!(seen, [ConnectionState::Connecting, ConnectionState::Subscribed]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_lease_drop_disconnects() {
        let (stream, _) = change_stream();
        let scope = SubscriptionScope::new(EntityKind::Expense, "org-1");

        let (_messages, mut state, lease) = stream.subscribe(&scope).into_parts();
        state
            .wait_for(ConnectionState::is_subscribed)
            .await
            .unwrap();

        drop(lease);
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
    }
}
