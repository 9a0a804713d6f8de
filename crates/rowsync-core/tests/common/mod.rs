// Shared test harness: a scripted transport and a scripted snapshot loader.
//
// Each test drives both ends by hand: it accepts connections and pushes
// frames through them, and it answers snapshot requests when it chooses.
#![allow(dead_code, clippy::unwrap_used)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use rowsync_api::{Error, FrameStream, InboundFrame, RawChange, Transport, TransportFilter};
use rowsync_core::{
    EntityKind, Observation, Record, ScopeView, SnapshotError, SnapshotLoader, SubscriptionManager,
    SyncConfig, TenantKey,
};

pub type TestManager = SubscriptionManager<FakeLoader, FakeTransport>;

// ── Transport ───────────────────────────────────────────────────────

pub struct FakeTransport {
    connections: mpsc::UnboundedSender<Connection>,
    opened: Arc<AtomicUsize>,
}

/// Server side of one open connection.
pub struct Connection {
    pub filter: TransportFilter,
    frames: mpsc::UnboundedSender<Result<InboundFrame, Error>>,
}

impl Transport for FakeTransport {
    fn open(
        &self,
        filter: &TransportFilter,
    ) -> impl Future<Output = Result<FrameStream, Error>> + Send {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.connections.send(Connection {
            filter: filter.clone(),
            frames: tx,
        });
        async move {
            let frames: FrameStream = Box::pin(UnboundedReceiverStream::new(rx));
            Ok(frames)
        }
    }
}

impl Connection {
    fn push(&self, frame: InboundFrame) {
        self.frames.send(Ok(frame)).unwrap();
    }

    fn change(&self, value: Value) {
        let raw: RawChange = serde_json::from_value(value).unwrap();
        self.push(InboundFrame::Change(raw));
    }

    pub fn ack(&self) {
        self.push(InboundFrame::Subscribed);
    }

    pub fn insert(&self, row: Value) {
        self.change(json!({ "eventType": "INSERT", "new": row }));
    }

    pub fn update(&self, row: Value) {
        self.change(json!({ "eventType": "UPDATE", "new": row }));
    }

    pub fn delete(&self, row: Value) {
        self.change(json!({ "eventType": "DELETE", "old": row }));
    }

    pub fn raw(&self, value: Value) {
        self.change(value);
    }

    /// Fail the connection with an I/O error.
    pub fn fail(self, message: &str) {
        let _ = self.frames.send(Err(Error::WebSocketConnect(message.into())));
    }
}

pub struct TransportHandle {
    connections: mpsc::UnboundedReceiver<Connection>,
    opened: Arc<AtomicUsize>,
}

impl TransportHandle {
    pub async fn next_connection(&mut self) -> Connection {
        tokio::time::timeout(Duration::from_secs(120), self.connections.recv())
            .await
            .expect("no connection opened")
            .unwrap()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

// ── Loader ──────────────────────────────────────────────────────────

pub struct FakeLoader {
    requests: mpsc::UnboundedSender<LoadRequest>,
    loads: Arc<AtomicUsize>,
}

/// One pending snapshot fetch.
pub struct LoadRequest {
    pub kind: EntityKind,
    pub tenant: TenantKey,
    respond: oneshot::Sender<Result<Vec<Record>, SnapshotError>>,
}

impl LoadRequest {
    pub fn respond(self, rows: Vec<Value>) {
        let records = rows
            .into_iter()
            .map(|row| Record::try_from(row).unwrap())
            .collect();
        let _ = self.respond.send(Ok(records));
    }

    pub fn fail(self, error: SnapshotError) {
        let _ = self.respond.send(Err(error));
    }
}

impl SnapshotLoader for FakeLoader {
    fn load(
        &self,
        kind: EntityKind,
        tenant: &TenantKey,
    ) -> impl Future<Output = Result<Vec<Record>, SnapshotError>> + Send {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let _ = self.requests.send(LoadRequest {
            kind,
            tenant: tenant.clone(),
            respond: tx,
        });
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(SnapshotError::Network {
                    message: "request dropped".into(),
                })
            })
        }
    }
}

pub struct LoaderHandle {
    requests: mpsc::UnboundedReceiver<LoadRequest>,
    loads: Arc<AtomicUsize>,
}

impl LoaderHandle {
    pub async fn next_request(&mut self) -> LoadRequest {
        tokio::time::timeout(Duration::from_secs(120), self.requests.recv())
            .await
            .expect("no snapshot requested")
            .unwrap()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub fn harness() -> (TestManager, LoaderHandle, TransportHandle) {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> (TestManager, LoaderHandle, TransportHandle) {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let loads = Arc::new(AtomicUsize::new(0));
    let loader = FakeLoader {
        requests: requests_tx,
        loads: Arc::clone(&loads),
    };

    let (connections_tx, connections_rx) = mpsc::unbounded_channel();
    let opened = Arc::new(AtomicUsize::new(0));
    let transport = FakeTransport {
        connections: connections_tx,
        opened: Arc::clone(&opened),
    };

    (
        SubscriptionManager::new(loader, transport, config),
        LoaderHandle {
            requests: requests_rx,
            loads,
        },
        TransportHandle {
            connections: connections_rx,
            opened,
        },
    )
}

// ── Views ───────────────────────────────────────────────────────────

/// Wait until the observed scope publishes a view matching `predicate`.
pub async fn wait_until(
    observation: &mut Observation,
    predicate: impl FnMut(&ScopeView) -> bool,
) -> Arc<ScopeView> {
    tokio::time::timeout(
        Duration::from_secs(120),
        observation.view_mut().wait_for(predicate),
    )
    .await
    .expect("view never matched")
    .expect("scope torn down")
}

/// Rows of a view as plain JSON, in display order.
pub fn rows(view: &ScopeView) -> Vec<Value> {
    view.data().iter().map(|r| r.to_value()).collect()
}

pub fn ids(view: &ScopeView) -> Vec<String> {
    view.data().iter().map(|r| r.id().to_string()).collect()
}

/// Let spawned tasks run without advancing past any pending deadline.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
