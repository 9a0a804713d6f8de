#![allow(clippy::unwrap_used)]
// Integration tests for `WsTransport` against a local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use rowsync_api::{Error, InboundFrame, RealtimeConfig, Transport, TransportFilter, WsTransport};

// ── Helpers ─────────────────────────────────────────────────────────

/// Bind a listener on an ephemeral port and return it with its ws:// URL.
async fn listen() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = Url::parse(&format!("ws://{addr}/realtime/v1")).unwrap();
    (listener, url)
}

fn invoices() -> TransportFilter {
    TransportFilter::new("invoices", "org_id", "org-42")
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_subscribe_then_stream_changes() {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected subscribe frame");
        };
        let subscribe: Value = serde_json::from_str(&text).unwrap();

        ws.send(Message::Text(json!({ "type": "subscribed" }).to_string().into()))
            .await
            .unwrap();
        ws.send(Message::Text(
            json!({ "eventType": "INSERT", "new": { "id": 2, "amount": 50 } })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text("garbage".into())).await.unwrap();
        ws.send(Message::Text(json!({ "type": "heartbeat" }).to_string().into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();

        subscribe
    });

    let transport = WsTransport::new(RealtimeConfig::new(url));
    let mut frames = transport.open(&invoices()).await.unwrap();

    assert_eq!(
        frames.next().await.unwrap().unwrap(),
        InboundFrame::Subscribed
    );

    let InboundFrame::Change(change) = frames.next().await.unwrap().unwrap() else {
        panic!("expected change frame");
    };
    assert_eq!(change.event_type, "INSERT");
    assert_eq!(change.new.unwrap()["amount"], 50);

    // the garbage frame is skipped, the heartbeat is not
    assert_eq!(
        frames.next().await.unwrap().unwrap(),
        InboundFrame::Heartbeat
    );

    // server close surfaces as an error, then the stream ends
    assert!(matches!(
        frames.next().await,
        Some(Err(Error::WebSocketClosed { .. }))
    ));

    let subscribe = server.await.unwrap();
    assert_eq!(
        subscribe,
        json!({ "type": "subscribe", "table": "invoices", "filter": "org_id=eq.org-42" })
    );
}

#[tokio::test]
async fn test_api_key_header_is_sent() {
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut seen = None;
        let callback = |req: &Request, resp: Response| {
            seen = req
                .headers()
                .get("apikey")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            Ok::<_, ErrorResponse>(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
            .await
            .unwrap();
        let _ = ws.next().await;
        seen
    });

    let mut config = RealtimeConfig::new(url);
    config.api_key = Some("anon-key".to_string().into());
    let transport = WsTransport::new(config);
    let _frames = transport.open(&invoices()).await.unwrap();

    assert_eq!(server.await.unwrap().as_deref(), Some("anon-key"));
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind then drop to get a port nobody listens on.
    let (listener, url) = listen().await;
    drop(listener);

    let mut config = RealtimeConfig::new(url);
    config.connect_timeout = Duration::from_secs(2);
    let transport = WsTransport::new(config);

    let result = transport.open(&invoices()).await;
    assert!(
        matches!(result, Err(Error::WebSocketConnect(_) | Error::Timeout { .. })),
        "expected connect failure"
    );
}
