//! WebSocket realtime transport.
//!
//! Opens one WebSocket per [`TransportFilter`], writes the subscribe frame
//! and exposes inbound frames as a [`FrameStream`]. Reconnection is not
//! handled here: a finished stream is reported upward and the connection
//! supervisor in `rowsync-core` decides when to call [`Transport::open`]
//! again.
//!
//! # Example
//!
//! ```rust,ignore
//! use rowsync_api::{RealtimeConfig, Transport, TransportFilter, WsTransport};
//! use futures_util::StreamExt;
//!
//! let transport = WsTransport::new(RealtimeConfig::new("wss://db.example.com/realtime/v1".parse()?));
//! let filter = TransportFilter::new("invoices", "org_id", "org-42");
//! let mut frames = transport.open(&filter).await?;
//!
//! while let Some(frame) = frames.next().await {
//!     println!("{:?}", frame?);
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use crate::error::Error;
use crate::filter::TransportFilter;
use crate::transport::{FrameStream, Transport};
use crate::wire::{self, InboundFrame, SubscribeFrame};

// ── RealtimeConfig ───────────────────────────────────────────────────

/// Where and how to reach the realtime endpoint.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint, e.g. `wss://db.example.com/realtime/v1`.
    pub url: Url,

    /// Project API key, sent as the `apikey` header when present.
    pub api_key: Option<SecretString>,

    /// Upper bound on the WebSocket handshake. Default: 10s.
    pub connect_timeout: Duration,
}

impl RealtimeConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            api_key: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// ── WsTransport ──────────────────────────────────────────────────────

/// [`Transport`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsTransport {
    config: RealtimeConfig,
}

impl WsTransport {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }
}

impl Transport for WsTransport {
    fn open(
        &self,
        filter: &TransportFilter,
    ) -> impl Future<Output = Result<FrameStream, Error>> + Send {
        let config = self.config.clone();
        let filter = filter.clone();
        async move { connect_and_subscribe(&config, &filter).await }
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and send the subscribe frame.
///
/// If an API key is configured it is injected as the `apikey` header on the
/// upgrade request.
async fn connect_and_subscribe(
    config: &RealtimeConfig,
    filter: &TransportFilter,
) -> Result<FrameStream, Error> {
    tracing::info!(url = %config.url, %filter, "connecting to realtime endpoint");

    let uri: tungstenite::http::Uri = config
        .url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(ref key) = config.api_key {
        request = request.with_header("apikey", key.expose_secret());
    }

    let handshake = tokio_tungstenite::connect_async(request);
    let (mut ws_stream, _response) = tokio::time::timeout(config.connect_timeout, handshake)
        .await
        .map_err(|_| Error::Timeout {
            timeout_secs: config.connect_timeout.as_secs(),
        })?
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let subscribe = SubscribeFrame::new(filter).to_json()?;
    ws_stream
        .send(tungstenite::Message::Text(subscribe.into()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::debug!(%filter, "subscribe frame sent, awaiting ack");

    let frames = ws_stream.filter_map(|message| async move { translate(message) });
    Ok(Box::pin(frames))
}

// ── Message translation ──────────────────────────────────────────────

/// Map one raw WebSocket message onto the frame stream.
///
/// Unparseable text frames are logged and skipped; they must not take the
/// connection down. A close frame becomes an error so the supervisor sees
/// why the connection ended.
fn translate(
    message: Result<tungstenite::Message, tungstenite::Error>,
) -> Option<Result<InboundFrame, Error>> {
    match message {
        Ok(tungstenite::Message::Text(text)) => match wire::parse_frame(&text) {
            Ok(frame) => Some(Ok(frame)),
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable realtime frame");
                None
            }
        },
        Ok(tungstenite::Message::Ping(_)) => {
            // tungstenite queues the pong reply itself
            tracing::trace!("realtime ping");
            None
        }
        Ok(tungstenite::Message::Close(frame)) => {
            let (code, reason) = frame.map_or_else(
                || (1005, String::from("no close payload")),
                |cf| (u16::from(cf.code), cf.reason.to_string()),
            );
            tracing::info!(code, %reason, "realtime close frame received");
            Some(Err(Error::WebSocketClosed { code, reason }))
        }
        Ok(_) => None,
        Err(e) => Some(Err(Error::WebSocketConnect(e.to_string()))),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
