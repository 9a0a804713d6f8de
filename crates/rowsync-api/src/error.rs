use thiserror::Error;

/// Transport-level error for the `rowsync-api` crate.
///
/// Everything that can go wrong between this process and the realtime
/// endpoint. `rowsync-core` never hands these to consumers: they drive the
/// connection into `Degraded` and schedule a reconnect instead.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// WebSocket handshake or I/O failed (refused, DNS, TLS, reset).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the server.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Handshake did not complete in time.
    #[error("Connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Protocol ────────────────────────────────────────────────────
    /// A frame arrived that does not follow the realtime protocol.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// The server rejected the subscription or reported a channel error.
    #[error("Server error: {message}")]
    Server { message: String },
}

impl Error {
    /// Returns `true` if reconnecting could plausibly succeed.
    ///
    /// Everything except a malformed local URL is worth another attempt;
    /// the supervisor retries regardless, this only picks the log level.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization {
            message: err.to_string(),
            body: String::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_is_not_transient() {
        let err = Error::from(url::Url::parse("not a url").unwrap_err());
        assert!(!err.is_transient());
    }

    #[test]
    fn connection_errors_are_transient() {
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(Error::Timeout { timeout_secs: 5 }.is_transient());
        assert!(
            Error::Server {
                message: "channel closed".into()
            }
            .is_transient()
        );
    }
}
