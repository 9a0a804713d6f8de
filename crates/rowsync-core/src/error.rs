// ── Core error types ──
//
// The sync engine recovers from almost everything on its own. These types
// exist for the places where a failure has to be named: logs, the
// `last_error` on a scope view, and the few library calls that can fail.
// The `From<rowsync_api::Error>` impl keeps transport errors wrapped, not raw.

use thiserror::Error;

use crate::model::EntityKind;

/// Failure of one snapshot fetch. Always recoverable: the scope retries
/// with backoff and stays not-ready until a fetch succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot fetch failed: {message}")]
    Network { message: String },

    #[error("snapshot fetch unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("snapshot fetch timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("snapshot rejected: {message}")]
    Rejected { message: String },
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── Recoverable, never surfaced to consumers ─────────────────────
    #[error("transport error: {0}")]
    Transport(#[from] rowsync_api::Error),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    // ── Per-event ────────────────────────────────────────────────────
    /// The event is dropped; the stream and collection are unaffected.
    #[error("malformed change event: {reason}")]
    MalformedEvent { reason: String },

    // ── Per-scope ────────────────────────────────────────────────────
    /// An internal invariant broke. Fatal to the scope: its collection is
    /// discarded and rebuilt from a fresh snapshot.
    #[error("consistency violation in {scope}: {detail}")]
    ConsistencyViolation { scope: String, detail: String },

    // ── Library surface ──────────────────────────────────────────────
    #[error("record kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl SyncError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }
}
