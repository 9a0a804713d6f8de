// ── Runtime sync configuration ──
//
// Tuning knobs for the engine. Never touches disk: `rowsync-config` (or the
// embedding application) builds a `SyncConfig` and hands it in.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::EntityKind;
use crate::store::OrderingPolicy;
use crate::supervisor::BackoffConfig;

/// Configuration shared by every scope a `SubscriptionManager` drives.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Reconnect backoff for physical connections.
    pub reconnect: BackoffConfig,
    /// A subscription that lasted at least this long resets the reconnect
    /// backoff to its initial delay.
    pub stability_window: Duration,
    /// Upper bound on one snapshot fetch.
    pub snapshot_timeout: Duration,
    /// Backoff between failed snapshot fetches.
    pub snapshot_retry: BackoffConfig,
    /// Events held per scope while a snapshot is pending. Overflow discards
    /// the buffer and the pending snapshot and starts over.
    pub buffer_capacity: usize,
    /// Per-connection broadcast capacity. A scope that falls further behind
    /// than this resyncs.
    pub channel_capacity: usize,
    /// Per-kind ordering overrides. Kinds without one use
    /// [`EntityKind::default_ordering`].
    pub ordering: HashMap<EntityKind, OrderingPolicy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect: BackoffConfig::default(),
            stability_window: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(15),
            snapshot_retry: BackoffConfig {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(30),
            },
            buffer_capacity: 10_000,
            channel_capacity: 1024,
            ordering: HashMap::new(),
        }
    }
}

impl SyncConfig {
    /// Ordering policy in effect for `kind`.
    pub fn ordering_for(&self, kind: EntityKind) -> OrderingPolicy {
        self.ordering
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_ordering())
    }
}
