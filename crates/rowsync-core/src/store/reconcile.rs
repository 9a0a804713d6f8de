// ── Reconciler ──
//
// Applies one change event to a collection. Synchronous and total: every
// event yields an outcome, none fails. Redelivered and out-of-window events
// converge instead of duplicating or erroring.

use tracing::{trace, warn};

use super::collection::LocalCollection;
use crate::model::{ChangeEvent, ChangeKind};

/// What `apply` did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Applied {
    /// Insert of a new id.
    Inserted,
    /// Insert of an id already present: columns merged over the existing row.
    Merged,
    /// Update of a present id.
    Replaced,
    /// Update of an unknown id, treated as an insert.
    Upserted,
    /// Delete of a present id.
    Removed,
    /// Nothing to do (delete of an absent id, or an event without its row).
    Ignored,
}

impl Applied {
    /// Whether the collection changed.
    pub fn changed(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Apply `event` to `collection`.
pub fn apply(collection: &mut LocalCollection, event: &ChangeEvent) -> Applied {
    let outcome = match event.kind {
        ChangeKind::Insert => {
            let Some(after) = &event.after else {
                warn!(scope = %event.scope, "insert without a row image, ignoring");
                return Applied::Ignored;
            };
            match collection.get(after.id()) {
                Some(existing) => {
                    let merged = existing.merged_with(after);
                    collection.replace(merged);
                    Applied::Merged
                }
                None => {
                    collection.place(after.clone());
                    Applied::Inserted
                }
            }
        }
        ChangeKind::Update => {
            let Some(after) = &event.after else {
                warn!(scope = %event.scope, "update without a row image, ignoring");
                return Applied::Ignored;
            };
            if collection.contains(after.id()) {
                collection.replace(after.clone());
                Applied::Replaced
            } else {
                collection.place(after.clone());
                Applied::Upserted
            }
        }
        ChangeKind::Delete => match event.record_id() {
            Some(id) if collection.remove(id).is_some() => Applied::Removed,
            _ => Applied::Ignored,
        },
    };

    trace!(
        scope = %event.scope,
        id = ?event.record_id(),
        %outcome,
        "change applied"
    );
    outcome
}
