// ── Typed views ──

use std::marker::PhantomData;
use std::sync::Arc;

use super::{ReadView, ScopeView, SyncStatus};
use crate::error::SyncError;
use crate::model::Entity;
use crate::supervisor::ConnectionState;

/// A [`ReadView`] that decodes records into `T`.
pub struct TypedView<T: Entity> {
    view: ReadView,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> TypedView<T> {
    /// Fails with `KindMismatch` if the view belongs to another kind.
    pub fn new(view: ReadView) -> Result<Self, SyncError> {
        let actual = view.current().scope().kind;
        if actual != T::KIND {
            return Err(SyncError::KindMismatch {
                expected: T::KIND,
                actual,
            });
        }
        Ok(Self {
            view,
            _entity: PhantomData,
        })
    }

    /// Latest records, decoded.
    pub fn records(&self) -> Result<Vec<T>, SyncError> {
        self.view.latest().decode()
    }

    pub fn status(&self) -> SyncStatus {
        self.view.latest().status()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.view.latest().connection_state().clone()
    }

    /// Wait for the next change and decode it. `None` once the scope is gone.
    pub async fn changed(&mut self) -> Option<Result<Vec<T>, SyncError>> {
        let view: Arc<ScopeView> = self.view.changed().await?;
        Some(view.decode())
    }

    pub fn untyped(&self) -> &ReadView {
        &self.view
    }

    pub fn into_untyped(self) -> ReadView {
        self.view
    }
}
