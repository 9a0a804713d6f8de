// ── Scopes and consumers ──

use std::fmt;

use rowsync_api::TransportFilter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::EntityKind;

/// Opaque tenant identifier (organization id, workspace slug, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantKey(String);

impl TenantKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TenantKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// `(EntityKind, TenantKey)`: one logical subscription and its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionScope {
    pub kind: EntityKind,
    pub tenant: TenantKey,
}

impl SubscriptionScope {
    pub fn new(kind: EntityKind, tenant: impl Into<TenantKey>) -> Self {
        Self {
            kind,
            tenant: tenant.into(),
        }
    }

    /// The realtime channel filter for this scope.
    pub fn filter(&self) -> TransportFilter {
        TransportFilter::new(
            self.kind.table(),
            self.kind.tenant_column(),
            self.tenant.as_str(),
        )
    }
}

impl fmt::Display for SubscriptionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.tenant)
    }
}

/// Identifies one observer of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(String);

impl ConsumerId {
    /// A fresh random consumer id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ConsumerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
