// ── Transport filter ──
//
// One physical connection exists per unique filter. The filter is both the
// subscription request sent to the server and the sharing key on our side.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Row filter identifying one realtime channel: a table narrowed to a
/// single tenant by equality on the tenant column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportFilter {
    table: String,
    tenant_column: String,
    tenant: String,
}

impl TransportFilter {
    pub fn new(
        table: impl Into<String>,
        tenant_column: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            tenant_column: tenant_column.into(),
            tenant: tenant.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn tenant_column(&self) -> &str {
        &self.tenant_column
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// The row predicate in PostgREST operator syntax, e.g. `org_id=eq.org-42`.
    pub fn row_filter(&self) -> String {
        format!("{}=eq.{}", self.tenant_column, self.tenant)
    }
}

impl fmt::Display for TransportFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table={} AND {}", self.table, self.row_filter())
    }
}
