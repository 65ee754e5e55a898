//! Audit log service
//!
//! Thin service over the audit store: append one structured event, query
//! newest-first, count per level for dashboards.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use crate::domain::{AuditEntry, AuditFilter, AuditLevel};
use crate::error::Result;
use crate::storage::AuditStore;

/// Append-only structured event record
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
}

impl AuditLog {
    /// Creates a log over the given store
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Writes one structured event
    #[instrument(skip(self, entry), fields(action = %entry.action, level = %entry.level))]
    pub async fn append(&self, entry: AuditEntry) -> Result<()> {
        self.store.append(&entry).await
    }

    /// Returns entries newest-first up to `filter.limit`
    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.store.query(filter).await
    }

    /// Counts entries per level
    pub async fn count_by_level(&self) -> Result<HashMap<AuditLevel, usize>> {
        self.store.count_by_level().await
    }
}
