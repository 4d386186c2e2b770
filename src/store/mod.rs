//! Durable execution state.
//!
//! One row per execution, written as an idempotent upsert after every
//! meaningful state change:
//! - `ExecutionRecord` / `ExecutionMetrics` / `AuditEntry`: the durable shape
//! - `ExecutionStore`: persistence contract
//! - `SqliteExecutionStore`: rusqlite-backed implementation
//! - `MemoryExecutionStore`: in-memory implementation for embedding and tests

mod record;
mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};

fn store_err_with<E: std::fmt::Display>(context: &str, err: E) -> EngineError {
    EngineError::Store(format!("{}: {}", context, err))
}

pub use record::{AuditEntry, ExecutionMetrics, ExecutionRecord};
pub use sqlite::SqliteExecutionStore;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Idempotent upsert keyed by execution id. Incoming audit entries
    /// are appended to the stored array.
    async fn upsert(&self, record: ExecutionRecord) -> Result<()>;

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    async fn list_ids(&self) -> Result<Vec<String>>;
}

/// In-memory store with the same append-only audit semantics as the
/// sqlite implementation.
#[derive(Default)]
pub struct MemoryExecutionStore {
    records: RwLock<HashMap<String, ExecutionRecord>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn upsert(&self, mut record: ExecutionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.id) {
            let mut audit = existing.audit_log.clone();
            audit.extend(record.audit_log);
            record.audit_log = audit;
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.records.read().await.get(execution_id).cloned())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Execution, ExecutionPhase, ExecutionPlan};

    fn sample_record(id_suffix: &str, audit: Vec<AuditEntry>) -> ExecutionRecord {
        let plan = ExecutionPlan::new("task-1", "plan-1").with_phase(ExecutionPhase::new("Canary"));
        let mut execution = Execution::from_plan(&plan, "ops");
        execution.id = format!("exec-{}", id_suffix);
        ExecutionRecord::from_execution(&execution, audit)
    }

    #[tokio::test]
    async fn test_memory_store_appends_audit_entries() {
        let store = MemoryExecutionStore::new();

        store
            .upsert(sample_record("1", vec![AuditEntry::new("execution.created", "ok")]))
            .await
            .unwrap();
        store
            .upsert(sample_record("1", vec![AuditEntry::new("phase.started", "Canary")]))
            .await
            .unwrap();

        let record = store.load("exec-1").await.unwrap().unwrap();
        assert_eq!(record.audit_log.len(), 2);
        assert_eq!(record.audit_log[0].event, "execution.created");
        assert_eq!(record.audit_log[1].event, "phase.started");
    }

    #[tokio::test]
    async fn test_memory_store_missing_id() {
        let store = MemoryExecutionStore::new();
        assert!(store.load("nope").await.unwrap().is_none());
    }
}
