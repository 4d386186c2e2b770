use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::record::{AuditEntry, ExecutionMetrics, ExecutionRecord};
use super::{ExecutionStore, store_err_with};
use crate::error::Result;

/// Sqlite-backed execution store: one row per execution, idempotent
/// upserts, append-only audit log column.
#[derive(Clone)]
pub struct SqliteExecutionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExecutionStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| store_err_with("Failed to create db directory", e))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| store_err_with("Failed to open database", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                environment TEXT NOT NULL,
                initiated_by TEXT NOT NULL,
                current_phase TEXT NOT NULL,
                completed_phases TEXT NOT NULL,
                remaining_phases TEXT NOT NULL,
                percent_complete INTEGER NOT NULL,
                state TEXT NOT NULL,
                error TEXT,
                metrics TEXT NOT NULL,
                audit_log TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            )",
        )
        .map_err(|e| store_err_with("Failed to initialize schema", e))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn upsert_blocking(conn: &Connection, record: &ExecutionRecord) -> Result<()> {
        // Merge the incoming entries onto the stored audit array; the
        // column is concatenated, never overwritten.
        let existing: Option<String> = conn
            .query_row(
                "SELECT audit_log FROM executions WHERE id = ?1",
                params![&record.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| store_err_with("Failed to read audit log", e))?;

        let mut audit: Vec<AuditEntry> = match existing {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| store_err_with("Corrupt audit log column", e))?,
            None => Vec::new(),
        };
        audit.extend(record.audit_log.iter().cloned());

        conn.execute(
            "INSERT INTO executions (
                id, task_id, plan_id, environment, initiated_by,
                current_phase, completed_phases, remaining_phases,
                percent_complete, state, error, metrics, audit_log,
                started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                current_phase = excluded.current_phase,
                completed_phases = excluded.completed_phases,
                remaining_phases = excluded.remaining_phases,
                percent_complete = excluded.percent_complete,
                state = excluded.state,
                error = excluded.error,
                metrics = excluded.metrics,
                audit_log = excluded.audit_log,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at",
            params![
                &record.id,
                &record.task_id,
                &record.plan_id,
                &record.environment,
                &record.initiated_by,
                &record.current_phase,
                serde_json::to_string(&record.completed_phases)?,
                serde_json::to_string(&record.remaining_phases)?,
                record.percent_complete,
                &record.state,
                &record.error,
                serde_json::to_string(&record.metrics)?,
                serde_json::to_string(&audit)?,
                record.started_at.map(|t| t.to_rfc3339()),
                record.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| store_err_with("Failed to upsert execution", e))?;

        Ok(())
    }

    fn load_blocking(conn: &Connection, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let row = conn
            .query_row(
                "SELECT id, task_id, plan_id, environment, initiated_by,
                        current_phase, completed_phases, remaining_phases,
                        percent_complete, state, error, metrics, audit_log,
                        started_at, completed_at
                   FROM executions WHERE id = ?1",
                params![execution_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, u8>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, String>(11)?,
                        row.get::<_, String>(12)?,
                        row.get::<_, Option<String>>(13)?,
                        row.get::<_, Option<String>>(14)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| store_err_with("Failed to load execution", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let parse_ts = |raw: Option<String>| -> Option<DateTime<Utc>> {
            raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        let metrics: ExecutionMetrics = serde_json::from_str(&row.11)
            .map_err(|e| store_err_with("Corrupt metrics column", e))?;
        let audit_log: Vec<AuditEntry> = serde_json::from_str(&row.12)
            .map_err(|e| store_err_with("Corrupt audit log column", e))?;

        Ok(Some(ExecutionRecord {
            id: row.0,
            task_id: row.1,
            plan_id: row.2,
            environment: row.3,
            initiated_by: row.4,
            current_phase: row.5,
            completed_phases: serde_json::from_str(&row.6)
                .map_err(|e| store_err_with("Corrupt completed_phases column", e))?,
            remaining_phases: serde_json::from_str(&row.7)
                .map_err(|e| store_err_with("Corrupt remaining_phases column", e))?,
            percent_complete: row.8,
            state: row.9,
            error: row.10,
            metrics,
            audit_log,
            started_at: parse_ts(row.13),
            completed_at: parse_ts(row.14),
        }))
    }
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn upsert(&self, record: ExecutionRecord) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            Self::upsert_blocking(&guard, &record)
        })
        .await
        .map_err(|e| store_err_with("Upsert task failed", e))?
    }

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let conn = Arc::clone(&self.conn);
        let execution_id = execution_id.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            Self::load_blocking(&guard, &execution_id)
        })
        .await
        .map_err(|e| store_err_with("Load task failed", e))?
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard
                .prepare("SELECT id FROM executions ORDER BY started_at DESC")
                .map_err(|e| store_err_with("Failed to prepare statement", e))?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| store_err_with("Failed to query ids", e))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| store_err_with("Failed to collect ids", e))
        })
        .await
        .map_err(|e| store_err_with("List task failed", e))?
    }
}
