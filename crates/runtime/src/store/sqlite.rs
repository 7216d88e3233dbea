//! SQLite-backed [`Store`], the default durable backend.
//!
//! WAL journal mode, a `schema_version` table, and a connection guarded by
//! a `tokio::sync::Mutex` (schema is created before the connection is
//! wrapped, so no blocking call happens while the async lock is held).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::rows::{IdempotencyRow, IndexEntryRow, JobRow, MemoryNodeRow, ReportRow, SessionEventRow, SessionRow};
use super::{cosine_distance, InsertIfAbsent, Store, StoreError};

pub struct SqliteStore {
    conn: tokio::sync::Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);
             INSERT OR IGNORE INTO schema_version (version) VALUES (1);

             CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                parameters_json TEXT NOT NULL,
                content TEXT NOT NULL,
                sources_json TEXT NOT NULL,
                embedding_json TEXT,
                rating INTEGER,
                created_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                params_json TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                lease_owner TEXT,
                lease_expiry TEXT,
                heartbeat_at TEXT,
                attempt INTEGER NOT NULL DEFAULT 0,
                idempotency_key TEXT,
                parent_job_id TEXT,
                result_ref TEXT,
                error_json TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at);

             CREATE TABLE IF NOT EXISTS idempotency (
                key TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                ttl_secs INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                parent_session_id TEXT,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                metadata_json TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS session_events (
                session_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (session_id, idx)
             );

             CREATE TABLE IF NOT EXISTS index_entries (
                doc_id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                text_fragment TEXT NOT NULL,
                embedding_json TEXT NOT NULL,
                lexical_tokens TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS memory_nodes (
                id TEXT PRIMARY KEY,
                embedding_json TEXT NOT NULL,
                entities_json TEXT NOT NULL,
                relations_json TEXT NOT NULL,
                sources_json TEXT NOT NULL,
                user_signature TEXT,
                resonance REAL NOT NULL DEFAULT 0.0,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_access_at TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0.5
             );",
        )
        .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn embedding_to_json(v: &Option<Vec<f32>>) -> Option<String> {
        v.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default())
    }

    fn embedding_from_json(s: Option<String>) -> Option<Vec<f32>> {
        s.and_then(|s| serde_json::from_str(&s).ok())
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn durable(&self) -> bool {
        true
    }

    async fn insert_report(&self, row: ReportRow) -> Result<ReportRow, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO reports (query, parameters_json, content, sources_json, embedding_json, rating, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.query,
                row.parameters_json,
                row.content,
                row.sources_json,
                Self::embedding_to_json(&row.embedding),
                row.rating,
                row.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        let id = conn.last_insert_rowid();
        Ok(ReportRow {
            id: Some(id),
            ..row
        })
    }

    async fn get_report(&self, id: i64) -> Result<Option<ReportRow>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, query, parameters_json, content, sources_json, embedding_json, rating, created_at
             FROM reports WHERE id = ?1",
            params![id],
            |r| {
                let created_at: String = r.get(7)?;
                let embedding_json: Option<String> = r.get(5)?;
                Ok(ReportRow {
                    id: Some(r.get(0)?),
                    query: r.get(1)?,
                    parameters_json: r.get(2)?,
                    content: r.get(3)?,
                    sources_json: r.get(4)?,
                    embedding: Self::embedding_from_json(embedding_json),
                    rating: r.get(6)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            },
        )
        .optional()
        .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn rate_report(&self, id: i64, rating: u8) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let n = conn
            .execute("UPDATE reports SET rating = ?1 WHERE id = ?2", params![rating, id])
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("report {id}")));
        }
        Ok(())
    }

    async fn delete_report(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM reports WHERE id = ?1", params![id])
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_reports(
        &self,
        limit: usize,
        query_filter: Option<&str>,
    ) -> Result<Vec<ReportRow>, StoreError> {
        let conn = self.conn.lock().await;
        let pattern = query_filter.map(|q| format!("%{q}%"));
        let mut stmt = conn
            .prepare(
                "SELECT id, query, parameters_json, content, sources_json, embedding_json, rating, created_at
                 FROM reports
                 WHERE (?1 IS NULL OR query LIKE ?1)
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], |r| {
                let created_at: String = r.get(7)?;
                let embedding_json: Option<String> = r.get(5)?;
                Ok(ReportRow {
                    id: Some(r.get(0)?),
                    query: r.get(1)?,
                    parameters_json: r.get(2)?,
                    content: r.get(3)?,
                    sources_json: r.get(4)?,
                    embedding: Self::embedding_from_json(embedding_json),
                    rating: r.get(6)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn insert_job(&self, row: JobRow) -> Result<JobRow, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO jobs (id, job_type, params_json, status, created_at, updated_at,
                lease_owner, lease_expiry, heartbeat_at, attempt, idempotency_key, parent_job_id,
                result_ref, error_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                row.id,
                row.job_type,
                row.params_json,
                row.status,
                row.created_at.to_rfc3339(),
                row.updated_at.to_rfc3339(),
                row.lease_owner,
                row.lease_expiry.map(|d| d.to_rfc3339()),
                row.heartbeat_at.map(|d| d.to_rfc3339()),
                row.attempt,
                row.idempotency_key,
                row.parent_job_id,
                row.result_ref,
                row.error_json,
            ],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row)
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRow>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id], row_to_job)
            .optional()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn update_job(&self, row: JobRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE jobs SET job_type=?2, params_json=?3, status=?4, updated_at=?5,
                lease_owner=?6, lease_expiry=?7, heartbeat_at=?8, attempt=?9,
                idempotency_key=?10, parent_job_id=?11, result_ref=?12, error_json=?13
             WHERE id = ?1",
            params![
                row.id,
                row.job_type,
                row.params_json,
                row.status,
                row.updated_at.to_rfc3339(),
                row.lease_owner,
                row.lease_expiry.map(|d| d.to_rfc3339()),
                row.heartbeat_at.map(|d| d.to_rfc3339()),
                row.attempt,
                row.idempotency_key,
                row.parent_job_id,
                row.result_ref,
                row.error_json,
            ],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn lease_next_job(
        &self,
        types: &[String],
        worker_id: &str,
        lease_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRow>, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let placeholders = types.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT * FROM jobs
             WHERE job_type IN ({placeholders})
               AND (status = 'queued' OR (status = 'running' AND lease_expiry < ?))
             ORDER BY created_at ASC LIMIT 1"
        );
        let candidate: Option<JobRow> = {
            let mut stmt = tx.prepare(&sql).map_err(|e| StoreError::Backend(e.to_string()))?;
            let mut bind: Vec<&dyn rusqlite::ToSql> =
                types.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
            let now_str = now.to_rfc3339();
            bind.push(&now_str);
            stmt.query_row(bind.as_slice(), row_to_job)
                .optional()
                .map_err(|e| StoreError::Backend(e.to_string()))?
        };

        let Some(mut job) = candidate else {
            tx.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
            return Ok(None);
        };

        job.status = "running".to_string();
        job.lease_owner = Some(worker_id.to_string());
        job.lease_expiry = Some(lease_expiry);
        job.heartbeat_at = Some(now);
        job.attempt += 1;
        job.updated_at = now;

        tx.execute(
            "UPDATE jobs SET status='running', lease_owner=?2, lease_expiry=?3, heartbeat_at=?4,
                attempt=?5, updated_at=?6 WHERE id = ?1",
            params![
                job.id,
                job.lease_owner,
                job.lease_expiry.map(|d| d.to_rfc3339()),
                job.heartbeat_at.map(|d| d.to_rfc3339()),
                job.attempt,
                job.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        tx.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Some(job))
    }

    async fn jobs_with_expired_lease(&self, now: DateTime<Utc>) -> Result<Vec<JobRow>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM jobs WHERE status = 'running' AND lease_expiry < ?1")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], row_to_job)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn insert_idempotency_if_absent(
        &self,
        row: IdempotencyRow,
    ) -> Result<InsertIfAbsent<IdempotencyRow>, StoreError> {
        let conn = self.conn.lock().await;
        match conn.execute(
            "INSERT INTO idempotency (key, job_id, created_at, ttl_secs) VALUES (?1,?2,?3,?4)",
            params![row.key, row.job_id, row.created_at.to_rfc3339(), row.ttl_secs],
        ) {
            Ok(_) => Ok(InsertIfAbsent::Inserted(row)),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let existing = conn
                    .query_row(
                        "SELECT key, job_id, created_at, ttl_secs FROM idempotency WHERE key = ?1",
                        params![row.key],
                        |r| {
                            let created_at: String = r.get(2)?;
                            Ok(IdempotencyRow {
                                key: r.get(0)?,
                                job_id: r.get(1)?,
                                created_at: DateTime::parse_from_rfc3339(&created_at)
                                    .map(|d| d.with_timezone(&Utc))
                                    .unwrap_or_else(|_| Utc::now()),
                                ttl_secs: r.get(3)?,
                            })
                        },
                    )
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(InsertIfAbsent::Existing(existing))
            }
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    async fn upsert_idempotency(&self, row: IdempotencyRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO idempotency (key, job_id, created_at, ttl_secs) VALUES (?1,?2,?3,?4)
             ON CONFLICT(key) DO UPDATE SET job_id = excluded.job_id, created_at = excluded.created_at,
                ttl_secs = excluded.ttl_secs",
            params![row.key, row.job_id, row.created_at.to_rfc3339(), row.ttl_secs],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRow>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT key, job_id, created_at, ttl_secs FROM idempotency WHERE key = ?1",
            params![key],
            |r| {
                let created_at: String = r.get(2)?;
                Ok(IdempotencyRow {
                    key: r.get(0)?,
                    job_id: r.get(1)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    ttl_secs: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn insert_session(&self, row: SessionRow) -> Result<SessionRow, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (id, parent_session_id, created_at, last_activity_at, metadata_json)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                row.id,
                row.parent_session_id,
                row.created_at.to_rfc3339(),
                row.last_activity_at.to_rfc3339(),
                row.metadata_json,
            ],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row)
    }

    async fn get_session(&self, id: &str) -> Result<Option<SessionRow>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, parent_session_id, created_at, last_activity_at, metadata_json FROM sessions WHERE id = ?1",
            params![id],
            |r| {
                let created_at: String = r.get(2)?;
                let last_activity_at: String = r.get(3)?;
                Ok(SessionRow {
                    id: r.get(0)?,
                    parent_session_id: r.get(1)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    last_activity_at: DateTime::parse_from_rfc3339(&last_activity_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    metadata_json: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET last_activity_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn append_session_event(&self, mut row: SessionEventRow) -> Result<SessionEventRow, StoreError> {
        let tx_conn = self.conn.lock().await;
        let next_index: i64 = tx_conn
            .query_row(
                "SELECT COALESCE(MAX(idx), -1) + 1 FROM session_events WHERE session_id = ?1",
                params![row.session_id],
                |r| r.get(0),
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.index = next_index;
        tx_conn
            .execute(
                "INSERT INTO session_events (session_id, idx, event_type, payload_json, timestamp)
                 VALUES (?1,?2,?3,?4,?5)",
                params![
                    row.session_id,
                    row.index,
                    row.event_type,
                    row.payload_json,
                    row.timestamp.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row)
    }

    async fn session_events_from(
        &self,
        session_id: &str,
        from_index: i64,
    ) -> Result<Vec<SessionEventRow>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, idx, event_type, payload_json, timestamp FROM session_events
                 WHERE session_id = ?1 AND idx >= ?2 ORDER BY idx ASC",
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map(params![session_id, from_index], row_to_event)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn session_events_up_to(
        &self,
        session_id: &str,
        index_inclusive: i64,
    ) -> Result<Vec<SessionEventRow>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, idx, event_type, payload_json, timestamp FROM session_events
                 WHERE session_id = ?1 AND idx <= ?2 ORDER BY idx ASC",
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map(params![session_id, index_inclusive], row_to_event)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn upsert_index_entry(&self, row: IndexEntryRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO index_entries (doc_id, scope, text_fragment, embedding_json, lexical_tokens, content_hash, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(doc_id) DO UPDATE SET scope = excluded.scope, text_fragment = excluded.text_fragment,
                embedding_json = excluded.embedding_json, lexical_tokens = excluded.lexical_tokens,
                content_hash = excluded.content_hash, created_at = excluded.created_at",
            params![
                row.doc_id,
                row.scope,
                row.text_fragment,
                row.embedding_json,
                row.lexical_tokens,
                row.content_hash,
                row.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete_index_entry(&self, doc_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM index_entries WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn upsert_memory_node(&self, row: MemoryNodeRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO memory_nodes (id, embedding_json, entities_json, relations_json, sources_json,
                user_signature, resonance, access_count, last_access_at, confidence)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(id) DO UPDATE SET embedding_json = excluded.embedding_json,
                entities_json = excluded.entities_json, relations_json = excluded.relations_json,
                sources_json = excluded.sources_json, user_signature = excluded.user_signature,
                resonance = excluded.resonance, access_count = excluded.access_count,
                last_access_at = excluded.last_access_at, confidence = excluded.confidence",
            params![
                row.id,
                row.embedding_json,
                row.entities_json,
                row.relations_json,
                row.sources_json,
                row.user_signature,
                row.resonance,
                row.access_count,
                row.last_access_at.to_rfc3339(),
                row.confidence,
            ],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_memory_nodes(&self) -> Result<Vec<MemoryNodeRow>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, embedding_json, entities_json, relations_json, sources_json,
                    user_signature, resonance, access_count, last_access_at, confidence
                 FROM memory_nodes",
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_memory_node)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn vector_search(
        &self,
        table: &str,
        query_vec: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        let conn = self.conn.lock().await;
        let (id_col, embed_col, scope_col) = match table {
            "index_entries" => ("doc_id", "embedding_json", Some("scope")),
            "memory_nodes" => ("id", "embedding_json", None),
            "reports" => ("id", "embedding_json", None),
            other => return Err(StoreError::Backend(format!("unknown vector table {other}"))),
        };
        let sql = match (scope_col, filter) {
            (Some(col), Some(f)) => format!("SELECT {id_col}, {embed_col} FROM {table} WHERE {col} = '{f}'"),
            _ => format!("SELECT {id_col}, {embed_col} FROM {table}"),
        };
        let mut stmt = conn.prepare(&sql).map_err(|e| StoreError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map([], |r| {
                let id: String = r.get::<_, rusqlite::types::Value>(0).map(|v| match v {
                    rusqlite::types::Value::Integer(i) => i.to_string(),
                    rusqlite::types::Value::Text(s) => s,
                    _ => String::new(),
                })?;
                let embed_json: String = r.get(1)?;
                Ok((id, embed_json))
            })
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for row in rows {
            let (id, embed_json) = row.map_err(|e| StoreError::Backend(e.to_string()))?;
            let Ok(vec): Result<Vec<f32>, _> = serde_json::from_str(&embed_json) else {
                continue;
            };
            let dist = cosine_distance(query_vec, &vec);
            scored.push((id, dist));
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn row_to_job(r: &rusqlite::Row) -> rusqlite::Result<JobRow> {
    let created_at: String = r.get("created_at")?;
    let updated_at: String = r.get("updated_at")?;
    let lease_expiry: Option<String> = r.get("lease_expiry")?;
    let heartbeat_at: Option<String> = r.get("heartbeat_at")?;
    Ok(JobRow {
        id: r.get("id")?,
        job_type: r.get("job_type")?,
        params_json: r.get("params_json")?,
        status: r.get("status")?,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
        lease_owner: r.get("lease_owner")?,
        lease_expiry: lease_expiry.map(|s| parse_dt(&s)),
        heartbeat_at: heartbeat_at.map(|s| parse_dt(&s)),
        attempt: r.get("attempt")?,
        idempotency_key: r.get("idempotency_key")?,
        parent_job_id: r.get("parent_job_id")?,
        result_ref: r.get("result_ref")?,
        error_json: r.get("error_json")?,
    })
}

fn row_to_event(r: &rusqlite::Row) -> rusqlite::Result<SessionEventRow> {
    let timestamp: String = r.get(4)?;
    Ok(SessionEventRow {
        session_id: r.get(0)?,
        index: r.get(1)?,
        event_type: r.get(2)?,
        payload_json: r.get(3)?,
        timestamp: parse_dt(&timestamp),
    })
}

fn row_to_memory_node(r: &rusqlite::Row) -> rusqlite::Result<MemoryNodeRow> {
    let last_access_at: String = r.get(8)?;
    Ok(MemoryNodeRow {
        id: r.get(0)?,
        embedding_json: r.get(1)?,
        entities_json: r.get(2)?,
        relations_json: r.get(3)?,
        sources_json: r.get(4)?,
        user_signature: r.get(5)?,
        resonance: r.get(6)?,
        access_count: r.get(7)?,
        last_access_at: parse_dt(&last_access_at),
        confidence: r.get(9)?,
    })
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_if_absent_resolves_to_same_job() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let row = IdempotencyRow {
            key: "k1".into(),
            job_id: "job-1".into(),
            created_at: now,
            ttl_secs: 3600,
        };
        let first = store.insert_idempotency_if_absent(row.clone()).await.unwrap();
        assert!(matches!(first, InsertIfAbsent::Inserted(_)));

        let mut row2 = row.clone();
        row2.job_id = "job-2".into();
        let second = store.insert_idempotency_if_absent(row2).await.unwrap();
        match second {
            InsertIfAbsent::Existing(r) => assert_eq!(r.job_id, "job-1"),
            InsertIfAbsent::Inserted(_) => panic!("expected existing"),
        }
    }

    #[tokio::test]
    async fn session_events_are_gap_free() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_session(SessionRow {
                id: "s1".into(),
                parent_session_id: None,
                created_at: Utc::now(),
                last_activity_at: Utc::now(),
                metadata_json: "{}".into(),
            })
            .await
            .unwrap();

        for i in 0..3 {
            let e = store
                .append_session_event(SessionEventRow {
                    session_id: "s1".into(),
                    index: -1,
                    event_type: "QUERY_SUBMITTED".into(),
                    payload_json: format!("{{\"n\":{i}}}"),
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
            assert_eq!(e.index, i);
        }
    }
}
