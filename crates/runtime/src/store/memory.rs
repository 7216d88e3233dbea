//! Non-durable in-memory [`Store`], used for tests and for local-only
//! deployments that explicitly opt out of durability. Never selected by
//! [`super::sqlite::SqliteStore`]'s `durable_required` check when that flag
//! is set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::rows::{IdempotencyRow, IndexEntryRow, JobRow, MemoryNodeRow, ReportRow, SessionEventRow, SessionRow};
use super::{cosine_distance, InsertIfAbsent, Store, StoreError};

#[derive(Default)]
struct Tables {
    reports: HashMap<i64, ReportRow>,
    next_report_id: i64,
    jobs: HashMap<String, JobRow>,
    idempotency: HashMap<String, IdempotencyRow>,
    sessions: HashMap<String, SessionRow>,
    session_events: HashMap<String, Vec<SessionEventRow>>,
    index_entries: HashMap<String, IndexEntryRow>,
    memory_nodes: HashMap<String, MemoryNodeRow>,
}

pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn durable(&self) -> bool {
        false
    }

    async fn insert_report(&self, row: ReportRow) -> Result<ReportRow, StoreError> {
        let mut t = self.tables.write();
        t.next_report_id += 1;
        let id = t.next_report_id;
        let row = ReportRow { id: Some(id), ..row };
        t.reports.insert(id, row.clone());
        Ok(row)
    }

    async fn get_report(&self, id: i64) -> Result<Option<ReportRow>, StoreError> {
        Ok(self.tables.read().reports.get(&id).cloned())
    }

    async fn rate_report(&self, id: i64, rating: u8) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let report = t
            .reports
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("report {id}")))?;
        report.rating = Some(rating);
        Ok(())
    }

    async fn delete_report(&self, id: i64) -> Result<(), StoreError> {
        self.tables.write().reports.remove(&id);
        Ok(())
    }

    async fn list_reports(
        &self,
        limit: usize,
        query_filter: Option<&str>,
    ) -> Result<Vec<ReportRow>, StoreError> {
        let t = self.tables.read();
        let mut reports: Vec<ReportRow> = t
            .reports
            .values()
            .filter(|r| query_filter.map(|q| r.query.contains(q)).unwrap_or(true))
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.id.cmp(&a.id));
        reports.truncate(limit);
        Ok(reports)
    }

    async fn insert_job(&self, row: JobRow) -> Result<JobRow, StoreError> {
        let mut t = self.tables.write();
        t.jobs.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRow>, StoreError> {
        Ok(self.tables.read().jobs.get(id).cloned())
    }

    async fn update_job(&self, row: JobRow) -> Result<(), StoreError> {
        self.tables.write().jobs.insert(row.id.clone(), row);
        Ok(())
    }

    async fn lease_next_job(
        &self,
        types: &[String],
        worker_id: &str,
        lease_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRow>, StoreError> {
        let mut t = self.tables.write();
        let candidate_id = t
            .jobs
            .values()
            .filter(|j| types.contains(&j.job_type))
            .filter(|j| {
                j.status == "queued"
                    || (j.status == "running" && j.lease_expiry.map(|e| e < now).unwrap_or(false))
            })
            .min_by_key(|j| j.created_at)
            .map(|j| j.id.clone());

        let Some(id) = candidate_id else {
            return Ok(None);
        };
        let job = t.jobs.get_mut(&id).expect("candidate exists");
        job.status = "running".to_string();
        job.lease_owner = Some(worker_id.to_string());
        job.lease_expiry = Some(lease_expiry);
        job.heartbeat_at = Some(now);
        job.attempt += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn jobs_with_expired_lease(&self, now: DateTime<Utc>) -> Result<Vec<JobRow>, StoreError> {
        Ok(self
            .tables
            .read()
            .jobs
            .values()
            .filter(|j| j.status == "running" && j.lease_expiry.map(|e| e < now).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn insert_idempotency_if_absent(
        &self,
        row: IdempotencyRow,
    ) -> Result<InsertIfAbsent<IdempotencyRow>, StoreError> {
        let mut t = self.tables.write();
        if let Some(existing) = t.idempotency.get(&row.key) {
            return Ok(InsertIfAbsent::Existing(existing.clone()));
        }
        t.idempotency.insert(row.key.clone(), row.clone());
        Ok(InsertIfAbsent::Inserted(row))
    }

    async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRow>, StoreError> {
        Ok(self.tables.read().idempotency.get(key).cloned())
    }

    async fn upsert_idempotency(&self, row: IdempotencyRow) -> Result<(), StoreError> {
        self.tables.write().idempotency.insert(row.key.clone(), row);
        Ok(())
    }

    async fn insert_session(&self, row: SessionRow) -> Result<SessionRow, StoreError> {
        self.tables.write().sessions.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn get_session(&self, id: &str) -> Result<Option<SessionRow>, StoreError> {
        Ok(self.tables.read().sessions.get(id).cloned())
    }

    async fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        if let Some(s) = t.sessions.get_mut(id) {
            s.last_activity_at = at;
        }
        Ok(())
    }

    async fn append_session_event(&self, mut row: SessionEventRow) -> Result<SessionEventRow, StoreError> {
        let mut t = self.tables.write();
        let events = t.session_events.entry(row.session_id.clone()).or_default();
        row.index = events.last().map(|e| e.index + 1).unwrap_or(0);
        events.push(row.clone());
        Ok(row)
    }

    async fn session_events_from(
        &self,
        session_id: &str,
        from_index: i64,
    ) -> Result<Vec<SessionEventRow>, StoreError> {
        Ok(self
            .tables
            .read()
            .session_events
            .get(session_id)
            .map(|events| events.iter().filter(|e| e.index >= from_index).cloned().collect())
            .unwrap_or_default())
    }

    async fn session_events_up_to(
        &self,
        session_id: &str,
        index_inclusive: i64,
    ) -> Result<Vec<SessionEventRow>, StoreError> {
        Ok(self
            .tables
            .read()
            .session_events
            .get(session_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.index <= index_inclusive)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_index_entry(&self, row: IndexEntryRow) -> Result<(), StoreError> {
        self.tables.write().index_entries.insert(row.doc_id.clone(), row);
        Ok(())
    }

    async fn delete_index_entry(&self, doc_id: &str) -> Result<(), StoreError> {
        self.tables.write().index_entries.remove(doc_id);
        Ok(())
    }

    async fn upsert_memory_node(&self, row: MemoryNodeRow) -> Result<(), StoreError> {
        self.tables.write().memory_nodes.insert(row.id.clone(), row);
        Ok(())
    }

    async fn list_memory_nodes(&self) -> Result<Vec<MemoryNodeRow>, StoreError> {
        Ok(self.tables.read().memory_nodes.values().cloned().collect())
    }

    async fn vector_search(
        &self,
        table: &str,
        query_vec: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(String, f32)>, StoreError> {
        let t = self.tables.read();
        let mut scored: Vec<(String, f32)> = match table {
            "index_entries" => t
                .index_entries
                .values()
                .filter(|e| filter.map(|f| e.scope == f).unwrap_or(true))
                .filter_map(|e| {
                    serde_json::from_str::<Vec<f32>>(&e.embedding_json)
                        .ok()
                        .map(|v| (e.doc_id.clone(), cosine_distance(query_vec, &v)))
                })
                .collect(),
            "memory_nodes" => t
                .memory_nodes
                .values()
                .filter_map(|n| {
                    serde_json::from_str::<Vec<f32>>(&n.embedding_json)
                        .ok()
                        .map(|v| (n.id.clone(), cosine_distance(query_vec, &v)))
                })
                .collect(),
            "reports" => t
                .reports
                .values()
                .filter_map(|r| {
                    r.embedding
                        .as_ref()
                        .map(|e| (r.id.unwrap_or_default().to_string(), cosine_distance(query_vec, e)))
                })
                .collect(),
            other => return Err(StoreError::Backend(format!("unknown vector table {other}"))),
        };
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_next_job_is_single_winner() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_job(JobRow {
                id: "j1".into(),
                job_type: "research".into(),
                params_json: "{}".into(),
                status: "queued".into(),
                created_at: now,
                updated_at: now,
                lease_owner: None,
                lease_expiry: None,
                heartbeat_at: None,
                attempt: 0,
                idempotency_key: None,
                parent_job_id: None,
                result_ref: None,
                error_json: None,
            })
            .await
            .unwrap();

        let types = vec!["research".to_string()];
        let leased = store
            .lease_next_job(&types, "worker-a", now + chrono::Duration::seconds(60), now)
            .await
            .unwrap();
        assert!(leased.is_some());

        let second = store
            .lease_next_job(&types, "worker-b", now + chrono::Duration::seconds(60), now)
            .await
            .unwrap();
        assert!(second.is_none());
    }
}
