//! Durable job queue.
//!
//! A lease/heartbeat/expiry-sweep state machine layered over
//! [`crate::store::Store`]'s atomic `lease_next_job` and
//! `insert_idempotency_if_absent`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::store::rows::{IdempotencyRow, JobRow};
use crate::store::{InsertIfAbsent, Store};
use crate::types::{ErrorKind, JobId, JobStatus};

#[derive(Debug, Error, Clone)]
pub enum JobQueueError {
    #[error("store error: {0}")]
    Store(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {0} is not owned by lease holder {1}")]
    LeaseNotOwned(String, String),
    #[error("job {0} is already in a terminal state")]
    AlreadyTerminal(String),
}

impl JobQueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::LeaseNotOwned(..) => ErrorKind::Conflict,
            Self::AlreadyTerminal(_) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Transient,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub id: JobId,
    pub status: JobStatus,
    pub idempotent_hit: bool,
    /// True when `force_new` caused a fresh job to be submitted despite a
    /// matching idempotency key already pointing at a prior job.
    pub forced_new: bool,
}

#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: JobId,
    pub job_type: String,
    pub params: serde_json::Value,
    pub attempt: u32,
    pub parent_job_id: Option<JobId>,
}

/// Submits, leases, and tracks background jobs with at-least-once leasing
/// and idempotent submission.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn submit(
        &self,
        job_type: &str,
        params: serde_json::Value,
        idempotency_key: Option<String>,
        parent_job_id: Option<JobId>,
        force_new: bool,
    ) -> Result<SubmittedJob, JobQueueError>;

    async fn lease(&self, job_types: &[String], worker_id: &str) -> Result<Option<LeasedJob>, JobQueueError>;

    async fn heartbeat(&self, id: JobId, worker_id: &str) -> Result<(), JobQueueError>;

    async fn complete(&self, id: JobId, worker_id: &str, result_ref: String) -> Result<(), JobQueueError>;

    async fn fail(&self, id: JobId, worker_id: &str, error: String) -> Result<(), JobQueueError>;

    async fn cancel(&self, id: JobId) -> Result<(), JobQueueError>;

    async fn status(&self, id: JobId) -> Result<Option<JobStatus>, JobQueueError>;

    /// Re-queues jobs whose lease expired without a heartbeat, up to
    /// `max_attempts`; beyond that they are marked `Failed`.
    async fn recover_expired_leases(&self) -> Result<usize, JobQueueError>;
}

pub struct StoreJobQueue {
    store: Arc<dyn Store>,
    lease_duration: chrono::Duration,
    max_attempts: u32,
    idempotency_ttl_secs: i64,
}

impl StoreJobQueue {
    pub fn new(store: Arc<dyn Store>, lease_duration: std::time::Duration, max_attempts: u32) -> Self {
        Self::with_idempotency_ttl(store, lease_duration, max_attempts, std::time::Duration::from_secs(3600))
    }

    pub fn with_idempotency_ttl(
        store: Arc<dyn Store>,
        lease_duration: std::time::Duration,
        max_attempts: u32,
        idempotency_ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            lease_duration: ChronoDuration::from_std(lease_duration).unwrap_or(ChronoDuration::seconds(60)),
            max_attempts,
            idempotency_ttl_secs: idempotency_ttl.as_secs() as i64,
        }
    }

    fn row_status(row: &JobRow) -> JobStatus {
        match row.status.as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            "canceled" => JobStatus::Canceled,
            _ => JobStatus::Failed,
        }
    }
}

#[async_trait]
impl JobQueue for StoreJobQueue {
    async fn submit(
        &self,
        job_type: &str,
        params: serde_json::Value,
        idempotency_key: Option<String>,
        parent_job_id: Option<JobId>,
        force_new: bool,
    ) -> Result<SubmittedJob, JobQueueError> {
        let now = Utc::now();
        let job_id = JobId::new();

        if !force_new {
            if let Some(key) = &idempotency_key {
                let existing = self
                    .store
                    .insert_idempotency_if_absent(IdempotencyRow {
                        key: key.clone(),
                        job_id: job_id.to_string(),
                        created_at: now,
                        ttl_secs: self.idempotency_ttl_secs,
                    })
                    .await
                    .map_err(|e| JobQueueError::Store(e.to_string()))?;
                if let InsertIfAbsent::Existing(row) = existing {
                    if let Ok(id) = row.job_id.parse::<uuid::Uuid>() {
                        if let Some(job_row) = self
                            .store
                            .get_job(&row.job_id)
                            .await
                            .map_err(|e| JobQueueError::Store(e.to_string()))?
                        {
                            return Ok(SubmittedJob {
                                id: JobId(id),
                                status: Self::row_status(&job_row),
                                idempotent_hit: true,
                                forced_new: false,
                            });
                        }
                    }
                }
            }
        }

        let row = JobRow {
            id: job_id.to_string(),
            job_type: job_type.to_string(),
            params_json: params.to_string(),
            status: "queued".to_string(),
            created_at: now,
            updated_at: now,
            lease_owner: None,
            lease_expiry: None,
            heartbeat_at: None,
            attempt: 0,
            idempotency_key: idempotency_key.clone(),
            parent_job_id: parent_job_id.map(|p| p.to_string()),
            result_ref: None,
            error_json: None,
        };
        self.store
            .insert_job(row)
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))?;

        if force_new {
            if let Some(key) = idempotency_key {
                self.store
                    .upsert_idempotency(IdempotencyRow {
                        key,
                        job_id: job_id.to_string(),
                        created_at: now,
                        ttl_secs: self.idempotency_ttl_secs,
                    })
                    .await
                    .map_err(|e| JobQueueError::Store(e.to_string()))?;
            }
        }

        Ok(SubmittedJob {
            id: job_id,
            status: JobStatus::Queued,
            idempotent_hit: false,
            forced_new: force_new,
        })
    }

    async fn lease(&self, job_types: &[String], worker_id: &str) -> Result<Option<LeasedJob>, JobQueueError> {
        let now = Utc::now();
        let row = self
            .store
            .lease_next_job(job_types, worker_id, now + self.lease_duration, now)
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id = row
            .id
            .parse::<uuid::Uuid>()
            .map(JobId)
            .map_err(|e| JobQueueError::Store(e.to_string()))?;
        Ok(Some(LeasedJob {
            id,
            job_type: row.job_type,
            params: serde_json::from_str(&row.params_json).unwrap_or(serde_json::Value::Null),
            attempt: row.attempt,
            parent_job_id: row
                .parent_job_id
                .and_then(|p| p.parse::<uuid::Uuid>().ok())
                .map(JobId),
        }))
    }

    async fn heartbeat(&self, id: JobId, worker_id: &str) -> Result<(), JobQueueError> {
        let mut row = self.get_row(id).await?;
        if row.lease_owner.as_deref() != Some(worker_id) {
            return Err(JobQueueError::LeaseNotOwned(id.to_string(), worker_id.to_string()));
        }
        let now = Utc::now();
        row.heartbeat_at = Some(now);
        row.lease_expiry = Some(now + self.lease_duration);
        row.updated_at = now;
        self.store
            .update_job(row)
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))
    }

    async fn complete(&self, id: JobId, worker_id: &str, result_ref: String) -> Result<(), JobQueueError> {
        let mut row = self.get_row(id).await?;
        if row.lease_owner.as_deref() != Some(worker_id) {
            return Err(JobQueueError::LeaseNotOwned(id.to_string(), worker_id.to_string()));
        }
        row.status = "succeeded".to_string();
        row.result_ref = Some(result_ref);
        row.updated_at = Utc::now();
        self.store
            .update_job(row)
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))
    }

    async fn fail(&self, id: JobId, worker_id: &str, error: String) -> Result<(), JobQueueError> {
        let mut row = self.get_row(id).await?;
        if row.lease_owner.as_deref() != Some(worker_id) {
            return Err(JobQueueError::LeaseNotOwned(id.to_string(), worker_id.to_string()));
        }
        if row.attempt >= self.max_attempts {
            row.status = "failed".to_string();
        } else {
            row.status = "queued".to_string();
            row.lease_owner = None;
            row.lease_expiry = None;
        }
        row.error_json = Some(serde_json::json!({ "message": error }).to_string());
        row.updated_at = Utc::now();
        self.store
            .update_job(row)
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))
    }

    async fn cancel(&self, id: JobId) -> Result<(), JobQueueError> {
        let mut row = self.get_row(id).await?;
        match Self::row_status(&row) {
            JobStatus::Canceled => return Ok(()),
            status if status.is_terminal() => return Err(JobQueueError::AlreadyTerminal(id.to_string())),
            _ => {}
        }
        row.status = "canceled".to_string();
        row.updated_at = Utc::now();
        self.store
            .update_job(row)
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))
    }

    async fn status(&self, id: JobId) -> Result<Option<JobStatus>, JobQueueError> {
        Ok(self
            .store
            .get_job(&id.to_string())
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))?
            .map(|r| Self::row_status(&r)))
    }

    async fn recover_expired_leases(&self) -> Result<usize, JobQueueError> {
        let now = Utc::now();
        let expired = self
            .store
            .jobs_with_expired_lease(now)
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))?;
        let count = expired.len();
        for mut row in expired {
            if row.attempt >= self.max_attempts {
                row.status = "failed".to_string();
                row.error_json = Some(serde_json::json!({ "message": "lease expired, max attempts reached" }).to_string());
            } else {
                row.status = "queued".to_string();
                row.lease_owner = None;
                row.lease_expiry = None;
            }
            row.updated_at = now;
            self.store
                .update_job(row)
                .await
                .map_err(|e| JobQueueError::Store(e.to_string()))?;
        }
        Ok(count)
    }
}

impl StoreJobQueue {
    async fn get_row(&self, id: JobId) -> Result<JobRow, JobQueueError> {
        self.store
            .get_job(&id.to_string())
            .await
            .map_err(|e| JobQueueError::Store(e.to_string()))?
            .ok_or_else(|| JobQueueError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn idempotent_submit_returns_same_job() {
        let queue = StoreJobQueue::new(Arc::new(InMemoryStore::new()), std::time::Duration::from_secs(60), 3);
        let first = queue
            .submit("research", serde_json::json!({}), Some("key1".into()), None, false)
            .await
            .unwrap();
        let second = queue
            .submit("research", serde_json::json!({}), Some("key1".into()), None, false)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.idempotent_hit);
    }

    #[tokio::test]
    async fn force_new_bypasses_idempotency_cache() {
        let queue = StoreJobQueue::new(Arc::new(InMemoryStore::new()), std::time::Duration::from_secs(60), 3);
        let first = queue
            .submit("research", serde_json::json!({}), Some("key1".into()), None, false)
            .await
            .unwrap();
        let second = queue
            .submit("research", serde_json::json!({}), Some("key1".into()), None, true)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(!second.idempotent_hit);
        assert!(second.forced_new);

        let third = queue
            .submit("research", serde_json::json!({}), Some("key1".into()), None, false)
            .await
            .unwrap();
        assert_eq!(third.id, second.id);
        assert!(third.idempotent_hit);
    }

    #[tokio::test]
    async fn lease_then_complete_round_trip() {
        let queue = StoreJobQueue::new(Arc::new(InMemoryStore::new()), std::time::Duration::from_secs(60), 3);
        let submitted = queue
            .submit("research", serde_json::json!({}), None, None, false)
            .await
            .unwrap();
        let types = vec!["research".to_string()];
        let leased = queue.lease(&types, "worker-1").await.unwrap().unwrap();
        assert_eq!(leased.id, submitted.id);
        queue.complete(leased.id, "worker-1", "report:1".into()).await.unwrap();
        assert_eq!(queue.status(submitted.id).await.unwrap(), Some(JobStatus::Succeeded));
    }

    #[tokio::test]
    async fn fail_under_max_attempts_requeues() {
        let queue = StoreJobQueue::new(Arc::new(InMemoryStore::new()), std::time::Duration::from_secs(60), 3);
        let submitted = queue
            .submit("research", serde_json::json!({}), None, None, false)
            .await
            .unwrap();
        let types = vec!["research".to_string()];
        let leased = queue.lease(&types, "worker-1").await.unwrap().unwrap();
        queue.fail(leased.id, "worker-1", "boom".into()).await.unwrap();
        assert_eq!(queue.status(submitted.id).await.unwrap(), Some(JobStatus::Queued));
    }
}
