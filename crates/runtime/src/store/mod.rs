//! Durable storage.
//!
//! [`Store`] is the single durability boundary: Reports, Jobs,
//! IdempotencyRecords, Sessions, and SessionEvents are owned exclusively
//! here, backed by WAL-mode SQLite with typed errors and a schema-version
//! table.

pub mod memory;
pub mod rows;
pub mod sqlite;

use crate::types::ErrorKind;
use async_trait::async_trait;
use rows::{IdempotencyRow, IndexEntryRow, JobRow, MemoryNodeRow, ReportRow, SessionEventRow, SessionRow};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("durability required but backend is not durable")]
    DurabilityRequired,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DurabilityRequired => ErrorKind::Internal,
            Self::Backend(_) | Self::Serialization(_) => ErrorKind::Transient,
        }
    }
}

/// Result of an atomic insert-if-absent, used for idempotency and for the
/// job lease compare-and-swap.
#[derive(Debug, Clone)]
pub enum InsertIfAbsent<T> {
    Inserted(T),
    Existing(T),
}

/// A single durable store surface backing Reports, Jobs, IdempotencyRecords,
/// Sessions, SessionEvents, IndexEntries, and MemoryNodes.
///
/// An in-memory implementation ([`memory::InMemoryStore`]) may be used only
/// when explicitly configured; `durable()` must be honored by callers that
/// require durability for Job/IdempotencyRecord tables.
#[async_trait]
pub trait Store: Send + Sync {
    fn durable(&self) -> bool;

    // -- Reports ---------------------------------------------------------
    async fn insert_report(&self, row: ReportRow) -> Result<ReportRow, StoreError>;
    async fn get_report(&self, id: i64) -> Result<Option<ReportRow>, StoreError>;
    async fn rate_report(&self, id: i64, rating: u8) -> Result<(), StoreError>;
    async fn delete_report(&self, id: i64) -> Result<(), StoreError>;
    async fn list_reports(
        &self,
        limit: usize,
        query_filter: Option<&str>,
    ) -> Result<Vec<ReportRow>, StoreError>;

    // -- Jobs --------------------------------------------------------------
    async fn insert_job(&self, row: JobRow) -> Result<JobRow, StoreError>;
    async fn get_job(&self, id: &str) -> Result<Option<JobRow>, StoreError>;
    async fn update_job(&self, row: JobRow) -> Result<(), StoreError>;
    /// Atomically claims the oldest queued job, or a `running` job whose
    /// lease has expired, of one of the given types. Implements the
    /// compare-and-swap at the heart of JobQueue invariant (a).
    async fn lease_next_job(
        &self,
        types: &[String],
        worker_id: &str,
        lease_expiry: chrono::DateTime<chrono::Utc>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<JobRow>, StoreError>;
    async fn jobs_with_expired_lease(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<JobRow>, StoreError>;

    // -- Idempotency ---------------------------------------------------------
    async fn insert_idempotency_if_absent(
        &self,
        row: IdempotencyRow,
    ) -> Result<InsertIfAbsent<IdempotencyRow>, StoreError>;
    async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRow>, StoreError>;
    /// Unconditionally points `key` at a (possibly new) job, for `forceNew`
    /// submissions that intentionally bypass the idempotency cache.
    async fn upsert_idempotency(&self, row: IdempotencyRow) -> Result<(), StoreError>;

    // -- Sessions --------------------------------------------------------
    async fn insert_session(&self, row: SessionRow) -> Result<SessionRow, StoreError>;
    async fn get_session(&self, id: &str) -> Result<Option<SessionRow>, StoreError>;
    async fn touch_session(&self, id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<(), StoreError>;

    // -- SessionEvents -----------------------------------------------------
    /// Appends an event at the next monotone index for the session,
    /// enforcing a gap-free invariant.
    async fn append_session_event(&self, row: SessionEventRow) -> Result<SessionEventRow, StoreError>;
    async fn session_events_from(
        &self,
        session_id: &str,
        from_index: i64,
    ) -> Result<Vec<SessionEventRow>, StoreError>;
    async fn session_events_up_to(
        &self,
        session_id: &str,
        index_inclusive: i64,
    ) -> Result<Vec<SessionEventRow>, StoreError>;

    // -- IndexEntries ------------------------------------------------------
    async fn upsert_index_entry(&self, row: IndexEntryRow) -> Result<(), StoreError>;
    async fn delete_index_entry(&self, doc_id: &str) -> Result<(), StoreError>;

    // -- MemoryNodes ---------------------------------------------------------
    async fn upsert_memory_node(&self, row: MemoryNodeRow) -> Result<(), StoreError>;
    async fn list_memory_nodes(&self) -> Result<Vec<MemoryNodeRow>, StoreError>;

    // -- Generic vector search -----------------------------------------------
    /// Scans the named table's embedding column for the `k` nearest
    /// neighbours to `query_vec` by cosine distance. `filter` restricts to a
    /// scope (e.g. `"reports"` vs `"docs"`).
    async fn vector_search(
        &self,
        table: &str,
        query_vec: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<(String, f32)>, StoreError>;
}

/// Cosine distance helper shared by every `vector_search` implementation.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}
