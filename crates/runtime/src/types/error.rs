//! Error taxonomy for the Meridian runtime.
//!
//! Every fallible operation across the core returns a `Result<_, RuntimeError>`
//! (or a narrower per-module error that converts into it via `#[from]`).
//! `ErrorKind` is the wire-facing classification; transports map it onto
//! JSON-RPC error codes or HTTP statuses at the boundary.

use std::time::Duration;
use thiserror::Error;

/// The exhaustive wire-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    Transient,
    Cancelled,
    Upstream,
    Internal,
}

#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("upstream provider error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("embedder error: {0}")]
    Embedder(#[from] crate::context::embedding::EmbedderError),

    #[error("model client error: {0}")]
    ModelClient(#[from] crate::models::client::ModelClientError),

    #[error("catalog error: {0}")]
    Catalog(#[from] crate::models::catalog::ModelCatalogError),

    #[error("job queue error: {0}")]
    JobQueue(#[from] crate::jobs::JobQueueError),

    #[error("index error: {0}")]
    Index(#[from] crate::index::IndexError),

    #[error("memory error: {0}")]
    Memory(#[from] crate::memory::MemoryError),

    #[error("session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),
}

impl RuntimeError {
    /// Classify this error for wire transmission.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Store(e) => e.kind(),
            Self::Embedder(_) => ErrorKind::Transient,
            Self::ModelClient(e) => e.kind(),
            Self::Catalog(_) => ErrorKind::Internal,
            Self::JobQueue(e) => e.kind(),
            Self::Index(_) => ErrorKind::Internal,
            Self::Memory(_) => ErrorKind::Internal,
            Self::Session(e) => e.kind(),
            Self::Config(_) => ErrorKind::Internal,
            Self::Cache(e) => e.kind(),
        }
    }

    /// Short human-readable message, distinct from `Display`'s debug-ish
    /// detail, suitable for the `message` field of a user-visible reply.
    pub fn human_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation => "the request was malformed".to_string(),
            ErrorKind::Unauthorized => "authentication is required".to_string(),
            ErrorKind::Forbidden => "insufficient permissions".to_string(),
            ErrorKind::NotFound => "the requested resource was not found".to_string(),
            ErrorKind::Conflict => "the request conflicts with current state".to_string(),
            ErrorKind::RateLimited => "upstream rate limit reached, try again shortly".to_string(),
            ErrorKind::Transient => "a transient error occurred, try again".to_string(),
            ErrorKind::Cancelled => "the operation was cancelled".to_string(),
            ErrorKind::Upstream => "an upstream provider returned an error".to_string(),
            ErrorKind::Internal => "an internal error occurred".to_string(),
        }
    }
}

/// Retries a fallible async operation with exponential backoff and jitter
/// (base 200ms, at most 3 attempts). Only retries errors classified as
/// `Transient` or `RateLimited`; anything else returns immediately.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, RuntimeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RuntimeError>>,
{
    const BASE: Duration = Duration::from_millis(200);
    const MAX_ATTEMPTS: u32 = 3;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e)
                if attempt < MAX_ATTEMPTS
                    && matches!(e.kind(), ErrorKind::Transient | ErrorKind::RateLimited) =>
            {
                let backoff = BASE * 2u32.pow(attempt - 1);
                let jitter = Duration::from_millis(jitter_millis(backoff.as_millis() as u64));
                tokio::time::sleep(backoff + jitter).await;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Small jitter sourced from the low bits of the monotonic clock, avoiding
/// a dedicated RNG pull for a single call site.
fn jitter_millis(scale_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % (scale_ms.max(1) / 4 + 1)
}
