//! Row types mirrored across every `Store` backend. These are the
//! persisted shapes of the core entities; richer in-memory types (e.g.
//! `Report` with a parsed `Vec<Source>`) live next to their owning
//! component and convert to/from these rows at the Store boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRow {
    pub id: Option<i64>,
    pub query: String,
    pub parameters_json: String,
    pub content: String,
    pub sources_json: String,
    pub embedding: Option<Vec<f32>>,
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub params_json: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub idempotency_key: Option<String>,
    pub parent_job_id: Option<String>,
    pub result_ref: Option<String>,
    pub error_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRow {
    pub key: String,
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub parent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub metadata_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventRow {
    pub session_id: String,
    pub index: i64,
    pub event_type: String,
    pub payload_json: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntryRow {
    pub doc_id: String,
    pub scope: String,
    pub text_fragment: String,
    pub embedding_json: String,
    pub lexical_tokens: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNodeRow {
    pub id: String,
    pub embedding_json: String,
    pub entities_json: String,
    pub relations_json: String,
    pub sources_json: String,
    pub user_signature: Option<String>,
    pub resonance: f32,
    pub access_count: u32,
    pub last_access_at: DateTime<Utc>,
    pub confidence: f32,
}
