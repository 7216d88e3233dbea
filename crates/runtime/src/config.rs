//! Environment-driven configuration.
//!
//! Every section mirrors one runtime component. Loaded once at boot via
//! [`Config::from_env`] and handed to [`crate::Runtime::new`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("missing required configuration: {0}")]
    MissingRequired(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub embedder: EmbedderConfig,
    pub models: ModelsConfig,
    pub cache: CacheConfig,
    pub jobs: JobQueueConfig,
    pub policy: PolicyConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// sensible defaults. `.env` files are loaded first via `dotenvy`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            store: StoreConfig {
                database_path: env_or("DATABASE_PATH", "./meridian.db"),
                durable_required: env_bool("STORE_DURABLE_REQUIRED", true),
            },
            embedder: EmbedderConfig {
                dimension: env_parse("VECTOR_DIMENSION", 768)?,
                endpoint: std::env::var("EMBEDDER_ENDPOINT").ok(),
                api_key: std::env::var("EMBEDDER_API_KEY").ok(),
            },
            models: ModelsConfig {
                provider_api_keys: collect_provider_keys(),
                catalog_path: std::env::var("MODEL_CATALOG_PATH").ok(),
            },
            cache: CacheConfig {
                exact_ttl: Duration::from_secs(env_parse("CACHE_EXACT_TTL_SECS", 3600)?),
                semantic_ttl: Duration::from_secs(env_parse("CACHE_SEMANTIC_TTL_SECS", 7200)?),
                semantic_similarity_threshold: env_parse("CACHE_SEMANTIC_TAU", 0.85)?,
                max_keys: env_parse("CACHE_MAX_KEYS", 10_000)?,
            },
            jobs: JobQueueConfig {
                idempotency_ttl: Duration::from_secs(env_parse("IDEMPOTENCY_TTL_SECS", 3600)?),
                lease_duration: Duration::from_secs(env_parse("JOB_LEASE_SECS", 60)?),
                heartbeat_interval: Duration::from_secs(env_parse("JOB_HEARTBEAT_SECS", 15)?),
                max_attempts: env_parse("JOB_MAX_ATTEMPTS", 3)?,
                worker_concurrency: env_parse(
                    "WORKER_CONCURRENCY",
                    num_cpus() * 2,
                )?,
                global_parallelism: env_parse("GLOBAL_PARALLELISM", 8)?,
            },
            policy: PolicyConfig::default(),
            transport: TransportConfig {
                server_port: env_parse("SERVER_PORT", 8080)?,
                auth_secret: std::env::var("TRANSPORT_AUTH_SECRET").ok(),
                protocol_version: env_or("MCP_PROTOCOL_VERSION", "2025-06-18"),
                tool_exposure: ToolExposure::from_env(),
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_path: String,
    pub durable_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub dimension: usize,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub provider_api_keys: std::collections::HashMap<String, String>,
    pub catalog_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub exact_ttl: Duration,
    pub semantic_ttl: Duration,
    pub semantic_similarity_threshold: f32,
    pub max_keys: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueueConfig {
    pub idempotency_ttl: Duration,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    pub max_attempts: u32,
    pub worker_concurrency: usize,
    pub global_parallelism: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub quick_answer_complexity_max: f64,
    pub quick_answer_novelty_max: f64,
    pub standard_research_time_budget_secs: u64,
    pub deep_research_novelty_min: f64,
    /// Number of distinct models dispatched in parallel per sub-question
    /// under each policy.
    pub ensemble_size: std::collections::HashMap<String, usize>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            quick_answer_complexity_max: 0.3,
            quick_answer_novelty_max: 0.3,
            standard_research_time_budget_secs: 60,
            deep_research_novelty_min: 0.7,
            ensemble_size: [
                ("quick-answer", 1),
                ("standard-research", 1),
                ("deep-research", 2),
                ("exhaustive", 3),
                ("local-only", 1),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub server_port: u16,
    pub auth_secret: Option<String>,
    pub protocol_version: String,
    pub tool_exposure: ToolExposure,
}

/// Which tools the MCP surface exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ToolExposure {
    All,
    Agent,
    Manual,
}

impl ToolExposure {
    fn from_env() -> Self {
        match std::env::var("TOOL_EXPOSURE_MODE").as_deref() {
            Ok("AGENT") => Self::Agent,
            Ok("MANUAL") => Self::Manual,
            _ => Self::All,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn collect_provider_keys() -> std::collections::HashMap<String, String> {
    let mut keys = std::collections::HashMap::new();
    for (env_key, name) in [
        ("ANTHROPIC_API_KEY", "anthropic"),
        ("OPENAI_API_KEY", "openai"),
        ("OPENROUTER_API_KEY", "openrouter"),
    ] {
        if let Ok(v) = std::env::var(env_key) {
            if !v.is_empty() {
                keys.insert(name.to_string(), v);
            }
        }
    }
    keys
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
