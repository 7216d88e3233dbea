//! Meridian runtime: a multi-agent research orchestrator exposed over the
//! Model Context Protocol.
//!
//! [`Runtime`] wires together the durability, retrieval, and orchestration
//! components behind a handful of `Arc<dyn Trait>` seams, composed once at
//! startup and shared by every transport.

pub mod cache;
pub mod config;
pub mod context;
pub mod index;
pub mod jobs;
pub mod mcp;
pub mod memory;
pub mod models;
pub mod orchestrate;
pub mod policy;
pub mod session;
pub mod store;
pub mod types;

pub use config::Config;
pub use types::{ErrorKind, RuntimeError};

use std::sync::Arc;

use cache::Cache;
use context::Embedder;
use index::{HybridIndex, Index};
use jobs::{JobQueue, StoreJobQueue};
use memory::{LivingMemory, Memory};
use models::client::{CloudModelClient, ModelClient};
use models::Catalog;
use orchestrate::{BoundedExecutor, Orchestrator};
use orchestrate::planner::ModelBackedPlanner;
use orchestrate::researcher::DefaultResearcher;
use orchestrate::synthesizer::ModelBackedSynthesizer;
use policy::{DefaultPolicySelector, PolicySelector};
use session::{SessionBus, StoreSessionBus};
use store::sqlite::SqliteStore;
use store::Store;

/// The assembled runtime: every capability the MCP surface (`crate::mcp`)
/// and the CLI binary depend on, constructed once at startup from
/// [`Config`].
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn Embedder>,
    pub model_client: Arc<dyn ModelClient>,
    pub catalog: Arc<Catalog>,
    pub cache: Arc<Cache>,
    pub index: Arc<dyn Index>,
    pub memory: Arc<dyn Memory>,
    pub jobs: Arc<dyn JobQueue>,
    pub policy_selector: Arc<dyn PolicySelector>,
    pub sessions: Arc<dyn SessionBus>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Runtime {
    pub async fn new(config: Config) -> Result<Self, RuntimeError> {
        let config = Arc::new(config);

        let store: Arc<dyn Store> = if config.store.database_path == ":memory:" {
            Arc::new(store::memory::InMemoryStore::new())
        } else {
            Arc::new(SqliteStore::open(std::path::Path::new(&config.store.database_path))?)
        };
        if config.store.durable_required && !store.durable() {
            return Err(store::StoreError::DurabilityRequired.into());
        }

        let embedder = context::build_embedder(&config.embedder)?;

        let catalog = Arc::new(match &config.models.catalog_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| models::ModelCatalogError::InvalidConfig(e.to_string()))?;
                Catalog::from_json(&raw)?
            }
            None => Catalog::default_catalog(),
        });

        let model_client: Arc<dyn ModelClient> = Arc::new(CloudModelClient::new(
            config.models.provider_api_keys.clone(),
            catalog.clone(),
        ));

        let cache = Arc::new(Cache::new(
            embedder.clone(),
            config.cache.exact_ttl,
            config.cache.semantic_ttl,
            config.cache.semantic_similarity_threshold,
            config.cache.max_keys,
        ));

        let index: Arc<dyn Index> = Arc::new(HybridIndex::new(store.clone(), embedder.clone()));
        let living_memory = LivingMemory::new(store.clone(), embedder.clone());
        living_memory.hydrate().await?;
        let memory: Arc<dyn Memory> = Arc::new(living_memory);

        let jobs: Arc<dyn JobQueue> = Arc::new(StoreJobQueue::with_idempotency_ttl(
            store.clone(),
            config.jobs.lease_duration,
            config.jobs.max_attempts,
            config.jobs.idempotency_ttl,
        ));

        let policy_selector: Arc<dyn PolicySelector> =
            Arc::new(DefaultPolicySelector::new(config.policy.clone()));

        let sessions: Arc<dyn SessionBus> = Arc::new(StoreSessionBus::new(store.clone()));

        let executor = Arc::new(BoundedExecutor::new(
            config.jobs.worker_concurrency,
            1,
            config.jobs.global_parallelism.max(config.jobs.worker_concurrency),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(ModelBackedPlanner::new(model_client.clone())),
            Arc::new(DefaultResearcher::new(model_client.clone(), index.clone(), memory.clone(), embedder.clone())),
            Arc::new(ModelBackedSynthesizer::new(model_client.clone())),
            catalog.clone(),
            model_client.clone(),
            policy_selector.clone(),
            store.clone(),
            cache.clone(),
            sessions.clone(),
            executor,
        ));

        Ok(Self {
            config,
            store,
            embedder,
            model_client,
            catalog,
            cache,
            index,
            memory,
            jobs,
            policy_selector,
            sessions,
            orchestrator,
        })
    }

    /// Background task recovering jobs whose lease expired without a
    /// heartbeat, run on `config.jobs.heartbeat_interval`.
    pub async fn run_lease_recovery_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.jobs.heartbeat_interval);
        loop {
            ticker.tick().await;
            match self.jobs.recover_expired_leases().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(recovered = n, "requeued jobs with expired leases"),
                Err(e) => tracing::warn!(error = %e, "lease recovery sweep failed"),
            }
        }
    }

    /// Leases `"research"` jobs and drives each through the [`Orchestrator`],
    /// completing or failing the job with the outcome. Runs until the
    /// process exits; spawn one per worker slot.
    pub async fn run_research_worker_loop(self: Arc<Self>, worker_id: String) {
        let job_types = vec!["research".to_string()];
        loop {
            let leased = match self.jobs.lease(&job_types, &worker_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "job lease attempt failed");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    continue;
                }
            };

            if let Err(e) = self.run_leased_research_job(&worker_id, &leased).await {
                tracing::warn!(job_id = %leased.id, error = %e, "research job failed");
                if let Err(e) = self.jobs.fail(leased.id, &worker_id, e.to_string()).await {
                    tracing::warn!(job_id = %leased.id, error = %e, "failed to mark job failed");
                }
            }
        }
    }

    async fn run_leased_research_job(&self, worker_id: &str, leased: &jobs::LeasedJob) -> Result<(), RuntimeError> {
        let query = leased
            .params
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::Validation("research job missing query".to_string()))?
            .to_string();

        let session_id = leased
            .params
            .get("session_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<uuid::Uuid>().ok())
            .map(types::SessionId)
            .unwrap_or_default();

        let budget: types::Budget = leased
            .params
            .get("budget")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let outcome = self
            .orchestrator
            .run(session_id, &query, leased.params.clone(), budget)
            .await
            .map_err(|e| RuntimeError::Internal(e.to_string()))?;

        self.jobs
            .complete(leased.id, worker_id, outcome.report_id.to_string())
            .await?;
        Ok(())
    }
}

