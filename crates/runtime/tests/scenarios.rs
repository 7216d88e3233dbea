use std::sync::Arc;
use std::time::Duration;

use meridian_runtime::config::{CacheConfig, Config, EmbedderConfig, JobQueueConfig, ModelsConfig, PolicyConfig, StoreConfig, ToolExposure, TransportConfig};
use meridian_runtime::jobs::JobQueue;
use meridian_runtime::mcp::protocol::JsonRpcRequest;
use meridian_runtime::mcp::ToolRegistry;
use meridian_runtime::session::SessionBus;
use meridian_runtime::types::JobStatus;
use meridian_runtime::Runtime;

fn test_config() -> Config {
    Config {
        store: StoreConfig {
            database_path: ":memory:".to_string(),
            durable_required: false,
        },
        embedder: EmbedderConfig {
            dimension: 16,
            endpoint: None,
            api_key: None,
        },
        models: ModelsConfig {
            provider_api_keys: Default::default(),
            catalog_path: None,
        },
        cache: CacheConfig {
            exact_ttl: Duration::from_secs(60),
            semantic_ttl: Duration::from_secs(60),
            semantic_similarity_threshold: 0.85,
            max_keys: 1000,
        },
        jobs: JobQueueConfig {
            idempotency_ttl: Duration::from_secs(3600),
            lease_duration: Duration::from_millis(50),
            heartbeat_interval: Duration::from_secs(15),
            max_attempts: 3,
            worker_concurrency: 4,
            global_parallelism: 8,
        },
        policy: PolicyConfig::default(),
        transport: TransportConfig {
            server_port: 0,
            auth_secret: None,
            protocol_version: "2025-06-18".to_string(),
            tool_exposure: ToolExposure::All,
        },
    }
}

async fn runtime() -> Arc<Runtime> {
    Arc::new(Runtime::new(test_config()).await.unwrap())
}

/// S1: ping responds deterministically through the JSON-RPC surface.
#[tokio::test]
async fn deterministic_ping() {
    let registry = ToolRegistry::new(runtime().await);
    let response = registry
        .handle(JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: "ping".to_string(),
            params: serde_json::json!({}),
        })
        .await;
    assert_eq!(response.result.unwrap()["ok"], serde_json::json!(true));
    assert!(response.error.is_none());
}

/// S2: resubmitting the same idempotency key returns the original job,
/// and a distinct key produces a distinct job.
#[tokio::test]
async fn idempotent_submission_across_clients() {
    let rt = runtime().await;
    let params = serde_json::json!({"query": "What is AI?"});

    let a = rt
        .jobs
        .submit("research", params.clone(), Some("K".to_string()), None, false)
        .await
        .unwrap();
    assert!(!a.idempotent_hit);

    let b = rt
        .jobs
        .submit("research", params.clone(), Some("K".to_string()), None, false)
        .await
        .unwrap();
    assert_eq!(a.id, b.id);
    assert!(b.idempotent_hit);

    let c = rt
        .jobs
        .submit("research", params, Some("K2".to_string()), None, false)
        .await
        .unwrap();
    assert_ne!(a.id, c.id);
}

/// S3: `force_new` always submits a fresh job even when an idempotency key
/// already maps to a prior (here, failed) job, and the idempotency cache
/// then points at the new job for subsequent non-forced submissions.
#[tokio::test]
async fn force_new_resubmits_after_prior_failure() {
    let rt = runtime().await;
    let params = serde_json::json!({"query": "What is AI?"});

    let first = rt
        .jobs
        .submit("research", params.clone(), Some("K".to_string()), None, false)
        .await
        .unwrap();
    let types = vec!["research".to_string()];
    let leased = rt.jobs.lease(&types, "worker-1").await.unwrap().unwrap();
    // Exhaust retries so the job lands in a terminal `failed` state.
    for _ in 0..3 {
        rt.jobs.fail(leased.id, "worker-1", "boom".to_string()).await.ok();
        if let Some(l) = rt.jobs.lease(&types, "worker-1").await.unwrap() {
            let _ = l;
        }
    }
    assert_eq!(rt.jobs.status(first.id).await.unwrap(), Some(JobStatus::Failed));

    let retried = rt
        .jobs
        .submit("research", params.clone(), Some("K".to_string()), None, false)
        .await
        .unwrap();
    assert_eq!(retried.id, first.id, "non-forced resubmission returns the same terminal job");

    let forced = rt
        .jobs
        .submit("research", params.clone(), Some("K".to_string()), None, true)
        .await
        .unwrap();
    assert_ne!(forced.id, first.id);
    assert!(!forced.idempotent_hit);
    assert!(forced.forced_new);

    let after = rt
        .jobs
        .submit("research", params, Some("K".to_string()), None, false)
        .await
        .unwrap();
    assert_eq!(after.id, forced.id, "idempotency cache now points at the forced job");
    assert!(after.idempotent_hit);
}

/// S5: a crashed worker's lease expires and the sweep requeues the job for
/// another worker to pick up and complete, with exactly one terminal
/// transition.
#[tokio::test]
async fn lease_recovery_after_worker_crash() {
    let rt = runtime().await;
    let submitted = rt
        .jobs
        .submit("research", serde_json::json!({}), None, None, false)
        .await
        .unwrap();

    let types = vec!["research".to_string()];
    let leased = rt.jobs.lease(&types, "worker-1").await.unwrap().unwrap();
    assert_eq!(leased.id, submitted.id);
    assert_eq!(leased.attempt, 0);

    // worker-1 crashes: no heartbeat, no completion. Wait past the lease.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let recovered = rt.jobs.recover_expired_leases().await.unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(rt.jobs.status(submitted.id).await.unwrap(), Some(JobStatus::Queued));

    let leased_again = rt.jobs.lease(&types, "worker-2").await.unwrap().unwrap();
    assert_eq!(leased_again.id, submitted.id);
    rt.jobs.complete(leased_again.id, "worker-2", "report:1".to_string()).await.unwrap();
    assert_eq!(rt.jobs.status(submitted.id).await.unwrap(), Some(JobStatus::Succeeded));
}

/// S6: cancelling a job twice is idempotent and leaves it terminal; cancel
/// after completion is rejected as a conflict rather than silently
/// overwriting the outcome.
#[tokio::test]
async fn cancellation_is_idempotent_but_not_retroactive() {
    let rt = runtime().await;
    let submitted = rt
        .jobs
        .submit("research", serde_json::json!({}), None, None, false)
        .await
        .unwrap();

    rt.jobs.cancel(submitted.id).await.unwrap();
    rt.jobs.cancel(submitted.id).await.unwrap();
    assert_eq!(rt.jobs.status(submitted.id).await.unwrap(), Some(JobStatus::Canceled));

    // A queued (not yet leased) job can also be cancelled directly.
    let never_leased = rt
        .jobs
        .submit("research", serde_json::json!({}), None, None, false)
        .await
        .unwrap();
    assert_eq!(rt.jobs.status(never_leased.id).await.unwrap(), Some(JobStatus::Queued));
    rt.jobs.cancel(never_leased.id).await.unwrap();
    assert_eq!(rt.jobs.status(never_leased.id).await.unwrap(), Some(JobStatus::Canceled));
    assert!(rt.jobs.cancel(never_leased.id).await.is_ok(), "re-cancel is idempotent");

    let other = rt
        .jobs
        .submit("research", serde_json::json!({}), None, None, false)
        .await
        .unwrap();
    let types = vec!["research".to_string()];
    let leased = rt.jobs.lease(&types, "worker-1").await.unwrap().unwrap();
    rt.jobs.complete(leased.id, "worker-1", "report:1".to_string()).await.unwrap();
    assert!(rt.jobs.cancel(other.id).await.is_err());
    let _ = leased;
}

/// Session events replay exactly once and in order when read back, the
/// invariant the resumable-subscription transports depend on.
#[tokio::test]
async fn session_history_replays_events_exactly_once_in_order() {
    let rt = runtime().await;
    let session_id = rt.sessions.create(None).await.unwrap();
    for i in 0..5 {
        rt.sessions
            .append(session_id, "phase", serde_json::json!({"i": i}))
            .await
            .unwrap();
    }
    let events = rt.sessions.history(session_id).await.unwrap();
    assert_eq!(events.len(), 5);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.index, i as i64);
        assert_eq!(event.payload["i"], serde_json::json!(i));
    }
}
