//! Tool schemas and handlers.
//!
//! Each tool takes a typed parameter struct (deriving `schemars::JsonSchema`
//! so every transport can advertise the same input schema) and returns a
//! JSON value. [`super::ToolRegistry`] dispatches by name; the stdio
//! binary's `#[tool]` methods and the HTTP/WebSocket handlers both call
//! through here so behavior never diverges by transport.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::jobs::JobQueue;
use crate::types::{Budget, JobId, RuntimeError, SessionId};
use crate::Runtime;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PingParams {}

#[derive(Debug, Serialize)]
pub struct PingResult {
    pub ok: bool,
}

pub async fn ping(_runtime: &Runtime, _params: PingParams) -> Result<PingResult, RuntimeError> {
    Ok(PingResult { ok: true })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetServerStatusParams {}

#[derive(Debug, Serialize)]
pub struct GetServerStatusResult {
    pub protocol_version: String,
    pub durable_store: bool,
    pub worker_concurrency: usize,
    pub models_available: usize,
}

pub async fn get_server_status(
    runtime: &Runtime,
    _params: GetServerStatusParams,
) -> Result<GetServerStatusResult, RuntimeError> {
    Ok(GetServerStatusResult {
        protocol_version: runtime.config.transport.protocol_version.clone(),
        durable_store: runtime.store.durable(),
        worker_concurrency: runtime.config.jobs.worker_concurrency,
        models_available: runtime.catalog.list().len(),
    })
}

/// Submits a research job. Returns
/// immediately with a job id; the caller polls `job_status` or subscribes
/// to the session for completion.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResearchParams {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub budget: Option<BudgetParam>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Bypasses the idempotency cache, always submitting a fresh job.
    #[serde(default)]
    pub force_new: bool,
    #[serde(default, rename = "async")]
    pub run_async: bool,
    #[serde(default, rename = "costPreference")]
    pub cost_preference: Option<String>,
    #[serde(default, rename = "audienceLevel")]
    pub audience_level: Option<String>,
    #[serde(default, rename = "outputFormat")]
    pub output_format: Option<String>,
    #[serde(default, rename = "includeSources")]
    pub include_sources: Option<bool>,
    #[serde(default, rename = "maxLength")]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, rename = "textDocuments")]
    pub text_documents: Vec<String>,
    #[serde(default, rename = "structuredData")]
    pub structured_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BudgetParam {
    pub time_budget_secs: Option<u64>,
    pub money_ceiling_usd: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ResearchResult {
    pub job_id: String,
    pub session_id: String,
    pub idempotent_hit: bool,
    pub forced_new: bool,
}

pub async fn research(runtime: &Runtime, params: ResearchParams) -> Result<ResearchResult, RuntimeError> {
    if params.query.trim().is_empty() {
        return Err(RuntimeError::Validation("query must not be empty".to_string()));
    }

    let session_id = match params.session_id {
        Some(ref raw) => raw
            .parse::<uuid::Uuid>()
            .map(SessionId)
            .map_err(|_| RuntimeError::Validation("invalid session_id".to_string()))?,
        None => runtime.sessions.create(None).await?,
    };

    let mut budget = Budget::default();
    if let Some(b) = params.budget {
        if let Some(t) = b.time_budget_secs {
            budget.time_budget_secs = t;
        }
        if let Some(m) = b.money_ceiling_usd {
            budget.money_ceiling_usd = m;
        }
    }

    let job_params = serde_json::json!({
        "query": params.query,
        "session_id": session_id.to_string(),
        "params": params.params,
        "budget": budget,
        "async": params.run_async,
        "costPreference": params.cost_preference,
        "audienceLevel": params.audience_level,
        "outputFormat": params.output_format,
        "includeSources": params.include_sources,
        "maxLength": params.max_length,
        "images": params.images,
        "textDocuments": params.text_documents,
        "structuredData": params.structured_data,
    });

    let submitted = runtime
        .jobs
        .submit("research", job_params, params.idempotency_key, None, params.force_new)
        .await?;

    Ok(ResearchResult {
        job_id: submitted.id.to_string(),
        session_id: session_id.to_string(),
        idempotent_hit: submitted.idempotent_hit,
        forced_new: submitted.forced_new,
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JobStatusParams {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResult {
    pub job_id: String,
    pub status: String,
}

pub async fn get_job_status(runtime: &Runtime, params: JobStatusParams) -> Result<JobStatusResult, RuntimeError> {
    let job_id = parse_job_id(&params.job_id)?;
    let status = runtime
        .jobs
        .status(job_id)
        .await?
        .ok_or_else(|| RuntimeError::NotFound(format!("job {}", params.job_id)))?;
    Ok(JobStatusResult {
        job_id: params.job_id,
        status: status.to_string(),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CancelJobParams {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelJobResult {
    pub job_id: String,
    pub canceled: bool,
}

pub async fn cancel_job(runtime: &Runtime, params: CancelJobParams) -> Result<CancelJobResult, RuntimeError> {
    let job_id = parse_job_id(&params.job_id)?;
    runtime.jobs.cancel(job_id).await?;
    Ok(CancelJobResult {
        job_id: params.job_id,
        canceled: true,
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub hits: Vec<crate::index::SearchHit>,
}

pub async fn search(runtime: &Runtime, params: SearchParams) -> Result<SearchResult, RuntimeError> {
    let hits = runtime.index.search(&params.query, params.scope.as_deref(), params.k).await?;
    Ok(SearchResult { hits })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RetrieveParams {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

#[derive(Debug, Serialize)]
pub struct RetrieveResult {
    pub nodes: Vec<crate::memory::MemoryNode>,
}

pub async fn retrieve(runtime: &Runtime, params: RetrieveParams) -> Result<RetrieveResult, RuntimeError> {
    let nodes = runtime.memory.query(&params.query, params.k).await?;
    Ok(RetrieveResult { nodes })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetReportParams {
    pub report_id: i64,
}

pub async fn get_report(
    runtime: &Runtime,
    params: GetReportParams,
) -> Result<Option<crate::store::rows::ReportRow>, RuntimeError> {
    Ok(runtime.store.get_report(params.report_id).await?)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub query_filter: Option<String>,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct HistoryResult {
    pub reports: Vec<crate::store::rows::ReportRow>,
}

pub async fn history(runtime: &Runtime, params: HistoryParams) -> Result<HistoryResult, RuntimeError> {
    let reports = runtime
        .store
        .list_reports(params.limit, params.query_filter.as_deref())
        .await?;
    Ok(HistoryResult { reports })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionHistoryParams {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryResult {
    pub events: Vec<crate::session::SessionEvent>,
}

pub async fn session_history(
    runtime: &Runtime,
    params: SessionHistoryParams,
) -> Result<SessionHistoryResult, RuntimeError> {
    let session_id = parse_session_id(&params.session_id)?;
    let events = runtime.sessions.history(session_id).await?;
    Ok(SessionHistoryResult { events })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionForkParams {
    pub session_id: String,
    pub up_to_index: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionForkResult {
    pub session_id: String,
}

pub async fn session_fork(runtime: &Runtime, params: SessionForkParams) -> Result<SessionForkResult, RuntimeError> {
    let session_id = parse_session_id(&params.session_id)?;
    let forked = runtime.sessions.fork(session_id, params.up_to_index).await?;
    Ok(SessionForkResult {
        session_id: forked.to_string(),
    })
}

fn parse_job_id(raw: &str) -> Result<JobId, RuntimeError> {
    raw.parse::<uuid::Uuid>()
        .map(JobId)
        .map_err(|_| RuntimeError::Validation(format!("invalid job_id: {raw}")))
}

fn parse_session_id(raw: &str) -> Result<SessionId, RuntimeError> {
    raw.parse::<uuid::Uuid>()
        .map(SessionId)
        .map_err(|_| RuntimeError::Validation(format!("invalid session_id: {raw}")))
}
