//! MCP server implementation for Meridian.
//!
//! Exposes the runtime's research/search/memory/session tools over stdio
//! transport using the rmcp SDK. Every tool method here is a thin wrapper
//! around `meridian_runtime::mcp::tools`, so behavior matches the HTTP and
//! WebSocket transports exactly.

use std::future::Future;
use std::sync::Arc;

use meridian_runtime::mcp::tools;
use meridian_runtime::Runtime;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    service::RequestContext,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};

#[derive(Clone)]
pub struct MeridianMcpServer {
    runtime: Arc<Runtime>,
    tool_router: ToolRouter<Self>,
}

fn to_mcp_result<T: serde::Serialize>(result: Result<T, meridian_runtime::RuntimeError>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => {
            let json = serde_json::to_string_pretty(&value).unwrap_or_default();
            Ok(CallToolResult::success(vec![Content::text(json)]))
        }
        Err(e) => Ok(CallToolResult::error(vec![Content::text(e.human_message())])),
    }
}

#[tool_router]
impl MeridianMcpServer {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Check that the server is reachable.")]
    async fn ping(&self) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::ping(&self.runtime, tools::PingParams {}).await)
    }

    #[tool(description = "Report server status: protocol version, store durability, worker concurrency, and catalog size.")]
    async fn get_server_status(&self) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::get_server_status(&self.runtime, tools::GetServerStatusParams {}).await)
    }

    #[tool(
        description = "Submit a research query for asynchronous planning, retrieval, and synthesis. Returns a job id and session id immediately; poll get_job_status or subscribe to session_history for progress."
    )]
    async fn research(&self, Parameters(params): Parameters<tools::ResearchParams>) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::research(&self.runtime, params).await)
    }

    #[tool(description = "Get the current status of a previously submitted job.")]
    async fn get_job_status(
        &self,
        Parameters(params): Parameters<tools::JobStatusParams>,
    ) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::get_job_status(&self.runtime, params).await)
    }

    #[tool(description = "Cancel a queued or running job.")]
    async fn cancel_job(&self, Parameters(params): Parameters<tools::CancelJobParams>) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::cancel_job(&self.runtime, params).await)
    }

    #[tool(description = "Search indexed documents with a hybrid lexical/vector query.")]
    async fn search(&self, Parameters(params): Parameters<tools::SearchParams>) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::search(&self.runtime, params).await)
    }

    #[tool(description = "Retrieve related memory nodes for a query.")]
    async fn retrieve(&self, Parameters(params): Parameters<tools::RetrieveParams>) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::retrieve(&self.runtime, params).await)
    }

    #[tool(description = "Fetch a previously produced research report by id.")]
    async fn get_report(&self, Parameters(params): Parameters<tools::GetReportParams>) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::get_report(&self.runtime, params).await)
    }

    #[tool(description = "List recent research reports, optionally filtered by a query substring.")]
    async fn history(&self, Parameters(params): Parameters<tools::HistoryParams>) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::history(&self.runtime, params).await)
    }

    #[tool(description = "Fetch the full event history for a session.")]
    async fn session_history(
        &self,
        Parameters(params): Parameters<tools::SessionHistoryParams>,
    ) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::session_history(&self.runtime, params).await)
    }

    #[tool(description = "Fork a session at a given event index, returning a new session id that replays history up to that point.")]
    async fn session_fork(
        &self,
        Parameters(params): Parameters<tools::SessionForkParams>,
    ) -> Result<CallToolResult, McpError> {
        to_mcp_result(tools::session_fork(&self.runtime, params).await)
    }
}

#[tool_handler]
impl ServerHandler for MeridianMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Meridian research orchestrator — submit research jobs, search the index, \
                 query living memory, and inspect sessions and past reports."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListResourcesResult::default()))
    }
}

/// Start the MCP server over stdio transport.
pub async fn start_mcp_server(runtime: Arc<Runtime>) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let service = MeridianMcpServer::new(runtime).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
