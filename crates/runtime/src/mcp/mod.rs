//! The Model Context Protocol surface.
//!
//! [`ToolRegistry`] is the shared normalize → validate → dispatch path used
//! by every transport: one dispatch point shared by the HTTP, WebSocket, and
//! stdio front-ends.

pub mod http;
pub mod protocol;
pub mod tools;

use std::sync::Arc;

use protocol::{JsonRpcRequest, JsonRpcResponse};

use crate::types::RuntimeError;
use crate::Runtime;

/// Dispatches a named JSON-RPC method to its handler in [`tools`], after
/// deserializing and validating its params against that handler's schema.
pub struct ToolRegistry {
    runtime: Arc<Runtime>,
}

impl ToolRegistry {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.dispatch(&request.method, request.params).await {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(DispatchError::UnknownMethod) => JsonRpcResponse::method_not_found(id, &request.method),
            Err(DispatchError::Runtime(e)) => JsonRpcResponse::error(id, e.kind(), e.human_message()),
            Err(DispatchError::InvalidParams(msg)) => {
                JsonRpcResponse::error(id, crate::types::ErrorKind::Validation, msg)
            }
        }
    }

    async fn dispatch(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, DispatchError> {
        let runtime = &self.runtime;
        macro_rules! call {
            ($handler:path) => {{
                let parsed = serde_json::from_value(params)
                    .map_err(|e| DispatchError::InvalidParams(e.to_string()))?;
                let result = $handler(runtime, parsed).await?;
                serde_json::to_value(result).map_err(|e| DispatchError::InvalidParams(e.to_string()))
            }};
        }

        match method {
            "ping" => call!(tools::ping),
            "get_server_status" => call!(tools::get_server_status),
            "research" | "agent" => call!(tools::research),
            "get_job_status" | "job_status" => call!(tools::get_job_status),
            "cancel_job" => call!(tools::cancel_job),
            "search" => call!(tools::search),
            "retrieve" => call!(tools::retrieve),
            "get_report" => call!(tools::get_report),
            "history" => call!(tools::history),
            "session_history" => call!(tools::session_history),
            "session_fork" => call!(tools::session_fork),
            _ => Err(DispatchError::UnknownMethod),
        }
    }
}

enum DispatchError {
    UnknownMethod,
    InvalidParams(String),
    Runtime(RuntimeError),
}

impl From<RuntimeError> for DispatchError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn test_runtime() -> Arc<Runtime> {
        let mut config = Config::from_env().unwrap_or_else(|_| panic!("config"));
        config.store.database_path = ":memory:".to_string();
        config.store.durable_required = false;
        Arc::new(Runtime::new(config).await.unwrap())
    }

    #[tokio::test]
    async fn ping_round_trips_through_json_rpc() {
        let registry = ToolRegistry::new(test_runtime().await);
        let response = registry
            .handle(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: Some(serde_json::json!(1)),
                method: "ping".to_string(),
                params: serde_json::json!({}),
            })
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["ok"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let registry = ToolRegistry::new(test_runtime().await);
        let response = registry
            .handle(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: None,
                method: "no_such_tool".to_string(),
                params: serde_json::json!({}),
            })
            .await;
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
