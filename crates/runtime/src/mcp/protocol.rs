//! JSON-RPC 2.0 envelope and error-code mapping.
//!
//! Shared by every transport (stdio, HTTP, WebSocket) so the wire format is
//! identical regardless of how a request arrived.

use serde::{Deserialize, Serialize};

use crate::types::ErrorKind;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, kind: ErrorKind, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code: error_code(kind),
                message,
                data: None,
            }),
        }
    }

    pub fn parse_error() -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            result: None,
            error: Some(JsonRpcError {
                code: -32700,
                message: "parse error".to_string(),
                data: None,
            }),
        }
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: format!("method not found: {method}"),
                data: None,
            }),
        }
    }
}

/// Standard JSON-RPC codes where they apply (parse/invalid-request/
/// method-not-found/invalid-params), and an application range starting at
/// -32000 for everything [`ErrorKind`] adds on top.
pub fn error_code(kind: ErrorKind) -> i64 {
    match kind {
        ErrorKind::Validation => -32602,
        ErrorKind::Unauthorized => -32001,
        ErrorKind::Forbidden => -32002,
        ErrorKind::NotFound => -32003,
        ErrorKind::Conflict => -32004,
        ErrorKind::RateLimited => -32005,
        ErrorKind::Transient => -32006,
        ErrorKind::Cancelled => -32007,
        ErrorKind::Upstream => -32008,
        ErrorKind::Internal => -32603,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_invalid_params() {
        assert_eq!(error_code(ErrorKind::Validation), -32602);
    }
}
