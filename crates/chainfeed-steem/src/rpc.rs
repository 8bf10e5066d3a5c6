//! JSON-RPC 2.0 wire types and transport errors for Steem nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use chainfeed_core::FeedError;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the node's error. A missing result is `null`.
    pub fn into_result(self) -> Result<Value, SteemError> {
        match self.error {
            Some(err) => Err(SteemError::Rpc(err)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Errors raised while talking to a Steem node.
#[derive(Debug, Error)]
pub enum SteemError {
    /// Connection failure or non-2xx HTTP status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The node's answer did not have the expected shape.
    #[error("unexpected response to {method}: {reason}")]
    Decode { method: String, reason: String },
}

impl SteemError {
    /// Returns `true` for failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

impl From<SteemError> for FeedError {
    fn from(e: SteemError) -> Self {
        if e.is_retryable() {
            FeedError::Rpc(e.to_string())
        } else {
            FeedError::Rejected(e.to_string())
        }
    }
}
