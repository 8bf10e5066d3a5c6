//! Transports that carry one JSON-RPC call to a Steem node.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse, SteemError};

/// Default public API node.
pub const DEFAULT_NODE_URL: &str = "https://api.steemit.com";

/// One JSON-RPC round trip. Implement this to plug in another transport or a
/// scripted node in tests.
#[async_trait]
pub trait SteemTransport: Send + Sync + 'static {
    async fn call(&self, method: &str, params: Value) -> Result<Value, SteemError>;
}

#[async_trait]
impl<T: SteemTransport + ?Sized> SteemTransport for Arc<T> {
    async fn call(&self, method: &str, params: Value) -> Result<Value, SteemError> {
        (**self).call(method, params).await
    }
}

/// Configuration for `HttpTransport`.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC 2.0 over HTTP POST.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, config: HttpTransportConfig) -> Result<Self, SteemError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SteemError::Http(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, SteemError> {
        Self::new(url, HttpTransportConfig::default())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SteemTransport for HttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, SteemError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        tracing::trace!(id, method, url = %self.url, "sending request");

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| SteemError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SteemError::Http(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| SteemError::Decode {
                method: method.to_string(),
                reason: e.to_string(),
            })?
            .into_result()
    }
}
