//! Fluent builder API for Steem feed engines.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainfeed_steem::SteemFeedBuilder;
//!
//! # async fn run() -> Result<(), chainfeed_core::FeedError> {
//! let feed = SteemFeedBuilder::new()
//!     .node("https://api.steemit.com")
//!     .prefix("myapp_")
//!     .from_block(40_000_000)
//!     .catch_up_poll_interval_ms(100)
//!     .build()?;
//!
//! feed.register_fn("greet", |payload, from| {
//!     println!("{from} says {payload}");
//! });
//! feed.start()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chainfeed_core::{FeedConfig, FeedEngine, FeedError, FetchFailurePolicy, RetryConfig};

use crate::client::{BlockchainMode, SteemClient, STEEM_BLOCK_INTERVAL_MS};
use crate::transport::{HttpTransport, HttpTransportConfig, SteemTransport, DEFAULT_NODE_URL};

/// Fluent builder for a [`FeedEngine`] over a Steem node.
pub struct SteemFeedBuilder {
    config: FeedConfig,
    url: String,
    mode: BlockchainMode,
    block_interval_ms: u64,
    request_timeout_ms: u64,
}

impl Default for SteemFeedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SteemFeedBuilder {
    pub fn new() -> Self {
        Self {
            config: FeedConfig::default(),
            url: DEFAULT_NODE_URL.to_string(),
            mode: BlockchainMode::default(),
            block_interval_ms: STEEM_BLOCK_INTERVAL_MS,
            request_timeout_ms: 30_000,
        }
    }

    /// Start from an existing feed configuration.
    pub fn with_config(mut self, config: FeedConfig) -> Self {
        self.config = config;
        self
    }

    /// JSON-RPC endpoint of the node.
    pub fn node(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Namespace prepended to registered operation ids.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.operation_prefix = prefix.into();
        self
    }

    /// First block to process.
    pub fn from_block(mut self, height: u64) -> Self {
        self.config.initial_cursor = height;
        self
    }

    pub fn catch_up_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.catch_up_poll_interval_ms = ms;
        self
    }

    pub fn shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_grace_ms = ms;
        self
    }

    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fetch_timeout_ms = ms;
        self
    }

    pub fn fetch_failure_policy(mut self, policy: FetchFailurePolicy) -> Self {
        self.config.fetch_failure_policy = policy;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Follow the latest or the irreversible head.
    pub fn mode(mut self, mode: BlockchainMode) -> Self {
        self.mode = mode;
        self
    }

    /// Live feed polling interval in milliseconds.
    pub fn block_interval_ms(mut self, ms: u64) -> Self {
        self.block_interval_ms = ms;
        self
    }

    /// HTTP request timeout in milliseconds.
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Build the `FeedConfig` only.
    pub fn build_config(&self) -> FeedConfig {
        self.config.clone()
    }

    /// Build an engine over a caller-supplied transport.
    pub fn build_with<T: SteemTransport>(
        self,
        transport: T,
    ) -> Result<FeedEngine<SteemClient<T>>, FeedError> {
        let client = SteemClient::new(transport)
            .with_mode(self.mode)
            .with_block_interval(Duration::from_millis(self.block_interval_ms));
        FeedEngine::new(self.config, client)
    }

    /// Build an engine over HTTP JSON-RPC.
    pub fn build(self) -> Result<FeedEngine<SteemClient<HttpTransport>>, FeedError> {
        let transport = HttpTransport::new(
            self.url.clone(),
            HttpTransportConfig {
                request_timeout: Duration::from_millis(self.request_timeout_ms),
            },
        )
        .map_err(|e| FeedError::Config(format!("http transport: {e}")))?;
        self.build_with(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNode;

    #[test]
    fn builder_defaults() {
        let cfg = SteemFeedBuilder::new().build_config();
        assert_eq!(cfg.initial_cursor, 1);
        assert_eq!(cfg.catch_up_poll_interval_ms, 1_000);
        assert_eq!(cfg.operation_prefix, "");
    }

    #[test]
    fn builder_custom() {
        let cfg = SteemFeedBuilder::new()
            .prefix("myapp_")
            .from_block(40_000_000)
            .catch_up_poll_interval_ms(50)
            .fetch_failure_policy(FetchFailurePolicy::Skip)
            .build_config();

        assert_eq!(cfg.operation_prefix, "myapp_");
        assert_eq!(cfg.initial_cursor, 40_000_000);
        assert_eq!(cfg.catch_up_poll_interval_ms, 50);
        assert_eq!(cfg.fetch_failure_policy, FetchFailurePolicy::Skip);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = SteemFeedBuilder::new()
            .from_block(0)
            .build_with(ScriptedNode::new(1, 1));
        assert!(matches!(result, Err(FeedError::Config(_))));
    }

    #[test]
    fn build_with_applies_config() {
        let engine = SteemFeedBuilder::new()
            .prefix("app_")
            .from_block(7)
            .mode(BlockchainMode::Irreversible)
            .build_with(ScriptedNode::new(1, 1))
            .unwrap();
        assert_eq!(engine.cursor(), 7);
        assert_eq!(engine.config().operation_prefix, "app_");
    }
}
