//! Error types for the chainfeed pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting and dispatching blocks.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Failed to fetch block {height}: {reason}")]
    BlockFetch { height: u64, reason: String },

    #[error("Block {height} is not available yet")]
    BlockNotFound { height: u64 },

    #[error("Head query failed: {0}")]
    HeadQuery(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Invalid block id '{block_id}'")]
    InvalidBlockId { block_id: String },

    #[error("Malformed payload for operation '{id}': {reason}")]
    PayloadDecode { id: String, reason: String },

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    /// The node answered, but the request can never succeed (RPC error object,
    /// undecodable response).
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Engine already started")]
    AlreadyStarted,

    #[error("{0}")]
    Other(String),
}

impl FeedError {
    /// Returns `true` if retrying the same request may succeed. Block fetches
    /// failing with any other error are skipped without retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_)
                | Self::BlockFetch { .. }
                | Self::BlockNotFound { .. }
                | Self::HeadQuery(_)
                | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(FeedError::Timeout { ms: 10 }.is_retryable());
        assert!(FeedError::BlockNotFound { height: 3 }.is_retryable());
        assert!(!FeedError::Rejected("bad block".into()).is_retryable());
        assert!(!FeedError::Config("x".into()).is_retryable());
    }
}
