//! Operation and block handler traits + registry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FeedError;
use crate::types::{Block, OperationContext};

/// Trait for user-provided `custom_json` handlers.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Called once per matching operation with its parsed payload.
    async fn handle(&self, payload: &Value, ctx: &OperationContext) -> Result<(), FeedError>;
}

/// Trait for the per-block callback.
///
/// Called once per dispatched block regardless of its contents.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn handle_block(&self, height: u64, block: &Block) -> Result<(), FeedError>;
}

/// Default block callback.
pub struct NoopBlockHandler;

#[async_trait]
impl BlockHandler for NoopBlockHandler {
    async fn handle_block(&self, _height: u64, _block: &Block) -> Result<(), FeedError> {
        Ok(())
    }
}

/// Adapts a synchronous closure `(payload, authorizer)` into an [`OperationHandler`].
pub struct FnOperationHandler<F>(pub F);

#[async_trait]
impl<F> OperationHandler for FnOperationHandler<F>
where
    F: Fn(&Value, &str) + Send + Sync,
{
    async fn handle(&self, payload: &Value, ctx: &OperationContext) -> Result<(), FeedError> {
        (self.0)(payload, &ctx.authorizer);
        Ok(())
    }
}

/// Adapts a synchronous closure `(height, block)` into a [`BlockHandler`].
pub struct FnBlockHandler<F>(pub F);

#[async_trait]
impl<F> BlockHandler for FnBlockHandler<F>
where
    F: Fn(u64, &Block) + Send + Sync,
{
    async fn handle_block(&self, height: u64, block: &Block) -> Result<(), FeedError> {
        (self.0)(height, block);
        Ok(())
    }
}

/// Registry of operation handlers keyed by namespaced id, plus the block callback.
pub struct HandlerRegistry {
    prefix: String,
    operations: HashMap<String, Arc<dyn OperationHandler>>,
    block: Arc<dyn BlockHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry whose keys are namespaced with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            operations: HashMap::new(),
            block: Arc::new(NoopBlockHandler),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Register a handler for `id`. A later registration for the same id
    /// replaces the earlier one.
    pub fn register(&mut self, id: &str, handler: Arc<dyn OperationHandler>) {
        let key = format!("{}{}", self.prefix, id);
        if self.operations.insert(key.clone(), handler).is_some() {
            tracing::debug!(key = %key, "Replaced operation handler");
        }
    }

    /// Replace the block callback.
    pub fn on_block(&mut self, handler: Arc<dyn BlockHandler>) {
        self.block = handler;
    }

    /// Look up the handler for a namespaced operation id as it appears on chain.
    pub fn handler_for(&self, namespaced_id: &str) -> Option<Arc<dyn OperationHandler>> {
        self.operations.get(namespaced_id).cloned()
    }

    pub fn block_handler(&self) -> Arc<dyn BlockHandler> {
        Arc::clone(&self.block)
    }

    /// Strip the namespace prefix from an on-chain id.
    pub fn local_id<'a>(&self, namespaced_id: &'a str) -> &'a str {
        namespaced_id
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(namespaced_id)
    }

    /// Number of registered operation handlers.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new("")
    }
}
