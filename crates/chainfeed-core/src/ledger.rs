//! `LedgerClient` trait: the engine's only view of the chain.
//!
//! A concrete client (JSON-RPC, in-memory, …) provides the head height,
//! single-block lookups, and a push feed of new blocks.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::FeedError;
use crate::types::Block;

/// A stream of new blocks. Dropping it pauses the underlying subscription;
/// `None` marks end-of-stream.
pub type BlockStream = Pin<Box<dyn Stream<Item = Result<Block, FeedError>> + Send>>;

/// Abstracts over ledger RPC backends.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Current chain head height (`head_block_number` of the dynamic global properties).
    async fn head_block_number(&self) -> Result<u64, FeedError>;

    /// Fetch a block by height. `Ok(None)` if the node does not have it yet.
    async fn get_block(&self, height: u64) -> Result<Option<Block>, FeedError>;

    /// Open a feed of newly produced blocks.
    async fn subscribe_blocks(&self) -> Result<BlockStream, FeedError>;
}

#[async_trait]
impl<T: LedgerClient + ?Sized> LedgerClient for Arc<T> {
    async fn head_block_number(&self) -> Result<u64, FeedError> {
        (**self).head_block_number().await
    }

    async fn get_block(&self, height: u64) -> Result<Option<Block>, FeedError> {
        (**self).get_block(height).await
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, FeedError> {
        (**self).subscribe_blocks().await
    }
}
