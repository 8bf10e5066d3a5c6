//! In-memory ledger for tests and local replays.
//!
//! Holds a fixed set of blocks, a scripted chain head, optional injected
//! failures, and a push feed driven by [`MemoryLedger::push`].

use async_trait::async_trait;
use futures::channel::mpsc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::FeedError;
use crate::ledger::{BlockStream, LedgerClient};
use crate::types::Block;

#[derive(Default)]
struct LedgerState {
    head: u64,
    blocks: HashMap<u64, Block>,
    /// Remaining injected failures per height.
    fetch_failures: HashMap<u64, u32>,
    /// Heights whose fetch always fails with a non-retryable error.
    rejected: HashSet<u64>,
    head_failures: u32,
    fetch_delay: Option<Duration>,
    head_delay: Option<Duration>,
    fetched: Vec<u64>,
    head_queries: u64,
    feed_rx: Option<mpsc::UnboundedReceiver<Result<Block, FeedError>>>,
}

/// In-memory [`LedgerClient`].
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    feed_tx: Mutex<Option<mpsc::UnboundedSender<Result<Block, FeedError>>>>,
}

impl MemoryLedger {
    /// A ledger whose head is at `head` and that holds no blocks yet.
    pub fn new(head: u64) -> Self {
        let (tx, rx) = mpsc::unbounded();
        Self {
            state: Mutex::new(LedgerState {
                head,
                feed_rx: Some(rx),
                ..Default::default()
            }),
            feed_tx: Mutex::new(Some(tx)),
        }
    }

    /// A ledger holding empty blocks `1..=head`.
    pub fn with_empty_chain(head: u64) -> Self {
        let ledger = Self::new(head);
        for h in 1..=head {
            ledger.insert_block(Block::new(h, vec![]));
        }
        ledger
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a block under the height encoded in its id. Blocks with an
    /// unparseable id are ignored.
    pub fn insert_block(&self, block: Block) {
        if let Ok(height) = block.height() {
            self.state().blocks.insert(height, block);
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Make the next `times` fetches of `height` fail.
    pub fn fail_fetch(&self, height: u64, times: u32) {
        self.state().fetch_failures.insert(height, times);
    }

    /// Make every fetch of `height` fail with a non-retryable error.
    pub fn reject_fetch(&self, height: u64) {
        self.state().rejected.insert(height);
    }

    /// Make the next `times` head queries fail.
    pub fn fail_head(&self, times: u32) {
        self.state().head_failures = times;
    }

    /// Delay every block fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state().fetch_delay = Some(delay);
    }

    /// Delay every head query by `delay`.
    pub fn set_head_delay(&self, delay: Duration) {
        self.state().head_delay = Some(delay);
    }

    /// Heights requested through `get_block`, in order.
    pub fn fetched_heights(&self) -> Vec<u64> {
        self.state().fetched.clone()
    }

    pub fn head_queries(&self) -> u64 {
        self.state().head_queries
    }

    /// Push a block into the live feed.
    pub fn push(&self, block: Block) {
        self.send(Ok(block));
    }

    /// Push an error item into the live feed.
    pub fn push_error(&self, error: FeedError) {
        self.send(Err(error));
    }

    /// Close the live feed (end-of-stream).
    pub fn end_stream(&self) {
        self.feed_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn send(&self, item: Result<Block, FeedError>) {
        if let Some(tx) = self
            .feed_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.unbounded_send(item);
        }
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn head_block_number(&self) -> Result<u64, FeedError> {
        let delay = {
            let mut state = self.state();
            state.head_queries += 1;
            if state.head_failures > 0 {
                state.head_failures -= 1;
                return Err(FeedError::Rpc("injected head failure".into()));
            }
            state.head_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().head)
    }

    async fn get_block(&self, height: u64) -> Result<Option<Block>, FeedError> {
        let delay = {
            let mut state = self.state();
            state.fetched.push(height);
            if state.rejected.contains(&height) {
                return Err(FeedError::Rejected(format!("block {height} is malformed")));
            }
            if let Some(remaining) = state.fetch_failures.get_mut(&height) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FeedError::BlockFetch {
                        height,
                        reason: "injected fetch failure".into(),
                    });
                }
            }
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().blocks.get(&height).cloned())
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, FeedError> {
        let rx = self
            .state()
            .feed_rx
            .take()
            .ok_or_else(|| FeedError::Other("block feed already subscribed".into()))?;
        Ok(Box::pin(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn serves_blocks_and_head() {
        let ledger = MemoryLedger::with_empty_chain(3);
        assert_eq!(ledger.head_block_number().await.unwrap(), 3);
        assert_eq!(ledger.get_block(2).await.unwrap().unwrap().height().unwrap(), 2);
        assert!(ledger.get_block(4).await.unwrap().is_none());
        assert_eq!(ledger.fetched_heights(), vec![2, 4]);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let ledger = MemoryLedger::with_empty_chain(2);
        ledger.fail_fetch(1, 1);
        assert!(ledger.get_block(1).await.is_err());
        assert!(ledger.get_block(1).await.unwrap().is_some());

        ledger.fail_head(1);
        assert!(ledger.head_block_number().await.is_err());
        assert_eq!(ledger.head_block_number().await.unwrap(), 2);

        ledger.reject_fetch(2);
        assert!(!ledger.get_block(2).await.unwrap_err().is_retryable());
        assert!(!ledger.get_block(2).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn feed_delivers_then_ends() {
        let ledger = MemoryLedger::new(0);
        let mut feed = ledger.subscribe_blocks().await.unwrap();
        ledger.push(Block::new(7, vec![]));
        ledger.end_stream();

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.height().unwrap(), 7);
        assert!(feed.next().await.is_none());
        assert!(ledger.subscribe_blocks().await.is_err());
    }
}
