//! Steem ledger client.
//!
//! Uses `condenser_api.get_dynamic_global_properties` for the chain head and
//! `condenser_api.get_block` for single blocks. The live feed is a polling
//! stream (see [`crate::stream`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use chainfeed_core::{Block, BlockStream, FeedError, LedgerClient};

use crate::rpc::SteemError;
use crate::stream::poll_blocks;
use crate::transport::SteemTransport;

const GET_DYNAMIC_GLOBAL_PROPERTIES: &str = "condenser_api.get_dynamic_global_properties";
const GET_BLOCK: &str = "condenser_api.get_block";

/// Steem produces a block every 3 seconds.
pub const STEEM_BLOCK_INTERVAL_MS: u64 = 3_000;

/// Which height counts as the chain head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockchainMode {
    /// Latest produced block (`head_block_number`).
    #[default]
    Latest,
    /// Latest block that can no longer be reverted (`last_irreversible_block_num`).
    Irreversible,
}

/// The subset of the dynamic global properties the feed needs.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u64,
    #[serde(default)]
    pub head_block_id: String,
    #[serde(default)]
    pub time: String,
    pub last_irreversible_block_num: u64,
}

impl DynamicGlobalProperties {
    /// Head height under `mode`.
    pub fn height(&self, mode: BlockchainMode) -> u64 {
        match mode {
            BlockchainMode::Latest => self.head_block_number,
            BlockchainMode::Irreversible => self.last_irreversible_block_num,
        }
    }
}

/// [`LedgerClient`] for a Steem node behind any [`SteemTransport`].
pub struct SteemClient<T> {
    transport: Arc<T>,
    mode: BlockchainMode,
    block_interval: Duration,
}

impl<T> Clone for SteemClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            mode: self.mode,
            block_interval: self.block_interval,
        }
    }
}

impl<T: SteemTransport> SteemClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            mode: BlockchainMode::default(),
            block_interval: Duration::from_millis(STEEM_BLOCK_INTERVAL_MS),
        }
    }

    pub fn with_mode(mut self, mode: BlockchainMode) -> Self {
        self.mode = mode;
        self
    }

    /// How often the live feed polls for new blocks.
    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }

    pub fn mode(&self) -> BlockchainMode {
        self.mode
    }

    pub fn block_interval(&self) -> Duration {
        self.block_interval
    }

    pub async fn dynamic_global_properties(&self) -> Result<DynamicGlobalProperties, SteemError> {
        let value = self
            .transport
            .call(GET_DYNAMIC_GLOBAL_PROPERTIES, json!([]))
            .await?;
        decode(GET_DYNAMIC_GLOBAL_PROPERTIES, value)
    }

    /// Head height under the client's mode.
    pub async fn current_height(&self) -> Result<u64, SteemError> {
        Ok(self.dynamic_global_properties().await?.height(self.mode))
    }

    /// Fetch block `height`; `None` when the node answers `null`.
    pub async fn block(&self, height: u64) -> Result<Option<Block>, SteemError> {
        let value = self.transport.call(GET_BLOCK, json!([height])).await?;
        if value.is_null() {
            return Ok(None);
        }
        decode(GET_BLOCK, value).map(Some)
    }
}

fn decode<D: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<D, SteemError> {
    serde_json::from_value(value).map_err(|e| SteemError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl<T: SteemTransport> LedgerClient for SteemClient<T> {
    async fn head_block_number(&self) -> Result<u64, FeedError> {
        self.current_height()
            .await
            .map_err(|e| FeedError::HeadQuery(e.to_string()))
    }

    async fn get_block(&self, height: u64) -> Result<Option<Block>, FeedError> {
        self.block(height).await.map_err(|e| {
            if e.is_retryable() {
                FeedError::BlockFetch {
                    height,
                    reason: e.to_string(),
                }
            } else {
                FeedError::from(e)
            }
        })
    }

    async fn subscribe_blocks(&self) -> Result<BlockStream, FeedError> {
        Ok(poll_blocks(self.clone()))
    }
}
