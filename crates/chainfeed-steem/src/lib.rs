//! chainfeed-steem: Steem JSON-RPC ledger client for ChainFeed.
//!
//! Provides a [`SteemClient`] implementing `LedgerClient` over any
//! [`SteemTransport`] (HTTP by default), a polling live block stream, and
//! [`SteemFeedBuilder`] to wire it all into a `FeedEngine`.

pub mod builder;
pub mod client;
pub mod rpc;
pub mod stream;
pub mod testing;
pub mod transport;

pub use builder::SteemFeedBuilder;
pub use client::{BlockchainMode, DynamicGlobalProperties, SteemClient, STEEM_BLOCK_INTERVAL_MS};
pub use rpc::SteemError;
pub use testing::ScriptedNode;
pub use transport::{HttpTransport, HttpTransportConfig, SteemTransport, DEFAULT_NODE_URL};
