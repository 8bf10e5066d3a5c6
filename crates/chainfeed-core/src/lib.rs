//! chainfeed-core: sequential block ingestion and `custom_json` dispatch.
//!
//! # Architecture
//!
//! ```text
//! FeedEngine (one Tokio task)
//!     ├── catch-up: LedgerClient::get_block(cursor) → Dispatcher → head check
//!     ├── streaming: LedgerClient::subscribe_blocks() → Dispatcher
//!     ├── Cursor          (next height, monotonic, shared read-only)
//!     ├── Dispatcher      (block callback + custom_json routing)
//!     └── HandlerRegistry (namespaced id → handler, block callback slot)
//! ```

pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod handler;
pub mod ledger;
pub mod logging;
pub mod memory;
pub mod retry;
pub mod types;

pub use config::{FeedConfig, FeedState, FetchFailurePolicy};
pub use cursor::Cursor;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use engine::FeedEngine;
pub use error::FeedError;
pub use events::{FeedEvent, FeedMetrics};
pub use handler::{BlockHandler, HandlerRegistry, OperationHandler};
pub use ledger::{BlockStream, LedgerClient};
pub use logging::{init_tracing, LogConfig};
pub use memory::MemoryLedger;
pub use retry::{RetryConfig, RetryPolicy};
pub use types::{Block, CustomJsonOperation, FeedPhase, Operation, OperationContext, Transaction};
