//! Status events and metrics emitted by the engine for observability.

use crate::config::FeedState;
use crate::dispatcher::DispatchReport;

/// Status emitted by the engine on its broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The lifecycle state changed.
    StateChanged(FeedState),
    /// A historical block was dispatched while catching up.
    CatchUpProgress { height: u64, head: u64 },
    /// A historical block could not be fetched and was given up on.
    BlockSkipped { height: u64, reason: String },
    /// A streamed block was older than the cursor and dropped.
    BlockDiscarded { height: u64, cursor: u64 },
    /// The stream yielded an error item; consumption continues.
    StreamError(String),
    /// The block stream ended. No reconnection is attempted.
    StreamEnded,
}

/// Metrics snapshot for a feed engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMetrics {
    pub blocks_processed: u64,
    pub operations_dispatched: u64,
    pub decode_errors: u64,
    pub handler_errors: u64,
    pub blocks_skipped: u64,
    pub blocks_discarded: u64,
}

impl FeedMetrics {
    pub(crate) fn record(&mut self, report: &DispatchReport) {
        self.blocks_processed += 1;
        self.operations_dispatched += report.handled;
        self.decode_errors += report.decode_errors;
        self.handler_errors += report.handler_errors;
    }
}
