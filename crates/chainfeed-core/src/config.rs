//! Feed configuration and state types.

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::retry::RetryConfig;

/// What to do when a historical block cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum FetchFailurePolicy {
    /// Give up on the height immediately and move on.
    Skip,
    /// Retry up to `max_retries` times with backoff, then skip.
    Retry { max_retries: u32 },
}

impl Default for FetchFailurePolicy {
    fn default() -> Self {
        Self::Retry { max_retries: 3 }
    }
}

/// Configuration for a feed engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// First height to process (usually loaded from the host's own storage).
    #[serde(default = "default_initial_cursor")]
    pub initial_cursor: u64,
    /// Delay between historical block fetches while catching up (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub catch_up_poll_interval_ms: u64,
    /// Namespace prepended to every registered operation id.
    #[serde(default)]
    pub operation_prefix: String,
    /// Settle period between observing a stop request and reporting stopped.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Upper bound on a single block fetch or head query.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default)]
    pub fetch_failure_policy: FetchFailurePolicy,
    /// Backoff for head query and block fetch retries.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Capacity of the status event broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_initial_cursor() -> u64 { 1 }
fn default_poll_interval_ms() -> u64 { 1_000 }
fn default_shutdown_grace_ms() -> u64 { 1_000 }
fn default_fetch_timeout_ms() -> u64 { 30_000 }
fn default_event_channel_capacity() -> usize { 1_024 }

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            initial_cursor: default_initial_cursor(),
            catch_up_poll_interval_ms: default_poll_interval_ms(),
            operation_prefix: String::new(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            fetch_failure_policy: FetchFailurePolicy::default(),
            retry: RetryConfig::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl FeedConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.initial_cursor == 0 {
            return Err(FeedError::Config("initial_cursor must be >= 1".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(FeedError::Config("fetch_timeout_ms must be > 0".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(FeedError::Config("event_channel_capacity must be > 0".into()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(FeedError::Config("retry.multiplier must be >= 1.0".into()));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(FeedError::Config(
                "retry.max_backoff_ms must be >= retry.initial_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle state of a feed engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedState {
    /// Constructed, not yet started.
    Created,
    /// Polling historical blocks up to the chain head.
    CatchingUp,
    /// Consuming the live block stream.
    Streaming,
    /// Terminated; nothing more will be dispatched.
    Stopped,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::CatchingUp => write!(f, "catching-up"),
            Self::Streaming => write!(f, "streaming"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
