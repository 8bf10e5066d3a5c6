//! `tracing` subscriber setup for hosts embedding a feed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::FeedError;

/// Which feed logs to emit and in what format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level applied to every target without an override.
    #[serde(default = "default_level")]
    pub level: String,
    /// Per-crate levels, e.g. `chainfeed-steem = "trace"`.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// One JSON object per event instead of plain text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directives for this config.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.components
                    .iter()
                    .map(|(target, level)| format!("{}={level}", target.replace('-', "_"))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the process-wide subscriber.
///
/// Fails with [`FeedError::Config`] on a bad directive and with
/// [`FeedError::Other`] if a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), FeedError> {
    let filter = EnvFilter::try_new(config.directives())
        .map_err(|e| FeedError::Config(format!("log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| FeedError::Other(format!("tracing subscriber: {e}")))
}
