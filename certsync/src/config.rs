//! Client configuration.

use crate::error::{CoreError, CoreResult};
use certsync_types::FetchStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Strategy used for signed-in callers that don't ask for one.
    /// Anonymous callers always default to `query`.
    pub default_strategy: Option<FetchStrategy>,
    /// Interval between background refreshes (ms).
    pub poll_interval_ms: u64,
    /// Prefix for log lines.
    pub log_label: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_strategy: None,
            poll_interval_ms: 30_000,
            log_label: "certsync".to_string(),
        }
    }
}

impl ClientConfig {
    /// Parses and validates a JSON configuration. Missing keys keep their
    /// defaults.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values are usable.
    pub fn validate(&self) -> CoreResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(CoreError::Config("poll_interval_ms must be positive".into()));
        }
        if self.log_label.trim().is_empty() {
            return Err(CoreError::Config("log_label must not be empty".into()));
        }
        Ok(())
    }

    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
