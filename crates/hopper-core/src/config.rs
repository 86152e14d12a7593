//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordering among tasks with equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Earliest `created_at` is served first.
    #[default]
    Fifo,
    /// Newest `created_at` is served first.
    Lifo,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll_interval_ms must be greater than zero")]
    ZeroPollInterval,

    #[error("{0} must not be empty")]
    EmptyName(&'static str),

    #[error("invalid address {0:?}: expected host:port")]
    InvalidAddr(String),
}

/// QueueConfig は facade の動作設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of waiting tasks; 0 = unbounded.
    ///
    /// The check is advisory: concurrent producers may overshoot by the
    /// number of racing enqueues.
    pub max_size: usize,

    /// Re-poll period of `dequeue_wait`, independent of hints.
    pub poll_interval_ms: u64,

    pub tie_break: TieBreak,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            poll_interval_ms: 1_000,
            tie_break: TieBreak::Fifo,
        }
    }
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self {
            max_size: 0,
            ..Self::default()
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Re-poll period, never shorter than 1ms even if `validate` was skipped.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}
