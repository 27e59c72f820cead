//! Limits applied to a single run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
pub(crate) const DEFAULT_MAX_ROUNDS: u32 = 50;

/// Timeouts and round cap for runs of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Upper bound on one tool execution.
    pub tool_timeout: Duration,
    /// How long a batch may wait for decisions. `None` waits forever.
    pub approval_timeout: Option<Duration>,
    /// Resume points (approval pauses and plain yields) allowed before the
    /// run fails.
    pub max_rounds: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            approval_timeout: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.tool_timeout, Duration::from_secs(120));
        assert!(config.approval_timeout.is_none());
        assert_eq!(config.max_rounds, 50);
    }

    #[test]
    fn test_builder() {
        let config = RunConfig::new()
            .tool_timeout(Duration::from_secs(5))
            .approval_timeout(Duration::from_millis(200))
            .max_rounds(3);
        assert_eq!(config.tool_timeout, Duration::from_secs(5));
        assert_eq!(config.approval_timeout, Some(Duration::from_millis(200)));
        assert_eq!(config.max_rounds, 3);
    }
}
