//! Run lifecycle state, metrics and final outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::RunId;
use crate::tools::ToolCall;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Streaming,
    AwaitingApproval,
    Resuming,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::AwaitingApproval)
    }

    pub fn status(&self) -> Option<RunStatus> {
        match self {
            Self::Completed => Some(RunStatus::Completed),
            Self::Failed => Some(RunStatus::Failed),
            Self::Cancelled => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Resuming => "resuming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Failed => RunState::Failed,
            RunStatus::Cancelled => RunState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub chunks: usize,
    pub tool_calls: usize,
    pub auto_approved: usize,
    pub executed: usize,
    pub failed: usize,
    pub denied: usize,
    pub skipped: usize,
    pub approval_rounds: u32,
    pub approval_timeouts: u32,
    pub execution_time_ms: u64,
}

impl RunMetrics {
    pub fn record_execution(&mut self, is_error: bool) {
        self.executed += 1;
        if is_error {
            self.failed += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.executed == 0 {
            return 0.0;
        }
        (self.executed - self.failed) as f64 / self.executed as f64
    }
}

/// Final record of a terminal run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub chunks: Vec<String>,
    pub calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub metrics: RunMetrics,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RunOutcome {
    /// Streamed output joined in arrival order.
    pub fn text(&self) -> String {
        self.chunks.concat()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::AwaitingApproval.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert_eq!(RunState::Failed.status(), Some(RunStatus::Failed));
        assert_eq!(RunState::Resuming.status(), None);
        assert_eq!(RunState::from(RunStatus::Completed), RunState::Completed);
    }

    #[test]
    fn test_metrics_success_rate() {
        let mut metrics = RunMetrics::default();
        assert_eq!(metrics.success_rate(), 0.0);
        metrics.record_execution(false);
        metrics.record_execution(true);
        assert_eq!(metrics.executed, 2);
        assert_eq!(metrics.failed, 1);
        assert!((metrics.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&RunState::AwaitingApproval).unwrap();
        assert_eq!(json, "\"awaiting_approval\"");
        assert_eq!(RunState::AwaitingApproval.to_string(), "awaiting_approval");
    }
}
