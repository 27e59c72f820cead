//! Events emitted by the run driver, in transition order.

use serde::{Deserialize, Serialize};

use super::RunStatus;
use crate::approval::ApprovalBatch;
use crate::tools::ToolResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    ChunkAppended {
        text: String,
    },
    ToolDenied {
        call_id: String,
        reason: String,
    },
    ApprovalRequested {
        batch: ApprovalBatch,
    },
    ToolCompleted {
        call_id: String,
        result: ToolResult,
    },
    ToolFailed {
        call_id: String,
        error: String,
    },
    ToolSkipped {
        call_id: String,
    },
    RunEnded {
        status: RunStatus,
    },
}

impl RunEvent {
    /// Id of the tool call the event is about.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolDenied { call_id, .. }
            | Self::ToolCompleted { call_id, .. }
            | Self::ToolFailed { call_id, .. }
            | Self::ToolSkipped { call_id } => Some(call_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunEnded { .. })
    }

    /// Completed or failed event for an executed call.
    pub(crate) fn execution(call_id: impl Into<String>, result: ToolResult) -> Self {
        match result {
            ToolResult::Error(error) => Self::ToolFailed {
                call_id: call_id.into(),
                error,
            },
            result => Self::ToolCompleted {
                call_id: call_id.into(),
                result,
            },
        }
    }
}
