//! Sources of decisions for a paused run.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::ApprovalBatch;
use crate::tools::Decision;

/// Answers an approval request, e.g. a UI prompt or a script.
///
/// Calls left out of the answer stay pending, and the run keeps waiting for
/// them until the approval timeout (if any) rejects them.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn review(&self, batch: &ApprovalBatch) -> Vec<(String, Decision)>;
}

/// Approves or rejects everything.
#[derive(Clone, Debug)]
pub struct AutoApprover {
    decision: Decision,
}

impl AutoApprover {
    pub fn approve_all() -> Self {
        Self {
            decision: Decision::Approved,
        }
    }

    pub fn reject_all() -> Self {
        Self {
            decision: Decision::Rejected,
        }
    }
}

#[async_trait]
impl Approver for AutoApprover {
    async fn review(&self, batch: &ApprovalBatch) -> Vec<(String, Decision)> {
        batch
            .pending()
            .map(|call| (call.id.clone(), self.decision.clone()))
            .collect()
    }
}

/// Per-call decisions with an optional fallback for unlisted calls.
#[derive(Clone, Debug, Default)]
pub struct ScriptedApprover {
    decisions: HashMap<String, Decision>,
    fallback: Option<Decision>,
    delay: Option<Duration>,
}

impl ScriptedApprover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decide(mut self, call_id: impl Into<String>, decision: Decision) -> Self {
        self.decisions.insert(call_id.into(), decision);
        self
    }

    pub fn approve(self, call_id: impl Into<String>) -> Self {
        self.decide(call_id, Decision::Approved)
    }

    pub fn reject(self, call_id: impl Into<String>) -> Self {
        self.decide(call_id, Decision::Rejected)
    }

    pub fn fallback(mut self, decision: Decision) -> Self {
        self.fallback = Some(decision);
        self
    }

    /// Waits this long before answering, like a human would.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Approver for ScriptedApprover {
    async fn review(&self, batch: &ApprovalBatch) -> Vec<(String, Decision)> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        batch
            .pending()
            .filter_map(|call| {
                self.decisions
                    .get(&call.id)
                    .or(self.fallback.as_ref())
                    .map(|d| (call.id.clone(), d.clone()))
            })
            .collect()
    }
}
