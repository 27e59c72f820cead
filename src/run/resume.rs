//! Turns a resolved approval batch into executions and skips.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::RunEvent;
use super::dispatch::{Dispatched, Dispatcher};
use crate::approval::ApprovalBatch;
use crate::permissions::Classification;
use crate::tools::{Decision, ToolCall, ToolOutcome};

/// What happened to one call of the batch.
#[derive(Debug)]
pub(crate) struct Settled {
    pub call: ToolCall,
    pub event: RunEvent,
    pub outcome: ToolOutcome,
    /// Set when the call actually ran.
    pub elapsed_ms: Option<u64>,
}

enum Plan {
    Skip,
    Deny(String),
    Execute,
}

pub(crate) struct ResumeCoordinator<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> ResumeCoordinator<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Settles every call of a resolved batch.
    ///
    /// Approved calls pass the sandbox and the policy again, edited ones
    /// against their new params. Executions run concurrently; the result
    /// keeps the batch order.
    pub async fn apply(&self, batch: ApprovalBatch) -> Vec<Settled> {
        let round = batch.round;
        let mut calls = batch.into_calls();
        let plans: Vec<Plan> = calls.iter_mut().map(|call| self.plan(call)).collect();

        let executions = calls.iter().zip(&plans).map(|(call, plan)| async move {
            match plan {
                Plan::Execute => Some(self.dispatcher.execute(call).await),
                _ => None,
            }
        });
        let dispatched = join_all(executions).await;

        let settled: Vec<Settled> = calls
            .into_iter()
            .zip(plans)
            .zip(dispatched)
            .map(|((call, plan), dispatched)| settle(call, plan, dispatched))
            .collect();

        info!(
            round,
            calls = settled.len(),
            executed = settled.iter().filter(|s| s.elapsed_ms.is_some()).count(),
            "Approval batch settled"
        );
        settled
    }

    fn plan(&self, call: &mut ToolCall) -> Plan {
        let classification = match &call.decision {
            Decision::Rejected => return Plan::Skip,
            // Still pending means the broker was closed early; treat as rejected.
            Decision::Pending => {
                warn!(call_id = %call.id, "Undecided call in resolved batch");
                call.decision = Decision::Rejected;
                return Plan::Skip;
            }
            Decision::ApprovedWithEdit { .. } => {
                call.resolved_paths.clear();
                self.dispatcher.admit(call)
            }
            Decision::Approved => self.dispatcher.reclassify(call),
        };

        match classification {
            Classification::Deny(reason) => {
                debug!(call_id = %call.id, reason = %reason, "Approved call denied on resume");
                Plan::Deny(reason)
            }
            Classification::AutoApprove | Classification::RequireApproval => Plan::Execute,
        }
    }
}

fn settle(mut call: ToolCall, plan: Plan, dispatched: Option<Dispatched>) -> Settled {
    let id = call.id.clone();
    match (plan, dispatched) {
        (Plan::Execute, Some(Dispatched::Ran { result, elapsed_ms })) => {
            call.result = Some(result.clone());
            Settled {
                call,
                event: RunEvent::execution(&id, result.clone()),
                outcome: ToolOutcome::completed(&id, result),
                elapsed_ms: Some(elapsed_ms),
            }
        }
        (Plan::Deny(reason), _) | (Plan::Execute, Some(Dispatched::Refused(reason))) => {
            denied(call, reason)
        }
        (Plan::Execute, None) => denied(call, "call was not dispatched".to_string()),
        (Plan::Skip, _) => Settled {
            event: RunEvent::ToolSkipped {
                call_id: id.clone(),
            },
            outcome: ToolOutcome::skipped(&id),
            call,
            elapsed_ms: None,
        },
    }
}

fn denied(mut call: ToolCall, reason: String) -> Settled {
    let id = call.id.clone();
    call.requirement = Some(Classification::Deny(reason.clone()));
    Settled {
        event: RunEvent::ToolDenied {
            call_id: id.clone(),
            reason: reason.clone(),
        },
        outcome: ToolOutcome::denied(&id, reason),
        call,
        elapsed_ms: None,
    }
}
