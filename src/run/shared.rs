//! Run state shared between the driver task and the handles that query it.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RunMetrics, RunOutcome, RunState, RunStatus};
use crate::approval::{ApprovalBatch, ApprovalBroker};
use crate::session::{RunId, SessionId};
use crate::tools::{Decision, ToolCall};
use crate::{Error, Result};

#[derive(Debug)]
pub(crate) struct RunRecord {
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub chunks: Vec<String>,
    pub calls: Vec<ToolCall>,
    pub failure: Option<String>,
    pub metrics: RunMetrics,
    pub outcome: Option<RunOutcome>,
}

impl Default for RunRecord {
    fn default() -> Self {
        Self {
            state: RunState::default(),
            started_at: Utc::now(),
            chunks: Vec::new(),
            calls: Vec::new(),
            failure: None,
            metrics: RunMetrics::default(),
            outcome: None,
        }
    }
}

impl RunRecord {
    pub fn upsert_call(&mut self, call: &ToolCall) {
        match self.calls.iter_mut().find(|c| c.id == call.id) {
            Some(existing) => *existing = call.clone(),
            None => self.calls.push(call.clone()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct RunShared {
    id: RunId,
    session_id: SessionId,
    record: Mutex<RunRecord>,
    broker: ApprovalBroker,
    cancel: CancellationToken,
}

impl RunShared {
    pub fn new(id: RunId, session_id: SessionId) -> Self {
        Self {
            id,
            session_id,
            record: Mutex::new(RunRecord::default()),
            broker: ApprovalBroker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn broker(&self) -> &ApprovalBroker {
        &self.broker
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn record(&self) -> MutexGuard<'_, RunRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> RunState {
        self.record().state
    }

    /// Moves to `to` unless the run already ended. Returns whether it moved.
    pub fn transition(&self, to: RunState) -> bool {
        let mut record = self.record();
        if record.state.is_terminal() {
            return false;
        }
        debug!(run_id = %self.id, from = %record.state, to = %to, "Run state transition");
        record.state = to;
        true
    }

    pub fn pending_batch(&self) -> Option<ApprovalBatch> {
        let record = self.record();
        if record.state.is_paused() {
            self.broker.snapshot()
        } else {
            None
        }
    }

    fn ensure_paused(&self, record: &RunRecord) -> Result<()> {
        if record.state.is_paused() {
            Ok(())
        } else {
            Err(Error::invalid_state(format!(
                "run {} is {}, not awaiting approval",
                self.id, record.state
            )))
        }
    }

    /// Records a decision while the run is paused.
    ///
    /// The record lock is held across the broker call, so a decision can
    /// never land after the driver moved on to resuming.
    pub fn decide(&self, call_id: &str, decision: Decision) -> Result<()> {
        let record = self.record();
        self.ensure_paused(&record)?;
        self.broker.record_decision(call_id, decision)
    }

    pub fn approve_all(&self) -> Result<usize> {
        let record = self.record();
        self.ensure_paused(&record)?;
        Ok(self.broker.approve_all())
    }

    pub fn reject_all(&self, reason: &str) -> Result<usize> {
        let record = self.record();
        self.ensure_paused(&record)?;
        Ok(self.broker.reject_all(reason))
    }

    /// Trips the run's token and marks it cancelled.
    ///
    /// Runs under the record lock, which the driver also holds while
    /// emitting a chunk, so no chunk can follow a returned cancel.
    pub fn cancel(&self) -> bool {
        let mut record = self.record();
        if record.state.is_terminal() {
            return false;
        }
        self.cancel.cancel();
        debug!(run_id = %self.id, from = %record.state, "Run cancelled");
        record.state = RunState::Cancelled;
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Seals the run. An external cancel wins over the driver's verdict.
    pub fn finish(&self, status: RunStatus, failure: Option<String>) -> RunOutcome {
        let mut record = self.record();
        if let Some(outcome) = &record.outcome {
            return outcome.clone();
        }

        let status = if record.state == RunState::Cancelled {
            RunStatus::Cancelled
        } else {
            status
        };
        record.state = status.into();
        if status == RunStatus::Failed {
            record.failure = failure;
        }

        let outcome = RunOutcome {
            run_id: self.id,
            status,
            chunks: record.chunks.clone(),
            calls: record.calls.clone(),
            failure: record.failure.clone(),
            metrics: record.metrics.clone(),
            started_at: record.started_at,
            ended_at: Utc::now(),
        };
        record.outcome = Some(outcome.clone());
        outcome
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.record().outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolParams;

    fn shared() -> RunShared {
        RunShared::new(RunId::new(), SessionId::new())
    }

    #[test]
    fn test_decide_requires_pause() {
        let run = shared();
        run.transition(RunState::Streaming);
        assert!(matches!(
            run.decide("c1", Decision::Approved),
            Err(Error::InvalidState(_))
        ));

        let mut batch = ApprovalBatch::new(1);
        batch.push(ToolCall::new("c1", ToolParams::delete("a.txt")));
        run.broker().open(batch);
        run.transition(RunState::AwaitingApproval);
        run.decide("c1", Decision::Approved).unwrap();
        assert!(run.pending_batch().unwrap().is_resolved());
    }

    #[test]
    fn test_cancel_is_sticky() {
        let run = shared();
        run.transition(RunState::Streaming);
        assert!(run.cancel());
        assert!(run.is_cancelled());
        assert!(!run.transition(RunState::Streaming));
        assert!(!run.cancel());

        let outcome = run.finish(RunStatus::Completed, None);
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(run.state(), RunState::Cancelled);
    }

    #[test]
    fn test_finish_once() {
        let run = shared();
        let first = run.finish(RunStatus::Failed, Some("reset".into()));
        let second = run.finish(RunStatus::Completed, None);
        assert_eq!(first, second);
        assert_eq!(second.failure.as_deref(), Some("reset"));
    }

    #[test]
    fn test_upsert_call() {
        let mut record = RunRecord::default();
        let mut call = ToolCall::new("c1", ToolParams::read("a"));
        record.upsert_call(&call);
        call.decision = Decision::Approved;
        record.upsert_call(&call);
        assert_eq!(record.calls.len(), 1);
        assert_eq!(record.calls[0].decision, Decision::Approved);
    }
}
