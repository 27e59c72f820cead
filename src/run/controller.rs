//! The run driver and the handle callers hold on to.
//!
//! Each run gets one spawned driver task. It owns the model turn, moves the
//! run through its states and is the only producer of [`RunEvent`]s. Callers
//! observe and steer the run through a [`RunHandle`] (or the owning session),
//! which only touches the shared record and the approval broker.

use std::collections::HashSet;
use std::sync::Arc;

use futures::{Stream, stream};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, warn};

use super::dispatch::{Dispatched, Dispatcher};
use super::resume::ResumeCoordinator;
use super::shared::RunShared;
use super::{RunEvent, RunOutcome, RunState, RunStatus};
use crate::approval::{ApprovalBatch, Approver};
use crate::config::RunConfig;
use crate::observability;
use crate::permissions::Classification;
use crate::provider::{ModelProvider, ModelTurn, TurnEvent};
use crate::session::RunId;
use crate::tools::{Decision, ToolCall, ToolOutcome};
use crate::{Error, Result};

/// How a streaming segment stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SegmentEnd {
    AwaitingResults,
    EndTurn,
}

/// Early exit of the driver on cancellation.
struct Cancelled;

type Step<T> = std::result::Result<T, Cancelled>;

pub(crate) struct RunController {
    shared: Arc<RunShared>,
    provider: Arc<dyn ModelProvider>,
    dispatcher: Dispatcher,
    config: RunConfig,
    events: mpsc::UnboundedSender<RunEvent>,
    seen: HashSet<String>,
}

impl RunController {
    pub fn new(
        shared: Arc<RunShared>,
        provider: Arc<dyn ModelProvider>,
        dispatcher: Dispatcher,
        config: RunConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            shared,
            provider,
            dispatcher,
            config,
            events,
            seen: HashSet::new(),
        };
        (controller, rx)
    }

    /// Spawns the driver onto the current runtime.
    pub fn spawn(
        shared: Arc<RunShared>,
        provider: Arc<dyn ModelProvider>,
        dispatcher: Dispatcher,
        config: RunConfig,
        prompt: String,
    ) -> RunHandle {
        let span = observability::run_span(shared.session_id(), shared.id());
        let (controller, rx) = Self::new(Arc::clone(&shared), provider, dispatcher, config);
        tokio::spawn(controller.run(prompt).instrument(span));
        RunHandle::new(shared, rx)
    }

    async fn run(mut self, prompt: String) {
        let (status, failure) = match self.drive(&prompt).await {
            Ok(Ok(status)) => (status, None),
            Ok(Err(Cancelled)) => (RunStatus::Cancelled, None),
            Err(e) => {
                error!(error = %e, "Run failed");
                (RunStatus::Failed, Some(e.to_string()))
            }
        };

        let outcome = self.shared.finish(status, failure);
        self.shared.broker().close();
        tracing::Span::current().record("status", tracing::field::debug(outcome.status));
        info!(
            status = ?outcome.status,
            chunks = outcome.metrics.chunks,
            tool_calls = outcome.metrics.tool_calls,
            rounds = outcome.metrics.approval_rounds,
            "Run ended"
        );
        self.emit(RunEvent::RunEnded {
            status: outcome.status,
        });
    }

    fn emit(&self, event: RunEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    async fn drive(&mut self, prompt: &str) -> Result<Step<RunStatus>> {
        let cancel = self.shared.cancel_token().clone();
        if !self.shared.transition(RunState::Streaming) {
            return Ok(Err(Cancelled));
        }

        let mut turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Err(Cancelled)),
            opened = self.provider.open(prompt) => opened?,
        };

        // Every resume point counts, paused or not.
        let mut rounds = 0u32;
        let mut approvals = 0u32;
        loop {
            let mut batch = ApprovalBatch::new(approvals + 1);
            let mut outcomes = Vec::new();

            let end = match self.stream_segment(turn.as_mut(), &mut batch, &mut outcomes).await? {
                Ok(end) => end,
                Err(Cancelled) => return Ok(Err(Cancelled)),
            };

            if batch.is_empty() && end == SegmentEnd::EndTurn {
                return Ok(Ok(RunStatus::Completed));
            }

            rounds += 1;
            if rounds > self.config.max_rounds {
                return Err(Error::InvariantViolation(format!(
                    "exceeded round limit of {}",
                    self.config.max_rounds
                )));
            }

            if batch.is_empty() {
                debug!(results = outcomes.len(), "Yield without approvals, continuing");
                if let Err(Cancelled) = self.continue_turn(turn.as_mut(), outcomes).await? {
                    return Ok(Err(Cancelled));
                }
                continue;
            }
            approvals += 1;

            match self.await_approval(batch).await? {
                Ok(settled) => outcomes.extend(settled),
                Err(Cancelled) => return Ok(Err(Cancelled)),
            }
            if self.shared.is_cancelled() || !self.shared.transition(RunState::Streaming) {
                return Ok(Err(Cancelled));
            }

            if let Err(Cancelled) = self.continue_turn(turn.as_mut(), outcomes).await? {
                return Ok(Err(Cancelled));
            }
            if end == SegmentEnd::EndTurn {
                return Ok(Ok(RunStatus::Completed));
            }
        }
    }

    /// Reads turn events until the model yields or ends its turn.
    async fn stream_segment(
        &mut self,
        turn: &mut dyn ModelTurn,
        batch: &mut ApprovalBatch,
        outcomes: &mut Vec<ToolOutcome>,
    ) -> Result<Step<SegmentEnd>> {
        let cancel = self.shared.cancel_token().clone();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Err(Cancelled)),
                event = turn.next_event() => event?,
            };

            match event {
                Some(TurnEvent::Chunk(text)) => {
                    if !self.append_chunk(text) {
                        return Ok(Err(Cancelled));
                    }
                }
                Some(TurnEvent::ToolRequest { id, params }) => {
                    self.handle_request(ToolCall::new(id, params), batch, outcomes)
                        .await;
                }
                Some(TurnEvent::AwaitingResults) => return Ok(Ok(SegmentEnd::AwaitingResults)),
                Some(TurnEvent::EndTurn) => return Ok(Ok(SegmentEnd::EndTurn)),
                None => {
                    return Err(Error::Transport(
                        "stream closed without end of turn".into(),
                    ));
                }
            }
        }
    }

    /// Appends and emits under the record lock, so a concurrent cancel either
    /// lands before (and the chunk is dropped) or after the event.
    fn append_chunk(&self, text: String) -> bool {
        let mut record = self.shared.record();
        if self.shared.is_cancelled() {
            return false;
        }
        record.chunks.push(text.clone());
        record.metrics.chunks += 1;
        self.emit(RunEvent::ChunkAppended { text });
        true
    }

    fn deny(&self, mut call: ToolCall, reason: String, outcomes: &mut Vec<ToolOutcome>) {
        warn!(call_id = %call.id, kind = %call.kind(), reason = %reason, "Tool call denied");
        call.decision = Decision::Rejected;
        call.requirement = Some(Classification::Deny(reason.clone()));
        {
            let mut record = self.shared.record();
            record.metrics.denied += 1;
            record.upsert_call(&call);
        }
        outcomes.push(ToolOutcome::denied(&call.id, reason.clone()));
        self.emit(RunEvent::ToolDenied {
            call_id: call.id,
            reason,
        });
    }

    async fn handle_request(
        &mut self,
        mut call: ToolCall,
        batch: &mut ApprovalBatch,
        outcomes: &mut Vec<ToolOutcome>,
    ) {
        if !self.seen.insert(call.id.clone()) {
            let reason = format!("duplicate tool call id {}", call.id);
            warn!(call_id = %call.id, "Duplicate tool call id");
            self.shared.record().metrics.denied += 1;
            outcomes.push(ToolOutcome::denied(&call.id, reason.clone()));
            self.emit(RunEvent::ToolDenied {
                call_id: call.id,
                reason,
            });
            return;
        }

        self.shared.record().metrics.tool_calls += 1;
        match self.dispatcher.admit(&mut call) {
            Classification::Deny(reason) => self.deny(call, reason, outcomes),
            Classification::RequireApproval => {
                debug!(call_id = %call.id, kind = %call.kind(), "Tool call requires approval");
                self.shared.record().upsert_call(&call);
                batch.push(call);
            }
            Classification::AutoApprove => {
                call.decision = Decision::Approved;
                debug!(call_id = %call.id, kind = %call.kind(), "Tool call auto-approved");
                match self.dispatcher.execute(&call).await {
                    Dispatched::Refused(reason) => self.deny(call, reason, outcomes),
                    Dispatched::Ran { result, elapsed_ms } => {
                        call.result = Some(result.clone());
                        {
                            let mut record = self.shared.record();
                            record.metrics.auto_approved += 1;
                            record.metrics.record_execution(result.is_error());
                            record.metrics.execution_time_ms += elapsed_ms;
                            record.upsert_call(&call);
                        }
                        outcomes.push(ToolOutcome::completed(&call.id, result.clone()));
                        self.emit(RunEvent::execution(call.id, result));
                    }
                }
            }
        }
    }

    /// Pauses on the batch, then settles it once every call is decided.
    async fn await_approval(&mut self, batch: ApprovalBatch) -> Result<Step<Vec<ToolOutcome>>> {
        let round = batch.round;
        let broker = self.shared.broker();
        broker.open(batch.clone());
        if !self.shared.transition(RunState::AwaitingApproval) {
            broker.close();
            return Ok(Err(Cancelled));
        }
        self.shared.record().metrics.approval_rounds += 1;
        info!(round, calls = batch.len(), "Awaiting approval");
        self.emit(RunEvent::ApprovalRequested { batch });

        let cancel = self.shared.cancel_token().clone();
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Err(Cancelled)),
            waited = broker.wait_resolved(self.config.approval_timeout) => waited,
        };
        match waited {
            Ok(()) => {}
            Err(Error::ApprovalTimeout {
                timeout,
                unresolved,
            }) => {
                warn!(
                    round,
                    unresolved,
                    timeout_secs = timeout.as_secs_f64(),
                    "Approval timed out, rejecting undecided calls"
                );
                self.shared.record().metrics.approval_timeouts += 1;
            }
            Err(e) => return Err(e),
        }

        if !self.shared.transition(RunState::Resuming) {
            return Ok(Err(Cancelled));
        }
        let resolved = broker.close().ok_or_else(|| {
            Error::InvariantViolation(format!("approval batch {round} vanished before resume"))
        })?;

        let settled = ResumeCoordinator::new(&self.dispatcher)
            .apply(resolved)
            .await;

        let mut outcomes = Vec::with_capacity(settled.len());
        for item in settled {
            {
                let mut record = self.shared.record();
                match &item.event {
                    RunEvent::ToolSkipped { .. } => record.metrics.skipped += 1,
                    RunEvent::ToolDenied { .. } => record.metrics.denied += 1,
                    _ => {}
                }
                if let Some(elapsed_ms) = item.elapsed_ms {
                    record.metrics.record_execution(item.outcome.result.is_error());
                    record.metrics.execution_time_ms += elapsed_ms;
                }
                record.upsert_call(&item.call);
            }
            if let RunEvent::ToolDenied { call_id, reason } = &item.event {
                warn!(call_id = %call_id, reason = %reason, "Approved call denied on resume");
            }
            self.emit(item.event);
            outcomes.push(item.outcome);
        }
        Ok(Ok(outcomes))
    }

    async fn continue_turn(
        &mut self,
        turn: &mut dyn ModelTurn,
        outcomes: Vec<ToolOutcome>,
    ) -> Result<Step<()>> {
        let cancel = self.shared.cancel_token().clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(Err(Cancelled)),
            continued = turn.continue_with(outcomes) => {
                continued?;
                Ok(Ok(()))
            }
        }
    }
}

/// Caller's end of a run: its events plus control and queries.
///
/// Dropping the handle does not stop the run.
pub struct RunHandle {
    shared: Arc<RunShared>,
    events: mpsc::UnboundedReceiver<RunEvent>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.shared.id())
            .field("state", &self.shared.state())
            .finish()
    }
}

impl RunHandle {
    pub(crate) fn new(shared: Arc<RunShared>, events: mpsc::UnboundedReceiver<RunEvent>) -> Self {
        Self { shared, events }
    }

    pub fn id(&self) -> RunId {
        self.shared.id()
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    /// Snapshot of the batch while the run awaits approval.
    pub fn pending_batch(&self) -> Option<ApprovalBatch> {
        self.shared.pending_batch()
    }

    /// Records a decision for one call of the pending batch.
    pub fn decide(&self, call_id: &str, decision: Decision) -> Result<()> {
        self.shared.decide(call_id, decision)
    }

    pub fn approve_all(&self) -> Result<usize> {
        self.shared.approve_all()
    }

    pub fn reject_all(&self, reason: &str) -> Result<usize> {
        self.shared.reject_all(reason)
    }

    /// Cancels the run. Returns false if it had already ended.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Final outcome, once the run is terminal.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.shared.outcome()
    }

    /// Next event, or `None` after `RunEnded` has been delivered.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Events as a stream. Control stays available through the session.
    pub fn into_stream(self) -> impl Stream<Item = RunEvent> + Send + 'static {
        stream::unfold(self.events, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
    }

    /// Waits for the run to end, discarding undelivered events.
    pub async fn wait(mut self) -> Result<RunOutcome> {
        while self.events.recv().await.is_some() {}
        self.finished()
    }

    /// Runs to completion, answering every approval request via `approver`.
    ///
    /// Decisions the run no longer accepts, e.g. after a timeout or cancel,
    /// are dropped.
    pub async fn drive(mut self, approver: &dyn Approver) -> Result<(Vec<RunEvent>, RunOutcome)> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            if let RunEvent::ApprovalRequested { batch } = &event {
                for (call_id, decision) in approver.review(batch).await {
                    match self.shared.decide(&call_id, decision) {
                        Ok(()) => {}
                        Err(e @ (Error::InvalidState(_) | Error::AlreadyDecided { .. })) => {
                            debug!(call_id = %call_id, error = %e, "Decision not applied");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            events.push(event);
        }
        Ok((events, self.finished()?))
    }

    fn finished(&self) -> Result<RunOutcome> {
        self.shared.outcome().ok_or_else(|| {
            Error::InvariantViolation(format!(
                "run {} closed its event stream without an outcome",
                self.shared.id()
            ))
        })
    }
}
