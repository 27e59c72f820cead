//! Holds the batch of a paused run and serializes decisions on it.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use super::ApprovalBatch;
use crate::tools::Decision;
use crate::{Error, Result};

/// Decision slot for the current batch of one run.
///
/// Every mutation goes through one mutex, so two racing decisions on the
/// same call cannot both apply.
#[derive(Debug, Default)]
pub struct ApprovalBroker {
    batch: Mutex<Option<ApprovalBatch>>,
    notify: Notify,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<ApprovalBatch>> {
        self.batch.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Installs `batch` as the one awaiting decisions.
    pub fn open(&self, batch: ApprovalBatch) {
        *self.slot() = Some(batch);
        self.notify.notify_waiters();
    }

    /// Removes and returns the batch.
    pub fn close(&self) -> Option<ApprovalBatch> {
        self.slot().take()
    }

    pub fn snapshot(&self) -> Option<ApprovalBatch> {
        self.slot().clone()
    }

    /// Records `decision` for `call_id`.
    ///
    /// Repeating the recorded decision is a no-op. A different one fails with
    /// [`Error::AlreadyDecided`]. Edits must keep the call's kind.
    pub fn record_decision(&self, call_id: &str, decision: Decision) -> Result<()> {
        let mut slot = self.slot();
        let batch = slot
            .as_mut()
            .ok_or_else(|| Error::invalid_state("no batch is awaiting approval"))?;
        let call = batch
            .get_mut(call_id)
            .ok_or_else(|| Error::invalid_state(format!("call '{}' is not in the batch", call_id)))?;

        if decision.is_pending() {
            return Err(Error::invalid_state("a decision cannot be reset to pending"));
        }
        if let Decision::ApprovedWithEdit { params } = &decision
            && params.kind() != call.kind()
        {
            return Err(Error::invalid_state(format!(
                "edit changes kind of '{}' from {} to {}",
                call_id,
                call.kind(),
                params.kind()
            )));
        }

        if !call.decision.is_pending() {
            if call.decision == decision {
                return Ok(());
            }
            return Err(Error::AlreadyDecided {
                call_id: call_id.to_string(),
            });
        }

        tracing::debug!(call_id, decision = ?decision, "Decision recorded");
        call.decision = decision;
        drop(slot);
        self.notify.notify_waiters();
        Ok(())
    }

    fn decide_pending(&self, decision: Decision) -> usize {
        let mut slot = self.slot();
        let Some(batch) = slot.as_mut() else {
            return 0;
        };
        let mut decided = 0;
        for call in batch.calls_mut().filter(|c| c.decision.is_pending()) {
            call.decision = decision.clone();
            decided += 1;
        }
        drop(slot);
        if decided > 0 {
            self.notify.notify_waiters();
        }
        decided
    }

    /// Approves every call that has no decision yet. Returns how many.
    pub fn approve_all(&self) -> usize {
        self.decide_pending(Decision::Approved)
    }

    /// Rejects every call that has no decision yet. Returns how many.
    pub fn reject_all(&self, reason: &str) -> usize {
        let rejected = self.decide_pending(Decision::Rejected);
        tracing::debug!(rejected, reason, "Rejected pending calls");
        rejected
    }

    /// False when no batch is open.
    pub fn is_batch_resolved(&self) -> bool {
        self.slot().as_ref().is_some_and(ApprovalBatch::is_resolved)
    }

    /// Waits until every call has a decision.
    ///
    /// On timeout every still-pending call is marked rejected and
    /// [`Error::ApprovalTimeout`] reports how many were expired.
    pub async fn wait_resolved(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_batch_resolved() {
                return Ok(());
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        if self.is_batch_resolved() {
                            return Ok(());
                        }
                        let unresolved = self.decide_pending(Decision::Rejected);
                        return Err(Error::ApprovalTimeout {
                            timeout: timeout.unwrap_or_default(),
                            unresolved,
                        });
                    }
                }
                None => notified.await,
            }
        }
    }
}
