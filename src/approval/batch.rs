//! The calls awaiting a decision at one resume point.

use serde::{Deserialize, Serialize};

use crate::tools::{Decision, ToolCall};

/// Calls that need approval, in the order the model requested them.
///
/// Resumable once no call is [`Decision::Pending`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalBatch {
    /// 1-based pause/resume round of the run.
    pub round: u32,
    calls: Vec<ToolCall>,
}

impl ApprovalBatch {
    pub fn new(round: u32) -> Self {
        Self {
            round,
            calls: Vec::new(),
        }
    }

    pub fn push(&mut self, call: ToolCall) {
        self.calls.push(call);
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn get(&self, call_id: &str) -> Option<&ToolCall> {
        self.calls.iter().find(|c| c.id == call_id)
    }

    pub(crate) fn get_mut(&mut self, call_id: &str) -> Option<&mut ToolCall> {
        self.calls.iter_mut().find(|c| c.id == call_id)
    }

    pub(crate) fn calls_mut(&mut self) -> impl Iterator<Item = &mut ToolCall> {
        self.calls.iter_mut()
    }

    pub fn is_resolved(&self) -> bool {
        self.calls.iter().all(|c| !c.decision.is_pending())
    }

    pub fn pending(&self) -> impl Iterator<Item = &ToolCall> {
        self.calls.iter().filter(|c| c.decision.is_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn decision(&self, call_id: &str) -> Option<&Decision> {
        self.get(call_id).map(|c| &c.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolParams;

    #[test]
    fn test_resolution() {
        let mut batch = ApprovalBatch::new(1);
        assert!(batch.is_resolved());

        batch.push(ToolCall::new("a", ToolParams::write("a.txt", "x")));
        batch.push(ToolCall::new("b", ToolParams::delete("b.txt")));
        assert!(!batch.is_resolved());
        assert_eq!(batch.pending_count(), 2);

        if let Some(call) = batch.get_mut("a") {
            call.decision = Decision::Approved;
        }
        assert_eq!(batch.pending().map(|c| c.id.as_str()).collect::<Vec<_>>(), ["b"]);

        if let Some(call) = batch.get_mut("b") {
            call.decision = Decision::Rejected;
        }
        assert!(batch.is_resolved());
        assert_eq!(batch.decision("b"), Some(&Decision::Rejected));
    }
}
