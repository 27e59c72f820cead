//! Human-in-the-loop approval of tool calls.

mod approver;
mod batch;
mod broker;

pub use approver::{Approver, AutoApprover, ScriptedApprover};
pub use batch::ApprovalBatch;
pub use broker::ApprovalBroker;
