//! Interruptible run loop.
//!
//! A run streams one model turn, gates each requested tool call through the
//! sandbox and the permission policy, pauses on batches that need a human
//! decision and resumes with the aggregated results.

mod controller;
mod dispatch;
mod events;
mod resume;
mod shared;
mod state;

pub use controller::RunHandle;
pub use events::RunEvent;
pub use state::{RunMetrics, RunOutcome, RunState, RunStatus};

pub(crate) use controller::RunController;
pub(crate) use dispatch::Dispatcher;
pub(crate) use shared::RunShared;
