//! Tool calls and the built-in file, search, shell and git operations.

mod call;
mod executor;
mod file;
mod git;
mod search;
mod shell;

pub use call::{Decision, Disposition, ToolCall, ToolKind, ToolOutcome, ToolParams, ToolResult};
pub use executor::{BuiltinExecutor, ExecutionContext, ToolExecutor};
