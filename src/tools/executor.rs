//! Execution seam between the run loop and the actions it dispatches.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ToolParams, ToolResult, file, git, search, shell};
use crate::security::{PathBoundary, SecurityError};

pub(crate) const MAX_OUTPUT_CHARS: usize = 30_000;

/// Everything an execution may touch: the boundary, its deadline, and the
/// token that is tripped on cancel.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    boundary: PathBoundary,
    cancel: CancellationToken,
    timeout: Duration,
}

impl ExecutionContext {
    pub fn new(boundary: PathBoundary, cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            boundary,
            cancel,
            timeout,
        }
    }

    pub fn boundary(&self) -> &PathBoundary {
        &self.boundary
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf, SecurityError> {
        self.boundary.resolve(path)
    }
}

/// Performs one approved action.
///
/// Failures are reported as [`ToolResult::Error`] so the model sees them;
/// an implementation never panics on bad input.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, params: &ToolParams, context: &ExecutionContext) -> ToolResult;
}

/// File, search, shell and git operations confined to the boundary root.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinExecutor;

impl BuiltinExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolExecutor for BuiltinExecutor {
    async fn execute(&self, params: &ToolParams, context: &ExecutionContext) -> ToolResult {
        if context.is_cancelled() {
            return ToolResult::error("Cancelled before execution");
        }

        match params {
            ToolParams::Read {
                path,
                line_start,
                line_end,
            } => file::read(context, path, *line_start, *line_end).await,
            ToolParams::Write {
                path,
                content,
                create_new,
            } => file::write(context, path, content, *create_new).await,
            ToolParams::Edit {
                path,
                search,
                replace,
                occurrence,
            } => file::edit(context, path, search, replace, *occurrence).await,
            ToolParams::Delete { path } => file::delete(context, path).await,
            ToolParams::Grep {
                pattern,
                path,
                include,
                exclude,
                case_sensitive,
                max_results,
            } => {
                search::grep(
                    context,
                    pattern,
                    path,
                    include.as_deref(),
                    exclude.as_deref(),
                    *case_sensitive,
                    *max_results,
                )
                .await
            }
            ToolParams::Glob {
                pattern,
                path,
                max_results,
            } => search::find(context, pattern, path, *max_results).await,
            ToolParams::Execute {
                command,
                timeout_secs,
            } => {
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .map_or(context.timeout(), |t| t.min(context.timeout()));
                shell::run(context, command, timeout).await
            }
            ToolParams::GitStatus => git::status(context).await,
            ToolParams::GitDiff { staged, file } => {
                git::diff(context, *staged, file.as_deref()).await
            }
            ToolParams::GitLog { count, file } => git::log(context, *count, file.as_deref()).await,
            ToolParams::GitCommit {
                message,
                files,
                add_all,
            } => git::commit(context, message, files, *add_all).await,
        }
    }
}

/// Cuts `output` at the output limit, on a char boundary.
pub(crate) fn truncate_output(mut output: String) -> String {
    if let Some((idx, _)) = output.char_indices().nth(MAX_OUTPUT_CHARS) {
        output.truncate(idx);
        output.push_str("\n... (output truncated)");
    }
    output
}
