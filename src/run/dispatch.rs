//! Admission and execution of single tool calls.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use crate::config::RunConfig;
use crate::observability;
use crate::permissions::{Classification, PermissionPolicy};
use crate::security::{PathBoundary, SecurityError};
use crate::tools::{ExecutionContext, ToolCall, ToolExecutor, ToolParams, ToolResult};
use crate::Error;

/// Result of running one approved call.
#[derive(Debug)]
pub(crate) enum Dispatched {
    Ran { result: ToolResult, elapsed_ms: u64 },
    /// Refused at the last moment, e.g. a path now resolves elsewhere.
    Refused(String),
}

#[derive(Clone)]
pub(crate) struct Dispatcher {
    boundary: PathBoundary,
    policy: Arc<PermissionPolicy>,
    executor: Arc<dyn ToolExecutor>,
    config: RunConfig,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        boundary: PathBoundary,
        policy: Arc<PermissionPolicy>,
        executor: Arc<dyn ToolExecutor>,
        config: RunConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            boundary,
            policy,
            executor,
            config,
            cancel,
        }
    }

    fn resolve_paths(&self, params: &ToolParams) -> Result<Vec<PathBuf>, SecurityError> {
        params
            .paths()
            .into_iter()
            .map(|path| self.boundary.resolve(path))
            .collect()
    }

    /// Resolves the call's paths and classifies it.
    ///
    /// A path outside the sandbox is a denial, never an error.
    pub fn admit(&self, call: &mut ToolCall) -> Classification {
        let classification = match self.resolve_paths(call.effective_params()) {
            Ok(paths) => {
                call.resolved_paths = paths;
                self.policy.classify(call)
            }
            Err(e) => {
                if e.is_out_of_boundary() {
                    warn!(call_id = %call.id, kind = %call.kind(), error = %e, "Tool call outside sandbox");
                } else {
                    warn!(call_id = %call.id, kind = %call.kind(), error = %e, "Tool call path rejected");
                }
                Classification::Deny(e.to_string())
            }
        };
        call.requirement = Some(classification.clone());
        classification
    }

    /// Classifies again without touching the recorded resolution.
    pub fn reclassify(&self, call: &mut ToolCall) -> Classification {
        let classification = self.policy.classify(call);
        call.requirement = Some(classification.clone());
        classification
    }

    /// Runs an admitted call.
    ///
    /// Paths are resolved once more and must land where they did at
    /// admission. The call's own deadline is enforced here, the run's
    /// cancellation only through the child token.
    pub async fn execute(&self, call: &ToolCall) -> Dispatched {
        let params = call.effective_params();
        let raw = params.paths();
        if raw.len() != call.resolved_paths.len() {
            warn!(call_id = %call.id, "Resolved paths do not match call params");
            return Dispatched::Refused("path resolution is stale".into());
        }
        for (path, expected) in raw.iter().zip(&call.resolved_paths) {
            if let Err(e) = self.boundary.revalidate(path, expected) {
                warn!(call_id = %call.id, path, error = %e, "Path changed since admission");
                return Dispatched::Refused(Error::from(e).to_string());
            }
        }

        let token = self.cancel.child_token();
        let timeout = self.config.tool_timeout;
        let context = ExecutionContext::new(self.boundary.clone(), token.clone(), timeout);

        let span = observability::tool_span(&call.id, params.kind());
        let execution = self.executor.execute(params, &context);
        debug!(call_id = %call.id, kind = %params.kind(), "Executing tool call");
        let started = Instant::now();
        let result =
            match tokio::time::timeout(timeout, execution.instrument(span.clone())).await {
                Ok(result) => result,
                Err(_) => {
                    token.cancel();
                    warn!(call_id = %call.id, timeout_secs = timeout.as_secs(), "Tool call timed out");
                    ToolResult::error(
                        Error::ToolExecution(format!(
                            "timed out after {} seconds",
                            timeout.as_secs()
                        ))
                        .to_string(),
                    )
                }
            };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        observability::record_tool_result(&span, result.is_error(), elapsed_ms);

        if result.is_error() {
            debug!(call_id = %call.id, elapsed_ms, "Tool call failed");
        }
        Dispatched::Ran { result, elapsed_ms }
    }
}
