//! # agent-gate
//!
//! Interruptible streaming run loop with human-in-the-loop approval of tool
//! calls and a path sandbox that keeps every filesystem action inside the
//! session's working directory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agent_gate::approval::AutoApprover;
//! use agent_gate::provider::{ScriptedProvider, ScriptedTurn};
//! use agent_gate::tools::ToolParams;
//! use agent_gate::{PermissionPolicy, RunConfig, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), agent_gate::Error> {
//!     let provider = ScriptedProvider::new(vec![
//!         ScriptedTurn::new()
//!             .chunk("Writing the file. ")
//!             .tool("call_1", ToolParams::write("src/a.ts", "export {}"))
//!             .awaiting_results(),
//!         ScriptedTurn::new().chunk("Done.").end_turn(),
//!     ]);
//!
//!     let session = Session::builder()
//!         .working_dir("./project")
//!         .policy(PermissionPolicy::default())
//!         .run_config(RunConfig::default())
//!         .provider(Arc::new(provider))
//!         .build()?;
//!
//!     let handle = session.submit("add an empty module")?;
//!     let (events, outcome) = handle.drive(&AutoApprover::approve_all()).await?;
//!     println!("{} events, ended {:?}", events.len(), outcome.status);
//!     Ok(())
//! }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

pub mod approval;
pub mod config;
pub mod observability;
pub mod permissions;
pub mod provider;
pub mod run;
pub mod security;
pub mod session;
pub mod tools;

pub use approval::{ApprovalBatch, ApprovalBroker, Approver, AutoApprover, ScriptedApprover};
pub use config::{ConfigError, RunConfig, Settings, SettingsLoader};
pub use permissions::{Classification, PatternRule, PermissionMode, PermissionPolicy};
pub use provider::{ModelProvider, ModelTurn, ScriptedProvider, ScriptedTurn, TurnEvent};
pub use run::{RunEvent, RunHandle, RunMetrics, RunOutcome, RunState, RunStatus};
pub use security::{PathBoundary, SecurityError};
pub use session::{RunId, Session, SessionBuilder, SessionId, SessionManager};
pub use tools::{
    BuiltinExecutor, Decision, Disposition, ExecutionContext, ToolCall, ToolExecutor, ToolKind,
    ToolOutcome, ToolParams, ToolResult,
};

use std::path::PathBuf;

/// Error type for agent-gate operations.
///
/// Only [`Error::Transport`] and [`Error::InvariantViolation`] end a run as
/// failed; everything else is reported and the run carries on.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Resolved path lies outside the session boundary.
    #[error("Path {requested} is outside the sandbox boundary {boundary}")]
    OutOfBoundary {
        requested: PathBuf,
        boundary: PathBuf,
    },

    /// Call matched the blocklist or the active mode forbids it.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// API misuse, e.g. deciding on a run that is not awaiting approval.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A different decision was already recorded for this call.
    #[error("Tool call '{call_id}' already has a decision")]
    AlreadyDecided { call_id: String },

    /// The underlying action failed.
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Approval batch was not resolved in time.
    #[error("Approval timed out after {:.1}s with {unresolved} undecided call(s)", timeout.as_secs_f64())]
    ApprovalTimeout {
        timeout: std::time::Duration,
        unresolved: usize,
    },

    /// Streaming connection to the model broke.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// An internal invariant of the run loop was violated.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The session already has a live run.
    #[error("Run {run_id} is still in progress")]
    RunInProgress { run_id: session::RunId },

    /// No run with this id exists in the session.
    #[error("Unknown run: {0}")]
    UnknownRun(session::RunId),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Sandbox and permission rejections of a single call
    Authorization,
    /// API misuse by the caller
    Usage,
    /// Errors that end the run
    Fatal,
    /// Per-call failures the model gets to see
    ToolFailure,
    /// Configuration, IO and parsing
    Internal,
}

impl Error {
    pub fn out_of_boundary(requested: impl Into<PathBuf>, boundary: impl Into<PathBuf>) -> Self {
        Error::OutOfBoundary {
            requested: requested.into(),
            boundary: boundary.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::OutOfBoundary { .. } | Error::PermissionDenied(_) => {
                ErrorCategory::Authorization
            }
            Error::InvalidState(_)
            | Error::AlreadyDecided { .. }
            | Error::RunInProgress { .. }
            | Error::UnknownRun(_) => ErrorCategory::Usage,
            Error::Transport(_) | Error::InvariantViolation(_) => ErrorCategory::Fatal,
            Error::ToolExecution(_) | Error::ApprovalTimeout { .. } => ErrorCategory::ToolFailure,
            Error::Config(_) | Error::Io(_) | Error::Json(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the run that hit this error can keep going.
    pub fn is_recoverable(&self) -> bool {
        self.category() != ErrorCategory::Fatal
    }
}

impl From<security::SecurityError> for Error {
    fn from(err: security::SecurityError) -> Self {
        match err {
            security::SecurityError::OutOfBoundary {
                requested,
                boundary,
            } => Error::out_of_boundary(requested, boundary),
            security::SecurityError::ResolutionChanged { path } => Error::PermissionDenied(
                format!("path resolution changed before execution: {}", path.display()),
            ),
            security::SecurityError::InvalidPath(msg) => Error::PermissionDenied(msg),
            security::SecurityError::Io(e) => Error::Io(e),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::InvalidValue { key, message } => {
                Error::Config(format!("Invalid value for {}: {}", key, message))
            }
            config::ConfigError::Serialization(e) => Error::Json(e),
            config::ConfigError::Io(e) => Error::Io(e),
            config::ConfigError::Pattern { pattern, message } => {
                Error::Config(format!("Invalid pattern '{}': {}", pattern, message))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
