//! Tool call payloads, decisions and results.

use std::path::PathBuf;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::permissions::Classification;

/// Coarse operation class used for tier defaults and edit checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Write,
    Edit,
    Delete,
    Execute,
    GitRead,
    GitWrite,
}

impl ToolKind {
    /// Kinds that change the working tree or run arbitrary code.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, ToolKind::Read | ToolKind::GitRead)
    }

    /// Kinds whose payload names filesystem paths.
    pub fn is_filesystem(&self) -> bool {
        matches!(
            self,
            ToolKind::Read | ToolKind::Write | ToolKind::Edit | ToolKind::Delete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Read => "read",
            ToolKind::Write => "write",
            ToolKind::Edit => "edit",
            ToolKind::Delete => "delete",
            ToolKind::Execute => "execute",
            ToolKind::GitRead => "git_read",
            ToolKind::GitWrite => "git_write",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn all_occurrences() -> i64 {
    -1
}

fn default_log_count() -> usize {
    10
}

fn default_search_path() -> String {
    ".".into()
}

fn default_max_results() -> usize {
    100
}

fn case_sensitive_default() -> bool {
    true
}

/// Parameter payload of a tool call, one variant per operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ToolParams {
    Read {
        #[serde(alias = "file_path")]
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_start: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_end: Option<usize>,
    },
    Write {
        #[serde(alias = "file_path")]
        path: String,
        content: String,
        #[serde(default)]
        create_new: bool,
    },
    Edit {
        #[serde(alias = "file_path")]
        path: String,
        search: String,
        replace: String,
        /// `-1` replaces every occurrence, `n` only the n-th (1-based).
        #[serde(default = "all_occurrences")]
        occurrence: i64,
    },
    Delete {
        #[serde(alias = "file_path")]
        path: String,
    },
    /// Regex search over file contents below `path`.
    Grep {
        pattern: String,
        #[serde(default = "default_search_path")]
        path: String,
        /// File-name glob a file must match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        include: Option<String>,
        /// File-name glob that excludes a file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude: Option<String>,
        #[serde(default = "case_sensitive_default")]
        case_sensitive: bool,
        #[serde(default = "default_max_results")]
        max_results: usize,
    },
    /// Files below `path` whose name (or relative path, if the pattern has
    /// a `/`) matches a glob.
    Glob {
        pattern: String,
        #[serde(default = "default_search_path")]
        path: String,
        #[serde(default = "default_max_results")]
        max_results: usize,
    },
    Execute {
        command: String,
        #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    GitStatus,
    GitDiff {
        #[serde(default)]
        staged: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    GitLog {
        #[serde(default = "default_log_count")]
        count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    GitCommit {
        message: String,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        add_all: bool,
    },
}

impl ToolParams {
    pub fn read(path: impl Into<String>) -> Self {
        Self::Read {
            path: path.into(),
            line_start: None,
            line_end: None,
        }
    }

    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
            create_new: false,
        }
    }

    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
            create_new: true,
        }
    }

    pub fn edit(
        path: impl Into<String>,
        search: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        Self::Edit {
            path: path.into(),
            search: search.into(),
            replace: replace.into(),
            occurrence: all_occurrences(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    pub fn grep(pattern: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Grep {
            pattern: pattern.into(),
            path: path.into(),
            include: None,
            exclude: None,
            case_sensitive: true,
            max_results: default_max_results(),
        }
    }

    pub fn glob(pattern: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Glob {
            pattern: pattern.into(),
            path: path.into(),
            max_results: default_max_results(),
        }
    }

    pub fn execute(command: impl Into<String>) -> Self {
        Self::Execute {
            command: command.into(),
            timeout_secs: None,
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::Read { .. } | Self::Grep { .. } | Self::Glob { .. } => ToolKind::Read,
            Self::Write { .. } => ToolKind::Write,
            Self::Edit { .. } => ToolKind::Edit,
            Self::Delete { .. } => ToolKind::Delete,
            Self::Execute { .. } => ToolKind::Execute,
            Self::GitStatus | Self::GitDiff { .. } | Self::GitLog { .. } => ToolKind::GitRead,
            Self::GitCommit { .. } => ToolKind::GitWrite,
        }
    }

    /// Paths named by the payload, as the model wrote them.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Read { path, .. }
            | Self::Write { path, .. }
            | Self::Edit { path, .. }
            | Self::Delete { path }
            | Self::Grep { path, .. }
            | Self::Glob { path, .. } => vec![path.as_str()],
            Self::GitDiff { file, .. } | Self::GitLog { file, .. } => {
                file.as_deref().into_iter().collect()
            }
            Self::GitCommit { files, .. } => files.iter().map(String::as_str).collect(),
            Self::Execute { .. } | Self::GitStatus => Vec::new(),
        }
    }

    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Execute { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Maps a model tool invocation onto a payload.
    ///
    /// Accepts the toolkit names (`read_file`, `create_file`, `run_command`,
    /// `git_commit`, ...) and the short operation names.
    pub fn from_invocation(name: &str, input: Value) -> crate::Result<Self> {
        let (op, create_new) = match name {
            "read_file" | "read" => ("read", false),
            "write_file" | "write" => ("write", false),
            "create_file" | "create" => ("write", true),
            "edit_file" | "edit" => ("edit", false),
            "delete_file" | "delete" => ("delete", false),
            "grep_search" | "grep" => ("grep", false),
            "find_files" | "glob" => ("glob", false),
            "run_command" | "execute" => ("execute", false),
            "git_status" => ("git_status", false),
            "git_diff" => ("git_diff", false),
            "git_log" => ("git_log", false),
            "git_commit" => ("git_commit", false),
            other => {
                return Err(serde_json::Error::custom(format!("unknown tool: {}", other)).into());
            }
        };

        let mut object = match input {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(serde_json::Error::custom(format!(
                    "tool input must be an object, got {}",
                    other
                ))
                .into());
            }
        };
        object.insert("op".into(), Value::String(op.into()));
        if create_new {
            object.insert("create_new".into(), Value::Bool(true));
        }
        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

/// Human (or scripted) verdict on a call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Pending,
    Approved,
    ApprovedWithEdit {
        params: ToolParams,
    },
    Rejected,
}

impl Decision {
    pub fn is_pending(&self) -> bool {
        matches!(self, Decision::Pending)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ToolResult {
    Success(String),
    Error(String),
    Empty,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self::Success(content.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Success(s) | Self::Error(s) => s,
            Self::Empty => "",
        }
    }
}

/// One tool request produced by a model turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub params: ToolParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<Classification>,
    #[serde(default)]
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, params: ToolParams) -> Self {
        Self {
            id: id.into(),
            params,
            resolved_paths: Vec::new(),
            requirement: None,
            decision: Decision::Pending,
            result: None,
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.params.kind()
    }

    /// Params that should run: edited ones when the decision carries them.
    pub fn effective_params(&self) -> &ToolParams {
        match &self.decision {
            Decision::ApprovedWithEdit { params } => params,
            _ => &self.params,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Completed,
    Failed,
    Denied,
    Skipped,
}

/// What the model gets back for one call when the turn continues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub disposition: Disposition,
    pub result: ToolResult,
}

impl ToolOutcome {
    pub fn completed(call_id: impl Into<String>, result: ToolResult) -> Self {
        let disposition = if result.is_error() {
            Disposition::Failed
        } else {
            Disposition::Completed
        };
        Self {
            call_id: call_id.into(),
            disposition,
            result,
        }
    }

    pub fn denied(call_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            disposition: Disposition::Denied,
            result: ToolResult::Error(reason.into()),
        }
    }

    pub fn skipped(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            disposition: Disposition::Skipped,
            result: ToolResult::Error("Rejected by user".into()),
        }
    }
}
