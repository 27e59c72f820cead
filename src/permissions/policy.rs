//! Classification of tool calls against the session policy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{PatternRule, PermissionMode};
use crate::config::ConfigError;
use crate::tools::ToolCall;

/// Approval requirement derived for a call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "snake_case")]
pub enum Classification {
    AutoApprove,
    RequireApproval,
    Deny(String),
}

impl Classification {
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }
}

/// Blocklist, allowlist, protected paths and tier defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPolicy {
    #[serde(default)]
    pub mode: PermissionMode,
    #[serde(default)]
    pub blocklist: Vec<PatternRule>,
    #[serde(default)]
    pub allowlist: Vec<PatternRule>,
    #[serde(default)]
    pub protected: Vec<PatternRule>,
}

impl PermissionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> PermissionPolicyBuilder {
        PermissionPolicyBuilder::new()
    }

    pub fn read_only() -> Self {
        Self {
            mode: PermissionMode::Plan,
            ..Default::default()
        }
    }

    pub fn accept_edits() -> Self {
        Self {
            mode: PermissionMode::AcceptEdits,
            ..Default::default()
        }
    }

    /// Classifies `call`. Pure: the same call always yields the same answer.
    ///
    /// First match wins:
    /// 1. blocklist, on the command or any path;
    /// 2. plan mode, for mutating kinds;
    /// 3. protected paths;
    /// 4. allowlist, on the command or on every resolved path;
    /// 5. the tier default of the mode.
    ///
    /// Block and protect checks see paths both as written and as resolved.
    pub fn classify(&self, call: &ToolCall) -> Classification {
        let params = call.effective_params();
        let kind = params.kind();
        let raw: Vec<&Path> = params.paths().into_iter().map(Path::new).collect();
        let paths = || {
            raw.iter()
                .copied()
                .chain(call.resolved_paths.iter().map(|p| p.as_path()))
        };

        if let Some(command) = params.command()
            && let Some(rule) = self.blocklist.iter().find(|r| r.occurs_in_command(command))
        {
            return Classification::Deny(format!("command matches blocklist entry '{}'", rule));
        }
        for path in paths() {
            if let Some(rule) = self.blocklist.iter().find(|r| r.matches_path(path)) {
                return Classification::Deny(format!(
                    "path {} matches blocklist entry '{}'",
                    path.display(),
                    rule
                ));
            }
        }

        if self.mode.is_read_only() && kind.is_mutating() {
            return Classification::Deny(format!("{} is not allowed in plan mode", kind));
        }

        if paths().any(|path| self.protected.iter().any(|r| r.matches_path(path))) {
            return Classification::RequireApproval;
        }

        if let Some(command) = params.command()
            && self.allowlist.iter().any(|r| r.admits_command(command))
        {
            return Classification::AutoApprove;
        }
        let targets: Vec<&Path> = if call.resolved_paths.is_empty() {
            raw.clone()
        } else {
            call.resolved_paths.iter().map(|p| p.as_path()).collect()
        };
        if !targets.is_empty()
            && targets
                .iter()
                .all(|path| self.allowlist.iter().any(|r| r.matches_path(path)))
        {
            return Classification::AutoApprove;
        }

        if self.mode.tier_auto_approves(kind) {
            Classification::AutoApprove
        } else {
            Classification::RequireApproval
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PermissionPolicyBuilder {
    mode: PermissionMode,
    block: Vec<String>,
    allow: Vec<String>,
    protect: Vec<String>,
}

impl PermissionPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn block(mut self, pattern: impl Into<String>) -> Self {
        self.block.push(pattern.into());
        self
    }

    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allow.push(pattern.into());
        self
    }

    pub fn protect(mut self, pattern: impl Into<String>) -> Self {
        self.protect.push(pattern.into());
        self
    }

    pub fn build(self) -> Result<PermissionPolicy, ConfigError> {
        let parse = |patterns: Vec<String>| {
            patterns
                .into_iter()
                .map(PatternRule::parse)
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(PermissionPolicy {
            mode: self.mode,
            blocklist: parse(self.block)?,
            allowlist: parse(self.allow)?,
            protected: parse(self.protect)?,
        })
    }
}
