//! Permission modes that shift the tier defaults.

use serde::{Deserialize, Serialize};

use crate::tools::ToolKind;

/// Mode that adjusts which kinds auto-approve when no rule matches.
///
/// - **Default**: reads auto-approve, everything else asks.
/// - **AcceptEdits**: writes and edits also auto-approve unless a path is
///   protected.
/// - **Plan**: read-only. Every mutating kind is denied.
///
/// ```rust
/// use agent_gate::permissions::PermissionMode;
///
/// let mode: PermissionMode = "accept-edits".parse().unwrap();
/// assert!(mode.auto_approves_edits());
/// assert!(PermissionMode::Plan.is_read_only());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    Plan,
}

impl PermissionMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, PermissionMode::Plan)
    }

    pub fn auto_approves_edits(&self) -> bool {
        matches!(self, PermissionMode::AcceptEdits)
    }

    /// Whether `kind` auto-approves when nothing else matched.
    pub fn tier_auto_approves(&self, kind: ToolKind) -> bool {
        match kind {
            ToolKind::Read | ToolKind::GitRead => true,
            ToolKind::Write | ToolKind::Edit => self.auto_approves_edits(),
            ToolKind::Delete | ToolKind::Execute | ToolKind::GitWrite => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PermissionMode::Default => "Reads auto-approve, everything else needs approval",
            PermissionMode::AcceptEdits => "Reads, writes and edits auto-approve",
            PermissionMode::Plan => "Read-only mode",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionMode::Default => write!(f, "default"),
            PermissionMode::AcceptEdits => write!(f, "acceptEdits"),
            PermissionMode::Plan => write!(f, "plan"),
        }
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(PermissionMode::Default),
            "acceptedits" | "accept-edits" | "accept_edits" => Ok(PermissionMode::AcceptEdits),
            "plan" | "readonly" | "read-only" | "read_only" => Ok(PermissionMode::Plan),
            _ => Err(format!("Unknown permission mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_defaults() {
        let mode = PermissionMode::Default;
        assert!(mode.tier_auto_approves(ToolKind::Read));
        assert!(mode.tier_auto_approves(ToolKind::GitRead));
        assert!(!mode.tier_auto_approves(ToolKind::Write));
        assert!(!mode.tier_auto_approves(ToolKind::Execute));
    }

    #[test]
    fn test_accept_edits_mode() {
        let mode = PermissionMode::AcceptEdits;
        assert!(mode.tier_auto_approves(ToolKind::Write));
        assert!(mode.tier_auto_approves(ToolKind::Edit));
        assert!(!mode.tier_auto_approves(ToolKind::Delete));
        assert!(!mode.tier_auto_approves(ToolKind::GitWrite));
    }

    #[test]
    fn test_display() {
        assert_eq!(PermissionMode::Default.to_string(), "default");
        assert_eq!(PermissionMode::AcceptEdits.to_string(), "acceptEdits");
        assert_eq!(PermissionMode::Plan.to_string(), "plan");
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "acceptEdits".parse::<PermissionMode>().unwrap(),
            PermissionMode::AcceptEdits
        );
        assert_eq!(
            "readonly".parse::<PermissionMode>().unwrap(),
            PermissionMode::Plan
        );
        assert!("bypass".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&PermissionMode::AcceptEdits).unwrap();
        assert_eq!(json, "\"acceptEdits\"");
        let parsed: PermissionMode = serde_json::from_str("\"plan\"").unwrap();
        assert_eq!(parsed, PermissionMode::Plan);
    }
}
