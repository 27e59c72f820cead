//! `settings.json` loading with hierarchical merge.
//!
//! Loads settings from (lowest to highest priority):
//! 1. User settings: ~/.agent-gate/settings.json
//! 2. Project settings: <project>/.agent-gate/settings.json
//! 3. Environment: AGENT_GATE_TOOL_TIMEOUT_SECS, AGENT_GATE_APPROVAL_TIMEOUT_SECS

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::run::{DEFAULT_MAX_ROUNDS, DEFAULT_TOOL_TIMEOUT};
use super::{ConfigError, ConfigResult, RunConfig};
use crate::permissions::{PermissionMode, PermissionPolicy};

pub const SETTINGS_DIR: &str = ".agent-gate";
pub const SETTINGS_FILE: &str = "settings.json";
pub const ENV_TOOL_TIMEOUT: &str = "AGENT_GATE_TOOL_TIMEOUT_SECS";
pub const ENV_APPROVAL_TIMEOUT: &str = "AGENT_GATE_APPROVAL_TIMEOUT_SECS";

const DEFAULT_ALLOW: &[&str] = &["npm test", "npm run lint", "pytest", "make test", "cargo test"];
const DEFAULT_DENY: &[&str] = &["rm -rf /", "sudo rm"];
const DEFAULT_PROTECTED: &[&str] = &["~/.ssh", "~/.gnupg", "/etc", ".env", "*.pem", "*.key"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsSource {
    #[default]
    Builtin,
    User,
    Project,
    Env,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(skip)]
    pub source: SettingsSource,

    #[serde(default)]
    pub permissions: PermissionSettings,

    #[serde(default)]
    pub run: RunSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: SettingsSource::Builtin,
            permissions: PermissionSettings::recommended(),
            run: RunSettings::default(),
        }
    }
}

impl Settings {
    pub fn with_source(mut self, source: SettingsSource) -> Self {
        self.source = source;
        self
    }

    pub fn to_policy(&self) -> ConfigResult<PermissionPolicy> {
        self.permissions.to_policy()
    }

    pub fn to_run_config(&self) -> ConfigResult<RunConfig> {
        self.run.to_run_config()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSettings {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub protected: Vec<String>,
    #[serde(default, rename = "defaultMode", skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<String>,
}

impl PermissionSettings {
    /// Built-in lists applied before any settings file.
    pub fn recommended() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            allow: owned(DEFAULT_ALLOW),
            deny: owned(DEFAULT_DENY),
            protected: owned(DEFAULT_PROTECTED),
            default_mode: None,
        }
    }

    pub fn to_policy(&self) -> ConfigResult<PermissionPolicy> {
        let mut builder = PermissionPolicy::builder();

        if let Some(mode_str) = &self.default_mode {
            let mode = mode_str
                .parse::<PermissionMode>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "permissions.defaultMode".into(),
                    message,
                })?;
            builder = builder.mode(mode);
        }

        for pattern in &self.deny {
            builder = builder.block(pattern);
        }
        for pattern in &self.allow {
            builder = builder.allow(pattern);
        }
        for pattern in &self.protected {
            builder = builder.protect(pattern);
        }

        builder.build()
    }

    pub fn is_empty(&self) -> bool {
        self.deny.is_empty()
            && self.allow.is_empty()
            && self.protected.is_empty()
            && self.default_mode.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
}

impl RunSettings {
    pub fn to_run_config(&self) -> ConfigResult<RunConfig> {
        let positive = |key: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must be greater than zero".into(),
                })
            } else {
                Ok(Duration::from_secs(value))
            }
        };

        let tool_timeout = match self.tool_timeout_secs {
            Some(secs) => positive("run.toolTimeoutSecs", secs)?,
            None => DEFAULT_TOOL_TIMEOUT,
        };
        let approval_timeout = self
            .approval_timeout_secs
            .map(|secs| positive("run.approvalTimeoutSecs", secs))
            .transpose()?;
        let max_rounds = match self.max_rounds {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "run.maxRounds".into(),
                    message: "must be greater than zero".into(),
                });
            }
            Some(rounds) => rounds,
            None => DEFAULT_MAX_ROUNDS,
        };

        Ok(RunConfig {
            tool_timeout,
            approval_timeout,
            max_rounds,
        })
    }
}

/// Settings loader that merges from multiple sources.
#[derive(Debug, Default)]
pub struct SettingsLoader {
    settings: Settings,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from all sources for a project.
    /// Priority (lowest to highest): Builtin → User → Project → Env
    pub async fn load(&mut self, project_dir: &Path) -> ConfigResult<&Settings> {
        if let Some(home) = super::home_dir() {
            let user_settings = home.join(SETTINGS_DIR).join(SETTINGS_FILE);
            if user_settings.exists() {
                self.merge_file(&user_settings, SettingsSource::User)
                    .await?;
            }
        }

        let project_settings = project_dir.join(SETTINGS_DIR).join(SETTINGS_FILE);
        if project_settings.exists() {
            self.merge_file(&project_settings, SettingsSource::Project)
                .await?;
        }

        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(&self.settings)
    }

    async fn merge_file(&mut self, path: &PathBuf, source: SettingsSource) -> ConfigResult<()> {
        let content = tokio::fs::read_to_string(path).await?;
        let file_settings: Settings = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), ?source, "Merging settings file");
        self.merge_settings(file_settings.with_source(source));
        Ok(())
    }

    fn merge_settings(&mut self, other: Settings) {
        let extend = |into: &mut Vec<String>, from: Vec<String>| {
            for item in from {
                if !into.contains(&item) {
                    into.push(item);
                }
            }
        };

        let permissions = &mut self.settings.permissions;
        extend(&mut permissions.deny, other.permissions.deny);
        extend(&mut permissions.allow, other.permissions.allow);
        extend(&mut permissions.protected, other.permissions.protected);
        if other.permissions.default_mode.is_some() {
            permissions.default_mode = other.permissions.default_mode;
        }

        let run = &mut self.settings.run;
        if other.run.tool_timeout_secs.is_some() {
            run.tool_timeout_secs = other.run.tool_timeout_secs;
        }
        if other.run.approval_timeout_secs.is_some() {
            run.approval_timeout_secs = other.run.approval_timeout_secs;
        }
        if other.run.max_rounds.is_some() {
            run.max_rounds = other.run.max_rounds;
        }

        self.settings.source = other.source;
    }

    /// Applies timeout overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> ConfigResult<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map_err(|e| ConfigError::InvalidValue {
                            key: key.into(),
                            message: e.to_string(),
                        })
                })
                .transpose()
        };

        if let Some(secs) = parse(ENV_TOOL_TIMEOUT)? {
            self.settings.run.tool_timeout_secs = Some(secs);
            self.settings.source = SettingsSource::Env;
        }
        if let Some(secs) = parse(ENV_APPROVAL_TIMEOUT)? {
            self.settings.run.approval_timeout_secs = Some(secs);
            self.settings.source = SettingsSource::Env;
        }
        Ok(())
    }

    pub async fn load_from_directory(dir: &Path) -> ConfigResult<Settings> {
        let mut loader = Self::new();
        let settings_path = dir.join(SETTINGS_DIR).join(SETTINGS_FILE);
        if settings_path.exists() {
            loader
                .merge_file(&settings_path, SettingsSource::Project)
                .await?;
        }
        Ok(loader.settings)
    }

    pub async fn load_merged(project_dir: &Path) -> ConfigResult<Settings> {
        let mut loader = Self::new();
        loader.load(project_dir).await?;
        Ok(loader.settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    async fn write_project_settings(dir: &Path, json: &str) {
        let settings_dir = dir.join(SETTINGS_DIR);
        tokio::fs::create_dir_all(&settings_dir).await.unwrap();
        tokio::fs::write(settings_dir.join(SETTINGS_FILE), json)
            .await
            .unwrap();
    }

    #[test]
    fn test_recommended_defaults() {
        let settings = Settings::default();
        assert!(
            settings
                .permissions
                .deny
                .contains(&"rm -rf /".to_string())
        );
        assert!(settings.permissions.allow.contains(&"cargo test".to_string()));
        assert!(settings.permissions.protected.contains(&".env".to_string()));
        assert_eq!(settings.source, SettingsSource::Builtin);
    }

    #[test]
    fn test_default_policy_classifies() {
        use crate::permissions::Classification;
        use crate::tools::{ToolCall, ToolParams};

        let policy = Settings::default().to_policy().unwrap();
        let deny = policy.classify(&ToolCall::new("c1", ToolParams::execute("rm -rf /")));
        assert!(deny.is_denied());
        let allow = policy.classify(&ToolCall::new("c2", ToolParams::execute("pytest")));
        assert_eq!(allow, Classification::AutoApprove);
        let env = policy.classify(&ToolCall::new("c3", ToolParams::read(".env")));
        assert_eq!(env, Classification::RequireApproval);
    }

    #[tokio::test]
    async fn test_project_file_merges_over_builtin() {
        let dir = tempdir().unwrap();
        write_project_settings(
            dir.path(),
            r#"{
                "permissions": {"deny": ["curl:*", "sudo rm"], "defaultMode": "acceptEdits"},
                "run": {"toolTimeoutSecs": 30, "maxRounds": 4}
            }"#,
        )
        .await;

        let settings = SettingsLoader::load_from_directory(dir.path())
            .await
            .unwrap();
        assert_eq!(settings.source, SettingsSource::Project);
        assert!(settings.permissions.deny.contains(&"curl:*".to_string()));
        let sudo = settings
            .permissions
            .deny
            .iter()
            .filter(|p| *p == "sudo rm")
            .count();
        assert_eq!(sudo, 1);

        let policy = settings.to_policy().unwrap();
        assert_eq!(policy.mode, PermissionMode::AcceptEdits);

        let config = settings.to_run_config().unwrap();
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.max_rounds, 4);
        assert!(config.approval_timeout.is_none());
    }

    #[tokio::test]
    async fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        write_project_settings(dir.path(), "{ not json").await;
        let result = SettingsLoader::load_from_directory(dir.path()).await;
        assert!(matches!(result, Err(ConfigError::Serialization(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_TOOL_TIMEOUT, "7"),
            (ENV_APPROVAL_TIMEOUT, " 90 "),
        ]
        .into_iter()
        .collect();

        let mut loader = SettingsLoader::new();
        loader
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        let config = loader.settings().to_run_config().unwrap();
        assert_eq!(config.tool_timeout, Duration::from_secs(7));
        assert_eq!(config.approval_timeout, Some(Duration::from_secs(90)));
        assert_eq!(loader.settings().source, SettingsSource::Env);
    }

    #[test]
    fn test_env_override_invalid() {
        let mut loader = SettingsLoader::new();
        let result = loader.apply_env(|key| (key == ENV_TOOL_TIMEOUT).then(|| "soon".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_invalid_values() {
        let run = RunSettings {
            tool_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            run.to_run_config(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let permissions = PermissionSettings {
            default_mode: Some("yolo".into()),
            ..Default::default()
        };
        assert!(matches!(
            permissions.to_policy(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_permission_settings_is_empty() {
        assert!(PermissionSettings::default().is_empty());
        assert!(!PermissionSettings::recommended().is_empty());
    }
}
