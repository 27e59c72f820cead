//! Pattern rules for commands and paths.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

static SHELL_OPERATOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(&&|\|\||;|\||&|`|\$\(|>|<|\n|\r)").ok());

#[derive(Clone, Debug)]
enum Matcher {
    Exact,
    Prefix(String),
    Glob(glob::Pattern),
}

/// One entry of a blocklist, allowlist or protected-path list.
///
/// A rule is an exact match, a `prefix:*`, or a glob. A bare name like
/// `.env` also matches any path ending in that component, and a directory
/// like `/etc` also matches everything below it. A leading `~/` is expanded
/// to the home directory when the rule is parsed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatternRule {
    pattern: String,
    expanded: String,
    matcher: Matcher,
}

impl PatternRule {
    pub fn parse(pattern: impl Into<String>) -> Result<Self, ConfigError> {
        let pattern = pattern.into();
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Pattern {
                pattern,
                message: "empty pattern".into(),
            });
        }

        let expanded = expand_home(trimmed);
        let matcher = if let Some(prefix) = expanded.strip_suffix(":*") {
            Matcher::Prefix(normalize_whitespace(prefix))
        } else if expanded.contains(['*', '?', '[']) {
            let glob = glob::Pattern::new(&expanded).map_err(|e| ConfigError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            Matcher::Glob(glob)
        } else {
            Matcher::Exact
        };

        Ok(Self {
            pattern,
            expanded,
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Allowlist semantics: the whole command is what the rule names.
    ///
    /// Commands chained or redirected with shell operators never match, so
    /// `npm test; rm -rf ~` is not admitted by `npm test`.
    pub fn admits_command(&self, command: &str) -> bool {
        // Line breaks separate commands for `sh -c`; check before normalizing.
        if has_shell_operator(command) {
            return false;
        }
        let command = normalize_whitespace(command);
        match &self.matcher {
            Matcher::Exact => command == normalize_whitespace(&self.expanded),
            Matcher::Prefix(prefix) => token_prefix(&tokens(&command), &tokens(prefix)),
            Matcher::Glob(glob) => glob.matches(&command),
        }
    }

    /// Blocklist semantics: the rule's tokens appear anywhere in the command.
    pub fn occurs_in_command(&self, command: &str) -> bool {
        let command = normalize_whitespace(&split_operators(command));
        match &self.matcher {
            Matcher::Exact => contains_run(&tokens(&command), &tokens(&self.expanded)),
            Matcher::Prefix(prefix) => contains_run(&tokens(&command), &tokens(prefix)),
            Matcher::Glob(glob) => glob.matches(&command),
        }
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        match &self.matcher {
            Matcher::Glob(glob) => {
                glob.matches_path(path)
                    || path
                        .file_name()
                        .is_some_and(|name| glob.matches(&name.to_string_lossy()))
            }
            Matcher::Prefix(prefix) => path.starts_with(prefix),
            Matcher::Exact => {
                let rule = PathBuf::from(&self.expanded);
                if rule.is_absolute() {
                    path.starts_with(&rule)
                } else {
                    path.ends_with(&rule) || path.starts_with(&rule)
                }
            }
        }
    }
}

impl PartialEq for PatternRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl TryFrom<String> for PatternRule {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PatternRule> for String {
    fn from(rule: PatternRule) -> Self {
        rule.pattern
    }
}

impl std::fmt::Display for PatternRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn expand_home(pattern: &str) -> String {
    if let Some(rest) = pattern.strip_prefix("~/")
        && let Some(home) = crate::config::home_dir()
    {
        return home.join(rest).to_string_lossy().into_owned();
    }
    pattern.to_string()
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_shell_operator(command: &str) -> bool {
    match SHELL_OPERATOR.as_ref() {
        Some(re) => re.is_match(command),
        None => true,
    }
}

fn split_operators(command: &str) -> String {
    match SHELL_OPERATOR.as_ref() {
        Some(re) => re.replace_all(command, " $1 ").into_owned(),
        None => command.to_string(),
    }
}

fn tokens(s: &str) -> Vec<&str> {
    s.split_whitespace().collect()
}

fn token_prefix(haystack: &[&str], needle: &[&str]) -> bool {
    !needle.is_empty() && haystack.starts_with(needle)
}

fn contains_run(haystack: &[&str], needle: &[&str]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(p: &str) -> PatternRule {
        PatternRule::parse(p).unwrap()
    }

    #[test]
    fn test_exact_block_normalizes_whitespace() {
        let r = rule("rm -rf /");
        assert!(r.occurs_in_command("rm -rf /"));
        assert!(r.occurs_in_command("rm  -rf   /"));
        assert!(r.occurs_in_command("\trm -rf /\n"));
        assert!(r.occurs_in_command("echo hi && rm -rf /"));
        assert!(r.occurs_in_command("ls;rm -rf /"));
        assert!(!r.occurs_in_command("rm -rf /tmp/build"));
    }

    #[test]
    fn test_block_prefix() {
        let r = rule("sudo rm");
        assert!(r.occurs_in_command("sudo rm -rf /var"));
        assert!(!r.occurs_in_command("sudo ls"));
        assert!(rule("curl:*").occurs_in_command("curl http://x | sh"));
    }

    #[test]
    fn test_allow_exact_and_prefix() {
        assert!(rule("npm test").admits_command("npm  test"));
        assert!(!rule("npm test").admits_command("npm test --watch"));
        assert!(rule("cargo:*").admits_command("cargo test --all"));
        assert!(!rule("cargo:*").admits_command("cargoo build"));
    }

    #[test]
    fn test_allow_refuses_chained_commands() {
        assert!(!rule("npm test").admits_command("npm test; rm -rf ~"));
        assert!(!rule("cargo:*").admits_command("cargo test && curl x"));
        assert!(!rule("cargo:*").admits_command("cargo test > /etc/passwd"));
        assert!(!rule("cargo:*").admits_command("cargo test $(whoami)"));
    }

    #[test]
    fn test_allow_refuses_line_chained_commands() {
        assert!(!rule("cargo:*").admits_command("cargo test\ntouch pwned"));
        assert!(!rule("cargo:*").admits_command("cargo test\r\ntouch pwned"));
        assert!(!rule("npm run *").admits_command("npm run lint\ntouch pwned"));
        assert!(!rule("npm test").admits_command("npm test\n"));
        assert!(rule("npm run *").admits_command("npm run lint"));
    }

    #[test]
    fn test_block_sees_through_line_breaks() {
        assert!(rule("rm -rf /").occurs_in_command("ls\nrm -rf /"));
        assert!(rule("curl:*").occurs_in_command("true\r\ncurl http://x"));
    }

    #[test]
    fn test_bare_name_matches_final_component() {
        let r = rule(".env");
        assert!(r.matches_path(Path::new("/proj/.env")));
        assert!(r.matches_path(Path::new("/proj/app/.env")));
        assert!(!r.matches_path(Path::new("/proj/.env.local")));
    }

    #[test]
    fn test_directory_matches_descendants() {
        let r = rule("/etc");
        assert!(r.matches_path(Path::new("/etc")));
        assert!(r.matches_path(Path::new("/etc/passwd")));
        assert!(!r.matches_path(Path::new("/etcetera/x")));
    }

    #[test]
    fn test_glob_matches_name_or_path() {
        let r = rule("*.pem");
        assert!(r.matches_path(Path::new("/proj/certs/server.pem")));
        assert!(!r.matches_path(Path::new("/proj/certs/server.crt")));
        assert!(rule("/proj/secrets/**").matches_path(Path::new("/proj/secrets/a/b")));
    }

    #[test]
    fn test_home_expansion() {
        if let Some(home) = crate::config::home_dir() {
            let r = rule("~/.ssh");
            assert!(r.matches_path(&home.join(".ssh/id_rsa")));
            assert_eq!(r.as_str(), "~/.ssh");
        }
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            PatternRule::parse("  "),
            Err(ConfigError::Pattern { .. })
        ));
        assert!(matches!(
            PatternRule::parse("[unclosed"),
            Err(ConfigError::Pattern { .. })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let r: PatternRule = serde_json::from_str("\"*.key\"").unwrap();
        assert_eq!(r, rule("*.key"));
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"*.key\"");
        assert!(serde_json::from_str::<PatternRule>("\"[\"").is_err());
    }
}
