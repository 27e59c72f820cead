//! Content and file-name search below a directory inside the boundary.
//!
//! The walk never follows symlinks and skips `.git`. Files are opened
//! without following symlinks, like every other file operation.

use std::io::Read;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use regex::RegexBuilder;
use tokio_util::sync::CancellationToken;

use super::ToolResult;
use super::executor::{ExecutionContext, truncate_output};
use crate::security::{PathBoundary, fs as secure_fs};

fn resolve_existing(context: &ExecutionContext, path: &str) -> Result<PathBuf, ToolResult> {
    let resolved = context
        .resolve(path)
        .map_err(|e| ToolResult::error(format!("{}: {}", path, e)))?;
    if !resolved.exists() {
        return Err(ToolResult::error(format!("Path not found: {}", path)));
    }
    Ok(resolved)
}

fn name_pattern(glob: Option<&str>) -> Result<Option<Pattern>, ToolResult> {
    glob.map(Pattern::new)
        .transpose()
        .map_err(|e| ToolResult::error(format!("Invalid file pattern: {}", e)))
}

/// Regular files below `base` in a stable order.
fn walk_files(base: &Path, cancel: &CancellationToken) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![base.to_path_buf()];
    while let Some(path) = pending.pop() {
        if cancel.is_cancelled() {
            break;
        }
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.is_file() {
            files.push(path);
        } else if meta.is_dir() {
            if path != base && path.file_name().is_some_and(|name| name == ".git") {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(&path) else {
                continue;
            };
            let mut children: Vec<PathBuf> =
                entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
            children.sort_by(|a, b| b.cmp(a));
            pending.extend(children);
        }
    }
    files
}

fn read_text(path: &Path) -> Option<String> {
    let mut file = secure_fs::open_read(path).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

fn display(boundary: &PathBoundary, path: &Path) -> String {
    boundary.relative(path).display().to_string()
}

/// Lines matching `pattern`, as `path:line:text` relative to the root.
pub(crate) async fn grep(
    context: &ExecutionContext,
    pattern: &str,
    path: &str,
    include: Option<&str>,
    exclude: Option<&str>,
    case_sensitive: bool,
    max_results: usize,
) -> ToolResult {
    let regex = match RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
    {
        Ok(regex) => regex,
        Err(e) => return ToolResult::error(format!("Invalid pattern: {}", e)),
    };
    let (include, exclude) = match (name_pattern(include), name_pattern(exclude)) {
        (Ok(include), Ok(exclude)) => (include, exclude),
        (Err(result), _) | (_, Err(result)) => return result,
    };
    let base = match resolve_existing(context, path) {
        Ok(base) => base,
        Err(result) => return result,
    };

    let boundary = context.boundary().clone();
    let cancel = context.cancel_token().clone();
    let search = tokio::task::spawn_blocking(move || {
        let mut hits = Vec::new();
        for file in walk_files(&base, &cancel) {
            if hits.len() >= max_results || cancel.is_cancelled() {
                break;
            }
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if include.as_ref().is_some_and(|p| !p.matches(&name))
                || exclude.as_ref().is_some_and(|p| p.matches(&name))
            {
                continue;
            }
            let Some(content) = read_text(&file) else {
                continue;
            };
            let shown = display(&boundary, &file);
            for (index, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    hits.push(format!("{}:{}:{}", shown, index + 1, line));
                    if hits.len() >= max_results {
                        break;
                    }
                }
            }
        }
        hits
    })
    .await;

    match search {
        Ok(_) if context.is_cancelled() => ToolResult::error("Search cancelled"),
        Ok(hits) if hits.is_empty() => ToolResult::success("No matches found"),
        Ok(hits) => ToolResult::Success(truncate_output(hits.join("\n"))),
        Err(e) => ToolResult::error(format!("Search task failed: {}", e)),
    }
}

/// Files whose name matches `pattern`, or whose path relative to `path`
/// does when the pattern contains a separator.
pub(crate) async fn find(
    context: &ExecutionContext,
    pattern: &str,
    path: &str,
    max_results: usize,
) -> ToolResult {
    let matcher = match Pattern::new(pattern) {
        Ok(matcher) => matcher,
        Err(e) => return ToolResult::error(format!("Invalid pattern: {}", e)),
    };
    let base = match resolve_existing(context, path) {
        Ok(base) if base.is_dir() => base,
        Ok(_) => return ToolResult::error(format!("Not a directory: {}", path)),
        Err(result) => return result,
    };

    let by_path = pattern.contains('/');
    let options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::new()
    };
    let boundary = context.boundary().clone();
    let cancel = context.cancel_token().clone();
    let search = tokio::task::spawn_blocking(move || {
        walk_files(&base, &cancel)
            .into_iter()
            .filter(|file| {
                if by_path {
                    file.strip_prefix(&base)
                        .is_ok_and(|rel| matcher.matches_path_with(rel, options))
                } else {
                    file.file_name()
                        .is_some_and(|name| matcher.matches(&name.to_string_lossy()))
                }
            })
            .take(max_results)
            .map(|file| display(&boundary, &file))
            .collect::<Vec<_>>()
    })
    .await;

    match search {
        Ok(_) if context.is_cancelled() => ToolResult::error("Search cancelled"),
        Ok(found) if found.is_empty() => ToolResult::success("No files found"),
        Ok(found) => ToolResult::Success(truncate_output(found.join("\n"))),
        Err(e) => ToolResult::error(format!("Search task failed: {}", e)),
    }
}
