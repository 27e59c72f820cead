//! File operations. Every path goes through the boundary, and the final
//! component is opened without following symlinks.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::executor::{ExecutionContext, truncate_output};
use super::ToolResult;
use crate::security::{SecurityError, fs as secure_fs};

fn security_error(path: &str, e: SecurityError) -> ToolResult {
    match e {
        SecurityError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            ToolResult::error(format!("File not found: {}", path))
        }
        SecurityError::Io(io) if io.kind() == std::io::ErrorKind::AlreadyExists => {
            ToolResult::error(format!("File already exists: {}", path))
        }
        other => ToolResult::error(format!("{}: {}", path, other)),
    }
}

async fn read_to_string(context: &ExecutionContext, path: &str) -> Result<String, ToolResult> {
    let resolved = context.resolve(path).map_err(|e| security_error(path, e))?;
    if resolved.is_dir() {
        return Err(ToolResult::error(format!("Not a file: {}", path)));
    }
    let file = secure_fs::open_read(&resolved).map_err(|e| security_error(path, e))?;
    let mut content = String::new();
    tokio::fs::File::from_std(file)
        .read_to_string(&mut content)
        .await
        .map_err(|e| ToolResult::error(format!("Error reading {}: {}", path, e)))?;
    Ok(content)
}

async fn write_string(
    context: &ExecutionContext,
    path: &str,
    content: &str,
    create_new: bool,
) -> Result<(), ToolResult> {
    let resolved = context.resolve(path).map_err(|e| security_error(path, e))?;
    if let Some(parent) = resolved.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ToolResult::error(format!("Error creating directories: {}", e)))?;
    }
    let file = secure_fs::open_write(&resolved, create_new).map_err(|e| security_error(path, e))?;
    let mut file = tokio::fs::File::from_std(file);
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| ToolResult::error(format!("Error writing {}: {}", path, e)))?;
    file.flush()
        .await
        .map_err(|e| ToolResult::error(format!("Error writing {}: {}", path, e)))?;
    Ok(())
}

/// Reads a file, optionally a 1-based inclusive line range.
pub(crate) async fn read(
    context: &ExecutionContext,
    path: &str,
    line_start: Option<usize>,
    line_end: Option<usize>,
) -> ToolResult {
    let content = match read_to_string(context, path).await {
        Ok(content) => content,
        Err(result) => return result,
    };

    if line_start.is_none() && line_end.is_none() {
        return if content.is_empty() {
            ToolResult::Empty
        } else {
            ToolResult::Success(truncate_output(content))
        };
    }

    let start = line_start.unwrap_or(1).saturating_sub(1);
    let end = line_end.unwrap_or(usize::MAX);
    let selected: String = content
        .split_inclusive('\n')
        .enumerate()
        .filter(|(i, _)| *i >= start && *i < end)
        .map(|(_, line)| line)
        .collect();

    if selected.is_empty() {
        ToolResult::Empty
    } else {
        ToolResult::Success(truncate_output(selected))
    }
}

pub(crate) async fn write(
    context: &ExecutionContext,
    path: &str,
    content: &str,
    create_new: bool,
) -> ToolResult {
    match write_string(context, path, content, create_new).await {
        Ok(()) if create_new => ToolResult::success(format!("Successfully created {}", path)),
        Ok(()) => ToolResult::success(format!("Successfully wrote to {}", path)),
        Err(result) => result,
    }
}

/// Replaces every occurrence (`occurrence < 1`) or only the n-th one.
pub(crate) async fn edit(
    context: &ExecutionContext,
    path: &str,
    search: &str,
    replace: &str,
    occurrence: i64,
) -> ToolResult {
    if search.is_empty() {
        return ToolResult::error("Search text must not be empty");
    }
    let content = match read_to_string(context, path).await {
        Ok(content) => content,
        Err(result) => return result,
    };

    let found = content.matches(search).count();
    if found == 0 {
        return ToolResult::error(format!("Search text not found in {}", path));
    }

    let (updated, replaced) = if occurrence < 1 {
        (content.replace(search, replace), found)
    } else {
        let nth = occurrence as usize;
        match content.match_indices(search).nth(nth - 1) {
            Some((idx, _)) => {
                let mut updated = String::with_capacity(content.len());
                updated.push_str(&content[..idx]);
                updated.push_str(replace);
                updated.push_str(&content[idx + search.len()..]);
                (updated, 1)
            }
            None => {
                return ToolResult::error(format!("Only {} occurrences found", found));
            }
        }
    };

    match write_string(context, path, &updated, false).await {
        Ok(()) => ToolResult::success(format!(
            "Successfully replaced {} occurrence(s) in {}",
            replaced, path
        )),
        Err(result) => result,
    }
}

/// Deletes a regular file. Directories and symlinks are refused.
pub(crate) async fn delete(context: &ExecutionContext, path: &str) -> ToolResult {
    let resolved = match context.resolve(path) {
        Ok(resolved) => resolved,
        Err(e) => return security_error(path, e),
    };
    match secure_fs::remove_file(&resolved) {
        Ok(()) => ToolResult::success(format!("Successfully deleted {}", path)),
        Err(SecurityError::InvalidPath(_)) => ToolResult::error(format!("Not a file: {}", path)),
        Err(e) => security_error(path, e),
    }
}
