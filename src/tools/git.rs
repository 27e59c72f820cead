//! Git operations run inside the boundary root.

use std::process::Stdio;

use tokio::process::Command;

use super::ToolResult;
use super::executor::{ExecutionContext, truncate_output};

async fn run_git(context: &ExecutionContext, args: &[&str]) -> Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(context.boundary().root())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| e.to_string())?;
    let output = tokio::select! {
        biased;
        _ = context.cancel_token().cancelled() => return Err("Command cancelled".into()),
        result = tokio::time::timeout(context.timeout(), child.wait_with_output()) => result,
    };

    match output {
        Ok(Ok(output)) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.trim().is_empty() {
                Err(String::from_utf8_lossy(&output.stdout).into_owned())
            } else {
                Err(stderr.into_owned())
            }
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("Command timed out".into()),
    }
}

/// Path argument relative to the root, after the boundary check.
fn path_arg(context: &ExecutionContext, file: &str) -> Result<String, ToolResult> {
    let resolved = context
        .resolve(file)
        .map_err(|e| ToolResult::error(format!("{}: {}", file, e)))?;
    let relative = context.boundary().relative(&resolved);
    if relative.as_os_str().is_empty() {
        Ok(".".into())
    } else {
        Ok(relative.to_string_lossy().into_owned())
    }
}

pub(crate) async fn status(context: &ExecutionContext) -> ToolResult {
    match run_git(context, &["status", "--short"]).await {
        Ok(output) if output.trim().is_empty() => ToolResult::success("Working tree clean"),
        Ok(output) => ToolResult::Success(truncate_output(output.trim_end().to_string())),
        Err(e) => ToolResult::error(format!("Error: {}", e.trim())),
    }
}

pub(crate) async fn diff(context: &ExecutionContext, staged: bool, file: Option<&str>) -> ToolResult {
    let mut args = vec!["diff".to_string()];
    if staged {
        args.push("--cached".into());
    }
    if let Some(file) = file {
        match path_arg(context, file) {
            Ok(path) => {
                args.push("--".into());
                args.push(path);
            }
            Err(result) => return result,
        }
    }

    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match run_git(context, &args).await {
        Ok(output) if output.trim().is_empty() => {
            ToolResult::success(if staged { "No staged changes" } else { "No changes" })
        }
        Ok(output) => ToolResult::Success(truncate_output(output)),
        Err(e) => ToolResult::error(format!("Error: {}", e.trim())),
    }
}

pub(crate) async fn log(context: &ExecutionContext, count: usize, file: Option<&str>) -> ToolResult {
    let mut args = vec![
        "log".to_string(),
        format!("-{}", count.max(1)),
        "--pretty=format:%h - %an, %ar : %s".to_string(),
    ];
    if let Some(file) = file {
        match path_arg(context, file) {
            Ok(path) => {
                args.push("--".into());
                args.push(path);
            }
            Err(result) => return result,
        }
    }

    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match run_git(context, &args).await {
        Ok(output) if output.trim().is_empty() => ToolResult::success("No commits found"),
        Ok(output) => ToolResult::Success(truncate_output(output.trim().to_string())),
        Err(e) => ToolResult::error(format!("Error: {}", e.trim())),
    }
}

pub(crate) async fn commit(
    context: &ExecutionContext,
    message: &str,
    files: &[String],
    add_all: bool,
) -> ToolResult {
    if message.trim().is_empty() {
        return ToolResult::error("Commit message must not be empty");
    }

    if add_all {
        if let Err(e) = run_git(context, &["add", "-A"]).await {
            return ToolResult::error(format!("Error staging files: {}", e.trim()));
        }
    } else {
        for file in files {
            let path = match path_arg(context, file) {
                Ok(path) => path,
                Err(result) => return result,
            };
            if let Err(e) = run_git(context, &["add", "--", &path]).await {
                return ToolResult::error(format!("Error staging {}: {}", file, e.trim()));
            }
        }
    }

    match run_git(context, &["commit", "-m", message]).await {
        Ok(output) => ToolResult::success(format!(
            "Successfully created commit: {}",
            output.trim()
        )),
        Err(e) => ToolResult::error(format!("Error creating commit: {}", e.trim())),
    }
}
