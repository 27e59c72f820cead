//! Shell command execution rooted at the boundary.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::ToolResult;
use super::executor::{ExecutionContext, truncate_output};

pub(crate) async fn run(context: &ExecutionContext, command: &str, timeout: Duration) -> ToolResult {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(context.boundary().root())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return ToolResult::error(format!("Failed to execute command: {}", e)),
    };

    tracing::debug!(command = %command, timeout_secs = timeout.as_secs(), "Running command");

    let output = tokio::select! {
        biased;
        _ = context.cancel_token().cancelled() => {
            return ToolResult::error("Command cancelled");
        }
        result = tokio::time::timeout(timeout, child.wait_with_output()) => result,
    };

    match output {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            let mut combined = match output.status.code() {
                Some(0) => "Command executed successfully".to_string(),
                Some(code) => format!("Command exited with code {}", code),
                None => "Command terminated by signal".to_string(),
            };
            if !stdout.is_empty() {
                combined.push_str("\nStdout:\n");
                combined.push_str(&stdout);
            }
            if !stderr.is_empty() {
                combined.push_str("\nStderr:\n");
                combined.push_str(&stderr);
            }

            let combined = truncate_output(combined);
            if output.status.success() {
                ToolResult::Success(combined)
            } else {
                ToolResult::Error(combined)
            }
        }
        Ok(Err(e)) => ToolResult::error(format!("Failed to execute command: {}", e)),
        Err(_) => ToolResult::error(format!(
            "Command timed out after {} seconds",
            timeout.as_secs()
        )),
    }
}
