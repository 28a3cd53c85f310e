use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crew_core::tools::{
    ArgSpec, ArgType, ErrorKind, ExecutionMode, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError,
    ToolOutput,
};

pub struct RunTerminalTool;

#[async_trait]
impl Tool for RunTerminalTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "run_terminal",
            "Run a terminal command and capture {command, returncode, success, stdout, stderr}",
        )
        .arg(ArgSpec::required("command", ArgType::String, "Command to execute"))
        .arg(ArgSpec::optional(
            "cwd",
            ArgType::String,
            "Working directory (defaults to the agent's working directory)",
        ))
        .arg(
            ArgSpec::optional("timeout", ArgType::Integer, "Timeout in seconds (default 30)")
                .with_default(30),
        )
        .arg(
            ArgSpec::optional("shell", ArgType::Boolean, "Run through `sh -c` (default true)")
                .with_default(true),
        )
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let command = args.str("command")?;
        let secs = args.i64("timeout")?;
        if secs < 1 {
            return Err(ToolError::Validation(format!("timeout must be >= 1, got {secs}")));
        }
        let timeout = Duration::from_secs(secs.unsigned_abs());
        let cwd = args
            .opt_str("cwd")
            .map(|c| ctx.resolve(c))
            .unwrap_or_else(|| ctx.working_directory.clone());

        let mut cmd = if args.bool_or("shell", true) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        } else {
            let mut parts = command.split_whitespace();
            let Some(program) = parts.next() else {
                return Ok(spawn_failure(command, "empty command"));
            };
            let mut cmd = Command::new(program);
            cmd.args(parts);
            cmd
        };
        cmd.current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Ok(spawn_failure(command, &e.to_string())),
        };

        // Dropping the wait future kills the child.
        let output = tokio::select! {
            res = tokio::time::timeout(timeout, child.wait_with_output()) => res,
            _ = ctx.abort_signal.cancelled() => {
                return Err(ToolError::Execution("command cancelled".into()));
            }
        };

        match output {
            Err(_) => {
                debug!(command, ?timeout, "command timed out");
                Ok(ToolOutput::failed(
                    ErrorKind::Timeout,
                    record(command, -1, "", "Command timed out"),
                ))
            }
            Ok(Err(e)) => Ok(spawn_failure(command, &e.to_string())),
            Ok(Ok(out)) => {
                let code = out.status.code().unwrap_or(-1);
                let stdout = String::from_utf8_lossy(&out.stdout);
                let stderr = String::from_utf8_lossy(&out.stderr);
                let rec = record(command, code, stdout.trim(), stderr.trim());
                debug!(command, code, "command finished");
                if out.status.success() {
                    Ok(ToolOutput::json(rec))
                } else {
                    Ok(ToolOutput::failed(ErrorKind::Execution, rec))
                }
            }
        }
    }
}

fn record(command: &str, returncode: i32, stdout: &str, stderr: &str) -> Value {
    json!({
        "command": command,
        "returncode": returncode,
        "success": returncode == 0,
        "stdout": stdout,
        "stderr": stderr,
    })
}

fn spawn_failure(command: &str, error: &str) -> ToolOutput {
    ToolOutput::failed(ErrorKind::Execution, record(command, -1, "", error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{call, ctx, temp_dir};
    use std::fs;

    fn tmp_ctx() -> ToolContext {
        ctx(&std::env::temp_dir())
    }

    #[tokio::test]
    async fn captures_trimmed_output() {
        let out = call(
            &RunTerminalTool,
            json!({"command": "echo hello && echo oops 1>&2"}),
            &tmp_ctx(),
        )
        .await
        .unwrap();
        assert!(out.is_success());
        let rec = out.payload.to_json();
        assert_eq!(rec["returncode"], 0);
        assert_eq!(rec["success"], true);
        assert_eq!(rec["stdout"], "hello");
        assert_eq!(rec["stderr"], "oops");
        assert_eq!(rec["command"], "echo hello && echo oops 1>&2");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed_with_record() {
        let out = call(&RunTerminalTool, json!({"command": "exit 3"}), &tmp_ctx())
            .await
            .unwrap();
        assert_eq!(out.failure, Some(ErrorKind::Execution));
        let rec = out.payload.to_json();
        assert_eq!(rec["returncode"], 3);
        assert_eq!(rec["success"], false);
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let started = std::time::Instant::now();
        let out = call(
            &RunTerminalTool,
            json!({"command": "sleep 10", "timeout": 1}),
            &tmp_ctx(),
        )
        .await
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(out.failure, Some(ErrorKind::Timeout));
        let rec = out.payload.to_json();
        assert_eq!(rec["returncode"], -1);
        assert_eq!(rec["stderr"], "Command timed out");
    }

    #[tokio::test]
    async fn without_shell_splits_on_whitespace() {
        let out = call(
            &RunTerminalTool,
            json!({"command": "echo  a   b", "shell": false}),
            &tmp_ctx(),
        )
        .await
        .unwrap();
        assert_eq!(out.payload.to_json()["stdout"], "a b");

        // no shell expansion
        let out = call(
            &RunTerminalTool,
            json!({"command": "echo $HOME", "shell": false}),
            &tmp_ctx(),
        )
        .await
        .unwrap();
        assert_eq!(out.payload.to_json()["stdout"], "$HOME");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let out = call(
            &RunTerminalTool,
            json!({"command": "definitely-not-a-binary-xyz --help", "shell": false}),
            &tmp_ctx(),
        )
        .await
        .unwrap();
        assert_eq!(out.failure, Some(ErrorKind::Execution));
        let rec = out.payload.to_json();
        assert_eq!(rec["returncode"], -1);
        assert!(!rec["stderr"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cwd_resolves_against_workdir() {
        let dir = temp_dir("run_terminal");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub/marker.txt"), "").unwrap();

        let out = call(&RunTerminalTool, json!({"command": "ls", "cwd": "sub"}), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(out.payload.to_json()["stdout"], "marker.txt");

        let out = call(&RunTerminalTool, json!({"command": "ls sub"}), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(out.payload.to_json()["stdout"], "marker.txt");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn runs_in_sequential_lane() {
        assert_eq!(RunTerminalTool.execution_mode(), ExecutionMode::Sequential);
    }
}
