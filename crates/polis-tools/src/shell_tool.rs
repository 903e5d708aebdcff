//! Shell execution tool with denylist and timeout enforcement.
//!
//! Commands run through `sh -c` (or `cmd /C` on Windows) in the task's
//! workspace directory when one is recorded. On timeout the process is
//! killed (SIGKILL on Unix, taskkill semantics via `kill_on_drop` on
//! Windows) and the tool returns `command_timeout`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use polis_core::{Tool, ToolCtx, ToolError, ToolOutput};

use crate::command_policy::CommandPolicy;

/// Maximum allowed timeout in seconds.
const MAX_TIMEOUT_SECS: u64 = 300;

/// Default timeout when none is specified.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Execute a shell command with guardrails.
pub struct RunCommandTool {
    policy: CommandPolicy,
}

impl RunCommandTool {
    /// Create the tool with the given denylist policy.
    pub fn new(policy: CommandPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "在任务工作目录中执行 shell 命令，返回 exit_code/stdout/stderr。危险命令会被拒绝。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "要执行的命令"
                },
                "timeout": {
                    "type": "integer",
                    "description": "超时秒数（默认 30，上限 300）"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let command = args["command"].as_str().unwrap_or_default();
        let timeout_secs = args["timeout"]
            .as_u64()
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        if let Some(pattern) = self.policy.blocked_by(command) {
            warn!(command, pattern, "command blocked by policy");
            return Err(ToolError::Failed {
                code: "command_blocked",
                message: format!("命令被安全策略拦截（匹配 {pattern}）"),
            });
        }

        let workspace = ctx
            .task_id
            .as_deref()
            .and_then(|task| ctx.state.workspace_for(task));

        debug!(agent_id = %ctx.agent_id, command, timeout_secs, "run_command");

        let mut cmd = if cfg!(windows) {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        if let Some(dir) = &workspace {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| ToolError::Failed {
            code: "command_failed",
            message: format!("无法启动命令: {e}"),
        })?;

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::Failed {
                    code: "command_failed",
                    message: format!("命令执行失败: {e}"),
                })
            }
            Err(_) => {
                // wait_with_output consumed the child; kill_on_drop has
                // already sent the kill when the future was dropped.
                warn!(command, timeout_secs, "command timed out, killed");
                return Err(ToolError::Failed {
                    code: "command_timeout",
                    message: format!("命令超时（{timeout_secs} 秒），已终止"),
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!(command, exit_code, "command exited non-zero");
        }

        Ok(ToolOutput::value(json!({
            "exit_code": exit_code,
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        })))
    }
}
