// ABOUTME: Command executor for running one-off commands in the active sandbox
// ABOUTME: Applies environment, races the exec against a wall-clock timeout and reports a record

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::lifecycle::SandboxLifecycle;
use crate::shell::{display_command, is_valid_env_key};
use crate::types::{ExecuteRequest, ExecuteResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct CommandExecutor {
    lifecycle: Arc<SandboxLifecycle>,
    config: Arc<SandboxConfig>,
}

impl CommandExecutor {
    pub fn new(lifecycle: Arc<SandboxLifecycle>, config: Arc<SandboxConfig>) -> Self {
        Self { lifecycle, config }
    }

    /// Execute a command and wait for completion or timeout.
    ///
    /// A non-zero exit status is still `success: true`; `exit_code` carries it.
    /// On timeout the exec future is dropped but the process in the container is
    /// not signalled.
    pub async fn execute(&self, request: ExecuteRequest) -> ExecuteResult {
        let command_line = display_command(&request.command, &request.args);

        // `env` would read a malformed key as an option or as part of the assignment
        if let Some(key) = request.env.keys().find(|k| !is_valid_env_key(k)) {
            let e = SandboxError::Configuration(format!(
                "Invalid environment variable name '{}'",
                key
            ));
            warn!("Refusing to execute {}: {}", command_line, e);
            return failure(command_line, 0, e);
        }

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.exec_timeout);
        let argv = build_argv(&request);

        info!("Executing in sandbox: {}", command_line);
        let started = Instant::now();

        let outcome = tokio::time::timeout(
            timeout,
            self.lifecycle.exec_in_active(argv, request.workdir.clone()),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(exec)) => {
                debug!(
                    "Command finished in {}ms with exit code {:?}",
                    duration_ms, exec.exit_code
                );
                ExecuteResult {
                    success: true,
                    output: exec.output,
                    duration_ms,
                    exit_code: exec.exit_code,
                    error: None,
                    command: command_line,
                }
            }
            Ok(Err(e)) => {
                warn!("Command failed: {}", e);
                failure(command_line, duration_ms, e)
            }
            Err(_) => {
                let e = SandboxError::CommandTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                };
                warn!("{}: {}", e, command_line);
                failure(command_line, duration_ms, e)
            }
        }
    }
}

fn failure(command: String, duration_ms: u64, error: SandboxError) -> ExecuteResult {
    ExecuteResult {
        success: false,
        output: String::new(),
        duration_ms,
        exit_code: None,
        error: Some(error.to_string()),
        command,
    }
}

/// `env K=V ... command args...`, or just `command args...` without environment
fn build_argv(request: &ExecuteRequest) -> Vec<String> {
    let mut argv = Vec::with_capacity(request.env.len() + request.args.len() + 2);
    if !request.env.is_empty() {
        argv.push("env".to_string());
        argv.extend(request.env.iter().map(|(k, v)| format!("{}={}", k, v)));
    }
    argv.push(request.command.clone());
    argv.extend(request.args.iter().cloned());
    argv
}
