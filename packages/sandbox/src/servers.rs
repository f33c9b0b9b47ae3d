// ABOUTME: Registry of background servers started inside the sandbox
// ABOUTME: Launches detached processes with per-name log files, verifies startup and stops them by name or port

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::lifecycle::{SandboxLifecycle, CONTAINER_WORKSPACE};
use crate::ports::PortResolver;
use crate::process::{ProcessController, Signal};
use crate::shell::{display_command, is_valid_env_key, shell_escape, shell_join};
use crate::types::{
    ListServersResult, ServerLogsResult, ServerRecord, StartServerRequest, StartServerResult,
    StopServerResult,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_LOG_LINES: usize = 50;
const FAILURE_LOG_LINES: usize = 20;

// Minimal images may lack setsid; the server then stays in the exec's process group
const SETSID_LAUNCHER: &str =
    "if command -v setsid >/dev/null 2>&1; then launcher=setsid; else launcher=; fi; ";

/// Server names become log file names, so keep them to a safe alphabet
pub fn validate_server_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SandboxError::InvalidServerName {
            name: name.to_string(),
            reason: "Server name cannot be empty".to_string(),
        });
    }

    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(SandboxError::InvalidServerName {
            name: name.to_string(),
            reason: "Server name cannot contain path traversal sequences (.. / \\)".to_string(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(SandboxError::InvalidServerName {
            name: name.to_string(),
            reason: "Server name can only contain letters, digits, '.', '-' and '_'".to_string(),
        });
    }

    Ok(())
}

pub struct ServerRegistry {
    lifecycle: Arc<SandboxLifecycle>,
    resolver: Arc<PortResolver>,
    controller: Arc<ProcessController>,
    config: Arc<SandboxConfig>,
    servers: RwLock<HashMap<String, ServerRecord>>,
}

impl ServerRegistry {
    pub fn new(
        lifecycle: Arc<SandboxLifecycle>,
        resolver: Arc<PortResolver>,
        controller: Arc<ProcessController>,
        config: Arc<SandboxConfig>,
    ) -> Self {
        Self {
            lifecycle,
            resolver,
            controller,
            config,
            servers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn start_server(&self, request: StartServerRequest) -> StartServerResult {
        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("port-{}", request.port));

        match self.try_start(&name, &request).await {
            Ok(record) => StartServerResult {
                success: true,
                name: record.name,
                port: record.port,
                pid: record.pid,
                log_file: Some(record.log_file),
                conflicting_pids: Vec::new(),
                error: None,
            },
            Err(e) => {
                warn!("Failed to start server '{}': {}", name, e);
                let conflicting_pids = match &e {
                    SandboxError::PortConflict { pids, .. } => pids.clone(),
                    _ => Vec::new(),
                };
                StartServerResult {
                    success: false,
                    name,
                    port: request.port,
                    pid: None,
                    log_file: None,
                    conflicting_pids,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_start(&self, name: &str, request: &StartServerRequest) -> Result<ServerRecord> {
        validate_server_name(name)?;
        if let Some(key) = request.env.keys().find(|k| !is_valid_env_key(k)) {
            return Err(SandboxError::Configuration(format!(
                "Invalid environment variable name '{}'",
                key
            )));
        }

        let container_id = self.lifecycle.active().await?.container_id;

        let probe = self.resolver.find_pids_by_port(request.port).await;
        if !probe.pids.is_empty() {
            return Err(SandboxError::PortConflict {
                port: request.port,
                pids: probe.pids,
            });
        }
        if !probe.success {
            warn!(
                "Could not check whether port {} is free: {}",
                request.port,
                probe.error.unwrap_or_default()
            );
        }

        let log_file = self.log_path(name);
        let command_line = display_command(&request.command, &request.args);

        {
            let mut servers = self.servers.write().await;
            if servers.contains_key(name) {
                return Err(SandboxError::ServerAlreadyRunning {
                    name: name.to_string(),
                });
            }
            // Reserve the name while the process starts
            servers.insert(
                name.to_string(),
                ServerRecord {
                    name: name.to_string(),
                    container_id,
                    port: request.port,
                    pid: None,
                    log_file: log_file.clone(),
                    command: command_line.clone(),
                    started_at: Utc::now(),
                },
            );
        }

        match self.launch(name, request, &log_file).await {
            Ok(pid) => {
                let mut servers = self.servers.write().await;
                let record = servers.get_mut(name).ok_or_else(|| {
                    SandboxError::ServerNotFound(format!("{} (cleared during startup)", name))
                })?;
                record.pid = Some(pid);
                info!(
                    "Started server '{}' on port {} (pid {}): {}",
                    name, request.port, pid, command_line
                );
                Ok(record.clone())
            }
            Err(e) => {
                self.servers.write().await.remove(name);
                Err(e)
            }
        }
    }

    async fn launch(&self, name: &str, request: &StartServerRequest, log_file: &str) -> Result<u32> {
        let script = launch_script(
            &self.config.server_log_dir,
            request.workdir.as_deref().unwrap_or(CONTAINER_WORKSPACE),
            request,
            log_file,
        );
        debug!("Launching server '{}': {}", name, script);

        let exec = tokio::time::timeout(
            self.config.exec_timeout,
            self.lifecycle
                .exec_in_active(vec!["sh".to_string(), "-c".to_string(), script], None),
        )
        .await
        .map_err(|_| SandboxError::CommandTimeout {
            timeout_ms: self.config.exec_timeout.as_millis() as u64,
        })??;

        let pid = exec
            .output
            .lines()
            .rev()
            .find_map(|line| line.trim().parse::<u32>().ok());

        let pid = match pid {
            Some(pid) if exec.succeeded() => pid,
            _ => {
                return Err(SandboxError::LaunchVerificationFailure {
                    name: name.to_string(),
                    log_tail: exec.output.trim().to_string(),
                })
            }
        };

        tokio::time::sleep(self.config.server_start_grace).await;

        if !self.controller.is_alive(pid).await? {
            let log_tail = self
                .tail(log_file, FAILURE_LOG_LINES)
                .await
                .unwrap_or_else(|e| format!("<log unavailable: {}>", e));
            return Err(SandboxError::LaunchVerificationFailure {
                name: name.to_string(),
                log_tail,
            });
        }

        Ok(pid)
    }

    /// Stop a server found by name, or failing that by port. Signal failures
    /// are reported as a warning; the record is dropped either way.
    pub async fn stop_server(&self, name: Option<&str>, port: Option<u16>) -> StopServerResult {
        let record = {
            let mut servers = self.servers.write().await;
            let key = match (name, port) {
                (Some(name), _) => Some(name.to_string()),
                (None, Some(port)) => servers
                    .values()
                    .find(|r| r.port == port)
                    .map(|r| r.name.clone()),
                (None, None) => None,
            };
            key.and_then(|k| servers.remove(&k))
        };

        let Some(record) = record else {
            let target = match (name, port) {
                (Some(name), _) => name.to_string(),
                (None, Some(port)) => format!("port {}", port),
                (None, None) => "no name or port given".to_string(),
            };
            return StopServerResult {
                success: false,
                name: name.map(str::to_string),
                port,
                pid: None,
                warning: None,
                error: Some(SandboxError::ServerNotFound(target).to_string()),
            };
        };

        let active_id = self.lifecycle.active().await.ok().map(|s| s.container_id);
        let warning = match (record.pid, active_id) {
            (_, None) => Some("No active sandbox; record dropped without signalling".to_string()),
            (_, Some(active)) if active != record.container_id => Some(format!(
                "Server belonged to container {} which is no longer active",
                record.container_id
            )),
            (None, Some(_)) => Some("No pid recorded; record dropped without signalling".to_string()),
            (Some(pid), Some(_)) => {
                let kill = self.controller.kill_group(pid, Signal::Term).await;
                kill.error
                    .map(|e| format!("Failed to signal pid {}: {}", pid, e))
            }
        };

        match &warning {
            Some(w) => warn!("Stopped server '{}' with warning: {}", record.name, w),
            None => info!("Stopped server '{}'", record.name),
        }

        StopServerResult {
            success: true,
            name: Some(record.name),
            port: Some(record.port),
            pid: record.pid,
            warning,
            error: None,
        }
    }

    pub async fn list_servers(&self) -> ListServersResult {
        let mut servers: Vec<ServerRecord> = self.servers.read().await.values().cloned().collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        ListServersResult {
            count: servers.len(),
            servers,
        }
    }

    /// Tail a server's log. Untracked names use the conventional path since logs outlive records.
    pub async fn get_server_logs(&self, name: &str, lines: usize) -> ServerLogsResult {
        let log_file = match self.servers.read().await.get(name) {
            Some(record) => Ok(record.log_file.clone()),
            None => validate_server_name(name).map(|_| self.log_path(name)),
        };

        let outcome = match log_file {
            Ok(path) => self.tail(&path, lines).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(logs) => ServerLogsResult {
                success: true,
                name: name.to_string(),
                logs,
                error: None,
            },
            Err(e) => ServerLogsResult {
                success: false,
                name: name.to_string(),
                logs: String::new(),
                error: Some(e.to_string()),
            },
        }
    }

    /// Drop every record; used when the sandbox goes away
    pub async fn clear(&self) {
        let mut servers = self.servers.write().await;
        if !servers.is_empty() {
            debug!("Clearing {} server record(s)", servers.len());
        }
        servers.clear();
    }

    fn log_path(&self, name: &str) -> String {
        format!("{}/{}.log", self.config.server_log_dir, name)
    }

    async fn tail(&self, path: &str, lines: usize) -> Result<String> {
        let exec = self
            .lifecycle
            .exec_in_active(
                vec![
                    "tail".to_string(),
                    "-n".to_string(),
                    lines.to_string(),
                    path.to_string(),
                ],
                None,
            )
            .await?;

        if exec.tool_missing() {
            return Err(SandboxError::ToolUnavailable("tail".to_string()));
        }
        if !exec.succeeded() {
            return Err(SandboxError::ServerNotFound(format!(
                "no log at {}: {}",
                path,
                exec.output.trim()
            )));
        }
        Ok(exec.output)
    }
}

/// One `sh -c` line that starts the server detached and prints its pid.
///
/// The command runs in its own `sh -c`, so lists and pipelines are redirected
/// and backgrounded as a whole and `$!` is that wrapping shell. Under `setsid`
/// the wrapper also leads a process group, which `stop_server` signals.
fn launch_script(
    log_dir: &str,
    workdir: &str,
    request: &StartServerRequest,
    log_file: &str,
) -> String {
    let mut script = format!(
        "mkdir -p {} && cd {} || exit 1; ",
        shell_escape(log_dir),
        shell_escape(workdir)
    );

    for (key, value) in &request.env {
        script.push_str(&format!("export {}={}; ", key, shell_escape(value)));
    }

    let mut command = request.command.clone();
    if !request.args.is_empty() {
        command.push(' ');
        command.push_str(&shell_join(&request.args));
    }

    script.push_str(SETSID_LAUNCHER);
    script.push_str(&format!(
        "nohup $launcher sh -c {} > {} 2>&1 < /dev/null & echo $!",
        shell_escape(&command),
        shell_escape(log_file)
    ));

    script
}
