// ABOUTME: Signal delivery and port reclamation for processes inside the sandbox
// ABOUTME: SIGTERM first, poll until the port clears, then SIGKILL whatever is left

use crate::error::{Result, SandboxError};
use crate::lifecycle::SandboxLifecycle;
use crate::ports::PortResolver;
use crate::types::{FreePortResult, KillResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

// GNU ps, then busybox ps, then raw /proc
const PROCESS_TABLE_SCRIPT: &str = "ps -A -o pid=,stat= 2>/dev/null \
    || ps -o pid,stat 2>/dev/null \
    || cat /proc/[0-9]*/stat 2>/dev/null";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    #[default]
    Term,
    Kill,
    Int,
    Hup,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
            Signal::Int => "INT",
            Signal::Hup => "HUP",
        }
    }

    pub fn number(&self) -> i32 {
        match self {
            Signal::Term => 15,
            Signal::Kill => 9,
            Signal::Int => 2,
            Signal::Hup => 1,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_ascii_uppercase();
        let s = s.strip_prefix("SIG").unwrap_or(&s);
        match s {
            "TERM" | "15" => Ok(Signal::Term),
            "KILL" | "9" => Ok(Signal::Kill),
            "INT" | "2" => Ok(Signal::Int),
            "HUP" | "1" => Ok(Signal::Hup),
            other => Err(format!("Unsupported signal '{}'", other)),
        }
    }
}

pub struct ProcessController {
    lifecycle: Arc<SandboxLifecycle>,
    resolver: Arc<PortResolver>,
}

impl ProcessController {
    pub fn new(lifecycle: Arc<SandboxLifecycle>, resolver: Arc<PortResolver>) -> Self {
        Self {
            lifecycle,
            resolver,
        }
    }

    /// Send `signal` to `pid`, trying `kill -NAME` then `kill -NUM`
    pub async fn kill_pid(&self, pid: u32, signal: Signal) -> KillResult {
        let forms = [signal.name().to_string(), signal.number().to_string()];
        let mut last_error = String::new();

        for form in forms {
            let command = vec!["kill".to_string(), format!("-{}", form), pid.to_string()];
            match self.lifecycle.exec_in_active(command, None).await {
                Ok(exec) if exec.succeeded() => {
                    debug!("Sent SIG{} to pid {}", signal, pid);
                    return KillResult {
                        success: true,
                        pid,
                        signal: signal.name().to_string(),
                        error: None,
                    };
                }
                Ok(exec) => {
                    let output = exec.output.trim();
                    last_error = if output.is_empty() {
                        format!("kill exited with {:?}", exec.exit_code)
                    } else {
                        output.to_string()
                    };
                }
                // Nothing else will work without a sandbox
                Err(e @ SandboxError::NoActiveSandbox) => {
                    last_error = e.to_string();
                    break;
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        warn!("Failed to send SIG{} to pid {}: {}", signal, pid, last_error);
        KillResult {
            success: false,
            pid,
            signal: signal.name().to_string(),
            error: Some(last_error),
        }
    }

    /// Signal the process group led by `pgid`, falling back to the leader alone
    /// when no such group exists (servers launched without setsid)
    pub async fn kill_group(&self, pgid: u32, signal: Signal) -> KillResult {
        let command = vec![
            "kill".to_string(),
            format!("-{}", signal.name()),
            "--".to_string(),
            format!("-{}", pgid),
        ];
        match self.lifecycle.exec_in_active(command, None).await {
            Ok(exec) if exec.succeeded() => {
                debug!("Sent SIG{} to process group {}", signal, pgid);
                return KillResult {
                    success: true,
                    pid: pgid,
                    signal: signal.name().to_string(),
                    error: None,
                };
            }
            Ok(exec) => debug!(
                "Group kill of {} failed ({}), signalling the pid",
                pgid,
                exec.output.trim()
            ),
            Err(e @ SandboxError::NoActiveSandbox) => {
                return KillResult {
                    success: false,
                    pid: pgid,
                    signal: signal.name().to_string(),
                    error: Some(e.to_string()),
                };
            }
            Err(e) => debug!("Group kill of {} failed ({}), signalling the pid", pgid, e),
        }

        self.kill_pid(pgid, signal).await
    }

    /// Terminate everything listening on `port`, escalating to SIGKILL after `timeout`
    pub async fn free_port(&self, port: u16, timeout: Duration) -> FreePortResult {
        let initial = self.resolver.find_pids_by_port(port).await;
        if !initial.success {
            return FreePortResult {
                success: false,
                port,
                killed_pids: Vec::new(),
                remaining_pids: Vec::new(),
                error: initial.error,
            };
        }

        if initial.pids.is_empty() {
            debug!("Port {} is already free", port);
            return FreePortResult {
                success: true,
                port,
                killed_pids: Vec::new(),
                remaining_pids: Vec::new(),
                error: None,
            };
        }

        info!(
            "Freeing port {} held by {:?} (timeout: {:?})",
            port, initial.pids, timeout
        );

        let mut killed: BTreeSet<u32> = BTreeSet::new();
        for pid in &initial.pids {
            self.kill_pid(*pid, Signal::Term).await;
            killed.insert(*pid);
        }

        let deadline = Instant::now() + timeout;
        let mut remaining = initial.pids;

        while Instant::now() < deadline {
            sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;

            remaining = self.resolve_or_keep(port, remaining).await;
            if remaining.is_empty() {
                info!("Port {} freed after SIGTERM", port);
                return FreePortResult {
                    success: true,
                    port,
                    killed_pids: killed.into_iter().collect(),
                    remaining_pids: Vec::new(),
                    error: None,
                };
            }

            for pid in &remaining {
                if killed.insert(*pid) {
                    debug!("New listener {} appeared on port {}", pid, port);
                    self.kill_pid(*pid, Signal::Term).await;
                }
            }
        }

        warn!(
            "Port {} still held by {:?} after {:?}, sending SIGKILL",
            port, remaining, timeout
        );
        for pid in &remaining {
            self.kill_pid(*pid, Signal::Kill).await;
            killed.insert(*pid);
        }

        sleep(POLL_INTERVAL).await;
        let remaining = self.resolve_or_keep(port, remaining).await;

        let error = if remaining.is_empty() {
            info!("Port {} freed after SIGKILL", port);
            None
        } else {
            Some(
                SandboxError::PartialReclamation {
                    port,
                    remaining: remaining.clone(),
                }
                .to_string(),
            )
        };

        FreePortResult {
            success: remaining.is_empty(),
            port,
            killed_pids: killed.into_iter().collect(),
            remaining_pids: remaining,
            error,
        }
    }

    /// True when `pid` is in the container's process table and not a zombie
    pub async fn is_alive(&self, pid: u32) -> Result<bool> {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            PROCESS_TABLE_SCRIPT.to_string(),
        ];
        let exec = self.lifecycle.exec_in_active(command, None).await?;
        let table = parse_process_table(&exec.output);

        Ok(match table.get(&pid) {
            Some(state) => !state.starts_with('Z') && !state.starts_with('X'),
            None => false,
        })
    }

    async fn resolve_or_keep(&self, port: u16, previous: Vec<u32>) -> Vec<u32> {
        let result = self.resolver.find_pids_by_port(port).await;
        if result.success {
            result.pids
        } else {
            debug!(
                "Re-resolving port {} failed, assuming unchanged: {:?}",
                port, result.error
            );
            previous
        }
    }
}

/// pid -> state code from any of the supported process table formats
pub fn parse_process_table(output: &str) -> HashMap<u32, String> {
    let mut table = HashMap::new();

    for line in output.lines() {
        // /proc/PID/stat: "PID (comm) S ..." where comm may contain spaces
        if let Some((head, tail)) = line.rsplit_once(')') {
            let pid = head.split_whitespace().next().and_then(|p| p.parse().ok());
            let state = tail.split_whitespace().next();
            if let (Some(pid), Some(state)) = (pid, state) {
                table.insert(pid, state.to_string());
            }
            continue;
        }

        let mut fields = line.split_whitespace();
        if let (Some(pid), Some(state)) = (fields.next(), fields.next()) {
            // Header rows don't parse
            if let Ok(pid) = pid.parse::<u32>() {
                table.insert(pid, state.to_string());
            }
        }
    }

    table
}
