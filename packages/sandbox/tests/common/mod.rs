// ABOUTME: Scripted in-memory container runtime shared by the integration tests
// ABOUTME: Simulates a process table with groups, listening ports, kill semantics and common tools

#![allow(dead_code)]

use agentbox_sandbox::runtime::Result;
use agentbox_sandbox::{
    ContainerRuntime, ContainerSpec, ExecOutput, ImageSummary, RuntimeError, SandboxConfig,
    SandboxToolkit, StartedContainer,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Call {
    Start(ContainerSpec),
    Exec {
        container_id: String,
        command: Vec<String>,
    },
    Stop {
        container_id: String,
        remove: bool,
    },
    Pull(String),
    ListImages,
}

#[derive(Debug, Clone, Default)]
pub struct FakeProcess {
    pub ignores_term: bool,
    pub zombie: bool,
    /// Process group id; 0 means the exec's own group
    pub group: u32,
}

#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<Call>,
    pub processes: BTreeMap<u32, FakeProcess>,
    pub listeners: BTreeMap<u16, Vec<u32>>,
    pub logs: HashMap<String, String>,
    pub ss_available: bool,
    pub netstat_available: bool,
    pub engine_down: bool,
    pub stop_fails: bool,
    pub launch_crashes: bool,
    pub launch_zombie: bool,
    pub launch_log: String,
    pub grep_response: (String, i64),
    pub next_pid: u32,
    pub next_container: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            processes: BTreeMap::new(),
            listeners: BTreeMap::new(),
            logs: HashMap::new(),
            ss_available: true,
            netstat_available: true,
            engine_down: false,
            stop_fails: false,
            launch_crashes: false,
            launch_zombie: false,
            launch_log: "server listening\n".to_string(),
            grep_response: (String::new(), 1),
            next_pid: 100,
            next_container: 0,
        }
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Start a process listening on `port` and return its pid
    pub fn spawn_listener(&self, port: u16, ignores_term: bool) -> u32 {
        self.with(|s| {
            let pid = s.next_pid;
            s.next_pid += 1;
            s.processes.insert(
                pid,
                FakeProcess {
                    ignores_term,
                    zombie: false,
                    group: pid,
                },
            );
            s.listeners.entry(port).or_default().push(pid);
            pid
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Exec { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn count_starts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Start(_)))
            .count()
    }

    pub fn count_stops(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Stop { .. }))
            .count()
    }

    pub fn kill_commands(&self) -> Vec<Vec<String>> {
        self.exec_commands()
            .into_iter()
            .filter(|c| c.first().map(String::as_str) == Some("kill"))
            .collect()
    }

    pub fn group_members(&self, group: u32) -> Vec<u32> {
        self.with(|s| {
            s.processes
                .iter()
                .filter(|(_, p)| p.group == group)
                .map(|(pid, _)| *pid)
                .collect()
        })
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.with(|s| s.processes.contains_key(&pid))
    }

    fn dispatch(&self, argv: &[String]) -> ExecOutput {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["env", rest @ ..] => {
                let cmd: Vec<String> = rest
                    .iter()
                    .skip_while(|a| a.contains('='))
                    .map(|a| a.to_string())
                    .collect();
                self.dispatch(&cmd)
            }
            ["echo", words @ ..] => ExecOutput::new(format!("{}\n", words.join(" ")), 0),
            ["ss", "-ltnp"] => self.with(|s| {
                if !s.ss_available {
                    return ExecOutput::new("sh: ss: not found\n", 127);
                }
                let mut out = String::from(
                    "State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process\n",
                );
                for (port, pids) in &s.listeners {
                    for pid in pids {
                        out.push_str(&format!(
                            "LISTEN 0 511 0.0.0.0:{} 0.0.0.0:* users:((\"node\",pid={},fd=21))\n",
                            port, pid
                        ));
                    }
                }
                ExecOutput::new(out, 0)
            }),
            ["netstat", "-ltnp"] => self.with(|s| {
                if !s.netstat_available {
                    return ExecOutput::new("sh: netstat: not found\n", 127);
                }
                let mut out = String::from(
                    "Proto Recv-Q Send-Q Local Address Foreign Address State PID/Program name\n",
                );
                for (port, pids) in &s.listeners {
                    for pid in pids {
                        out.push_str(&format!(
                            "tcp 0 0 0.0.0.0:{} 0.0.0.0:* LISTEN {}/node\n",
                            port, pid
                        ));
                    }
                }
                ExecOutput::new(out, 0)
            }),
            ["kill", signal, "--", target] => match target.strip_prefix('-') {
                Some(group) => self.kill_group(signal, group),
                None => self.kill(signal, target),
            },
            ["kill", signal, pid] => self.kill(signal, pid),
            ["tail", "-n", lines, path] => self.with(|s| match s.logs.get(*path) {
                Some(content) => {
                    let n: usize = lines.parse().unwrap_or(10);
                    let all: Vec<&str> = content.lines().collect();
                    let start = all.len().saturating_sub(n);
                    let mut out = all[start..].join("\n");
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    ExecOutput::new(out, 0)
                }
                None => ExecOutput::new(
                    format!("tail: can't open '{}': No such file or directory\n", path),
                    1,
                ),
            }),
            ["grep", ..] => self.with(|s| {
                let (out, code) = s.grep_response.clone();
                ExecOutput::new(out, code)
            }),
            ["sh", "-c", script] => self.shell(script),
            [cmd, ..] => ExecOutput::new(format!("sh: {}: not found\n", cmd), 127),
            [] => ExecOutput::new("", 0),
        }
    }

    fn shell(&self, script: &str) -> ExecOutput {
        if script.starts_with("cat /proc/net/tcp") {
            return self.with(|s| {
                let mut out = String::from(
                    "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n",
                );
                for (port, pids) in &s.listeners {
                    for pid in pids {
                        out.push_str(&format!(
                            "   0: 00000000:{:04X} 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 {} 1 0000000000000000 100 0 0 10 0\n",
                            port,
                            inode_for(*pid)
                        ));
                    }
                }
                ExecOutput::new(out, 0)
            });
        }

        if script.starts_with("for fd in /proc") {
            return self.with(|s| {
                let mut out = String::new();
                for pids in s.listeners.values() {
                    for pid in pids {
                        out.push_str(&format!("/proc/{}/fd/3 socket:[{}]\n", pid, inode_for(*pid)));
                    }
                }
                ExecOutput::new(out, 0)
            });
        }

        if script.starts_with("ps -A") {
            return self.with(|s| {
                let out: String = s
                    .processes
                    .iter()
                    .map(|(pid, p)| format!("{} {}\n", pid, if p.zombie { "Z" } else { "S" }))
                    .collect();
                ExecOutput::new(out, 0)
            });
        }

        if script.contains("nohup") {
            return self.with(|s| {
                let log_path = script
                    .rsplit("> '")
                    .next()
                    .and_then(|rest| rest.split('\'').next())
                    .unwrap_or("/tmp/unknown.log")
                    .to_string();
                let command = script.split("sh -c ").nth(1).unwrap_or_default();
                let pid = s.next_pid;
                s.next_pid += 1;
                if s.launch_crashes {
                    s.logs.insert(log_path, "Error: Cannot find module 'app.js'\n".to_string());
                    return ExecOutput::new(format!("{}\n", pid), 0);
                }

                s.logs.insert(log_path, s.launch_log.clone());
                // setsid makes the wrapping shell a group leader
                let group = if script.contains("setsid") { pid } else { 0 };
                s.processes.insert(
                    pid,
                    FakeProcess {
                        zombie: s.launch_zombie,
                        group,
                        ..FakeProcess::default()
                    },
                );
                // Lists and pipelines leave a child of the wrapper in the same group
                if command.contains("&&") || command.contains(" | ") {
                    let child = s.next_pid;
                    s.next_pid += 1;
                    s.processes.insert(
                        child,
                        FakeProcess {
                            group,
                            ..FakeProcess::default()
                        },
                    );
                }
                ExecOutput::new(format!("{}\n", pid), 0)
            });
        }

        ExecOutput::new("", 0)
    }

    fn kill(&self, signal: &str, pid: &str) -> ExecOutput {
        let Ok(pid) = pid.parse::<u32>() else {
            return ExecOutput::new("kill: bad pid\n", 1);
        };
        self.with(|s| {
            let Some(process) = s.processes.get(&pid).cloned() else {
                return ExecOutput::new(format!("kill: ({}) - No such process\n", pid), 1);
            };
            let forceful = matches!(signal, "-KILL" | "-9");
            if forceful || !process.ignores_term {
                remove_process(s, pid);
            }
            ExecOutput::new("", 0)
        })
    }

    fn kill_group(&self, signal: &str, group: &str) -> ExecOutput {
        let Ok(group) = group.parse::<u32>() else {
            return ExecOutput::new("kill: bad process group\n", 1);
        };
        self.with(|s| {
            let members: Vec<(u32, FakeProcess)> = s
                .processes
                .iter()
                .filter(|(_, p)| group != 0 && p.group == group)
                .map(|(pid, p)| (*pid, p.clone()))
                .collect();
            if members.is_empty() {
                return ExecOutput::new(format!("kill: (-{}) - No such process\n", group), 1);
            }
            let forceful = matches!(signal, "-KILL" | "-9");
            for (pid, process) in members {
                if forceful || !process.ignores_term {
                    remove_process(s, pid);
                }
            }
            ExecOutput::new("", 0)
        })
    }
}

fn remove_process(s: &mut FakeState, pid: u32) {
    s.processes.remove(&pid);
    for pids in s.listeners.values_mut() {
        pids.retain(|p| *p != pid);
    }
    s.listeners.retain(|_, pids| !pids.is_empty());
}

fn inode_for(pid: u32) -> u64 {
    50_000 + pid as u64
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer> {
        self.with(|s| {
            s.calls.push(Call::Start(spec.clone()));
            if s.engine_down {
                return Err(RuntimeError::ContainerError("engine unreachable".to_string()));
            }
            s.next_container += 1;
            Ok(StartedContainer {
                id: format!("fake-{}", s.next_container),
                name: spec.name.clone().unwrap_or_default(),
                state: "running".to_string(),
                mounts: spec.volumes.iter().map(|v| v.to_bind()).collect(),
            })
        })
    }

    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        _working_dir: Option<String>,
    ) -> Result<ExecOutput> {
        let engine_down = self.with(|s| {
            s.calls.push(Call::Exec {
                container_id: container_id.to_string(),
                command: command.clone(),
            });
            s.engine_down
        });
        if engine_down {
            return Err(RuntimeError::ExecError("engine unreachable".to_string()));
        }

        if let ["sleep", secs] = command.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            let secs: f64 = secs.parse().unwrap_or(1.0);
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            return Ok(ExecOutput::new("", 0));
        }

        Ok(self.dispatch(&command))
    }

    async fn stop(&self, container_id: &str, remove: bool) -> Result<()> {
        self.with(|s| {
            s.calls.push(Call::Stop {
                container_id: container_id.to_string(),
                remove,
            });
            if s.stop_fails {
                Err(RuntimeError::ContainerError("stop refused".to_string()))
            } else {
                Ok(())
            }
        })
    }

    async fn pull_if_missing(&self, image: &str) -> Result<()> {
        self.with(|s| s.calls.push(Call::Pull(image.to_string())));
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        self.with(|s| s.calls.push(Call::ListImages));
        Ok(vec![ImageSummary {
            id: "sha256:abc".to_string(),
            tags: vec!["node:20-alpine".to_string()],
            size_bytes: 1024,
            created: 0,
        }])
    }
}

/// Config with short timings so tests stay fast
pub fn test_config() -> SandboxConfig {
    SandboxConfig {
        server_start_grace: Duration::from_millis(10),
        free_port_timeout: Duration::from_millis(500),
        ..SandboxConfig::default()
    }
}

pub fn toolkit(runtime: &Arc<FakeRuntime>) -> SandboxToolkit {
    SandboxToolkit::new(runtime.clone(), test_config())
}
