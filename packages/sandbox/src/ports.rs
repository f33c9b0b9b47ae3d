// ABOUTME: Port to process discovery inside the sandbox
// ABOUTME: Tries ss, then netstat, then a raw /proc scan, parsing each tool's output

use crate::lifecycle::SandboxLifecycle;
use crate::types::{DiscoveryMethod, FindPidsResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

static SS_PID: Lazy<Regex> = Lazy::new(|| Regex::new(r"pid=(\d+)").expect("valid regex"));
// Older iproute2: users:(("node",1234,20))
static SS_LEGACY_PID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\(\("[^"]*",(\d+),"#).expect("valid regex"));
static NETSTAT_PID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(\d+)/\S+").expect("valid regex"));
static FD_SOCKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/proc/(\d+)/fd/\d+\s+socket:\[(\d+)\]\s*$").expect("valid regex")
});

const PROC_NET_SCRIPT: &str = "cat /proc/net/tcp /proc/net/tcp6 2>/dev/null";
const PROC_FD_SCRIPT: &str = "for fd in /proc/[0-9]*/fd/*; do \
    link=$(readlink \"$fd\" 2>/dev/null) || continue; \
    case \"$link\" in socket:*) echo \"$fd $link\";; esac; \
    done";

const TCP_LISTEN_STATE: &str = "0A";

/// Result of running a single discovery strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// Tool missing or the exec itself failed
    Unavailable(String),
    Ran(BTreeSet<u32>),
}

pub struct PortResolver {
    lifecycle: Arc<SandboxLifecycle>,
}

impl PortResolver {
    pub fn new(lifecycle: Arc<SandboxLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Find pids listening on `port`. The first strategy that yields pids wins.
    pub async fn find_pids_by_port(&self, port: u16) -> FindPidsResult {
        let strategies = [
            DiscoveryMethod::Ss,
            DiscoveryMethod::Netstat,
            DiscoveryMethod::Procfs,
        ];
        let mut unavailable = Vec::new();

        for method in strategies {
            match self.run_strategy(method, port).await {
                StrategyOutcome::Ran(pids) if !pids.is_empty() => {
                    info!("Port {} held by {:?} (via {})", port, pids, method);
                    return FindPidsResult {
                        success: true,
                        port,
                        pids: pids.into_iter().collect(),
                        method: Some(method),
                        error: None,
                    };
                }
                StrategyOutcome::Ran(_) => {
                    debug!("{} found nothing on port {}", method, port);
                }
                StrategyOutcome::Unavailable(reason) => {
                    debug!("{} unavailable: {}", method, reason);
                    unavailable.push(format!("{}: {}", method, reason));
                }
            }
        }

        if unavailable.len() == strategies.len() {
            warn!("No port discovery strategy could run for port {}", port);
            return FindPidsResult {
                success: false,
                port,
                pids: Vec::new(),
                method: None,
                error: Some(format!(
                    "Port discovery unavailable ({})",
                    unavailable.join("; ")
                )),
            };
        }

        FindPidsResult {
            success: true,
            port,
            pids: Vec::new(),
            method: None,
            error: None,
        }
    }

    async fn run_strategy(&self, method: DiscoveryMethod, port: u16) -> StrategyOutcome {
        match method {
            DiscoveryMethod::Ss => {
                self.run_tool(&["ss", "-ltnp"], |out| parse_ss_output(out, port))
                    .await
            }
            DiscoveryMethod::Netstat => {
                self.run_tool(&["netstat", "-ltnp"], |out| parse_netstat_output(out, port))
                    .await
            }
            DiscoveryMethod::Procfs => self.scan_procfs(port).await,
        }
    }

    async fn run_tool<F>(&self, argv: &[&str], parse: F) -> StrategyOutcome
    where
        F: Fn(&str) -> BTreeSet<u32>,
    {
        let command = argv.iter().map(|s| s.to_string()).collect();
        match self.lifecycle.exec_in_active(command, None).await {
            Ok(exec) if exec.tool_missing() => {
                StrategyOutcome::Unavailable(format!("{} not installed", argv[0]))
            }
            Ok(exec) => StrategyOutcome::Ran(parse(&exec.output)),
            Err(e) => StrategyOutcome::Unavailable(e.to_string()),
        }
    }

    async fn scan_procfs(&self, port: u16) -> StrategyOutcome {
        let tables = match self.sh(PROC_NET_SCRIPT).await {
            Ok(output) => output,
            Err(reason) => return StrategyOutcome::Unavailable(reason),
        };

        let inodes = parse_proc_net_tcp(&tables, port);
        if inodes.is_empty() {
            return StrategyOutcome::Ran(BTreeSet::new());
        }

        let links = match self.sh(PROC_FD_SCRIPT).await {
            Ok(output) => output,
            Err(reason) => return StrategyOutcome::Unavailable(reason),
        };

        let owners = parse_socket_owners(&links);
        StrategyOutcome::Ran(
            inodes
                .iter()
                .filter_map(|inode| owners.get(inode))
                .flatten()
                .copied()
                .collect(),
        )
    }

    // Only an engine failure makes procfs unavailable; unreadable files just mean no data
    async fn sh(&self, script: &str) -> std::result::Result<String, String> {
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        self.lifecycle
            .exec_in_active(command, None)
            .await
            .map(|exec| exec.output)
            .map_err(|e| e.to_string())
    }
}

fn mentions_port(line: &str, port: u16) -> bool {
    // Local address column ends in :PORT (or .PORT on some netstat builds)
    line.split_whitespace().any(|field| {
        field
            .rsplit_once([':', '.'])
            .map(|(_, p)| p == port.to_string())
            .unwrap_or(false)
    })
}

/// Pids from `ss -ltnp` lines bound to `port`
pub fn parse_ss_output(output: &str, port: u16) -> BTreeSet<u32> {
    let lines: Vec<&str> = output.lines().filter(|l| mentions_port(l, port)).collect();

    let mut pids: BTreeSet<u32> = lines
        .iter()
        .flat_map(|line| SS_PID.captures_iter(line))
        .filter_map(|c| c[1].parse().ok())
        .collect();

    if pids.is_empty() {
        pids = lines
            .iter()
            .flat_map(|line| SS_LEGACY_PID.captures_iter(line))
            .filter_map(|c| c[1].parse().ok())
            .collect();
    }

    pids
}

/// Pids from `netstat -ltnp` lines bound to `port`
pub fn parse_netstat_output(output: &str, port: u16) -> BTreeSet<u32> {
    output
        .lines()
        .filter(|l| mentions_port(l, port))
        .flat_map(|line| NETSTAT_PID.captures_iter(line))
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Socket inodes of LISTEN entries on `port` from /proc/net/tcp{,6}
pub fn parse_proc_net_tcp(content: &str, port: u16) -> BTreeSet<u64> {
    let port_hex = format!("{:04X}", port);
    let mut inodes = BTreeSet::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 || parts[0] == "sl" {
            continue;
        }

        if parts[3] != TCP_LISTEN_STATE {
            continue;
        }

        // Local address is HEXIP:HEXPORT
        let Some((_ip, port_part)) = parts[1].rsplit_once(':') else {
            continue;
        };
        if !port_part.eq_ignore_ascii_case(&port_hex) {
            continue;
        }

        // Inode is at parts[9]; 0 means the socket is being torn down
        if let Ok(inode) = parts[9].parse::<u64>() {
            if inode != 0 {
                inodes.insert(inode);
            }
        }
    }

    inodes
}

/// Map socket inode -> owning pids from `/proc/PID/fd/N socket:[INODE]` lines
pub fn parse_socket_owners(listing: &str) -> HashMap<u64, BTreeSet<u32>> {
    let mut owners: HashMap<u64, BTreeSet<u32>> = HashMap::new();
    for line in listing.lines() {
        if let Some(c) = FD_SOCKET.captures(line.trim()) {
            if let (Ok(pid), Ok(inode)) = (c[1].parse::<u32>(), c[2].parse::<u64>()) {
                owners.entry(inode).or_default().insert(pid);
            }
        }
    }
    owners
}
