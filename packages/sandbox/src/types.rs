// ABOUTME: Request and result records for sandbox operations
// ABOUTME: Every public operation reports one of these serializable records instead of an error

use crate::lifecycle::SandboxInfo;
use crate::runtime::ImageSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which port discovery strategy produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    Ss,
    Netstat,
    Procfs,
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscoveryMethod::Ss => "ss",
            DiscoveryMethod::Netstat => "netstat",
            DiscoveryMethod::Procfs => "procfs",
        })
    }
}

/// Tracked background server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub name: String,
    pub container_id: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub log_file: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Wall-clock limit; the configured default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ExecuteRequest {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartServerRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub port: u16,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub workdir: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartServerResult {
    pub success: bool,
    pub name: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub log_file: Option<String>,
    /// Pids holding the port when the launch was refused
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_pids: Vec<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopServerResult {
    pub success: bool,
    pub name: Option<String>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub warning: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListServersResult {
    pub servers: Vec<ServerRecord>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLogsResult {
    pub success: bool,
    pub name: String,
    pub logs: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindPidsResult {
    pub success: bool,
    pub port: u16,
    pub pids: Vec<u32>,
    pub method: Option<DiscoveryMethod>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillResult {
    pub success: bool,
    pub pid: u32,
    pub signal: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreePortResult {
    pub success: bool,
    pub port: u16,
    pub killed_pids: Vec<u32>,
    pub remaining_pids: Vec<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub pattern: String,
    pub path: Option<String>,
    pub include: Option<String>,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

pub const DEFAULT_MAX_RESULTS: usize = 100;

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl SearchRequest {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            path: None,
            include: None,
            ignore_case: false,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub success: bool,
    pub matches: Vec<SearchMatch>,
    pub truncated: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchResult {
    pub success: bool,
    pub sandbox: Option<SandboxInfo>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchResult {
    pub success: bool,
    pub switched: bool,
    pub sandbox: Option<SandboxInfo>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResult {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesResult {
    pub success: bool,
    pub images: Vec<ImageSummary>,
    pub error: Option<String>,
}
