// ABOUTME: Error taxonomy for sandbox operations
// ABOUTME: Aggregate failures reported to callers, rendered into result records by the toolkit

use crate::runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No active sandbox. Launch one first")]
    NoActiveSandbox,

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("Port {port} is already in use by pid(s) {}", format_pids(.pids))]
    PortConflict { port: u16, pids: Vec<u32> },

    #[error("Server '{name}' is already running")]
    ServerAlreadyRunning { name: String },

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Invalid server name '{name}': {reason}")]
    InvalidServerName { name: String, reason: String },

    #[error("Server '{name}' exited during startup. Last log lines:\n{log_tail}")]
    LaunchVerificationFailure { name: String, log_tail: String },

    #[error("Port {port} still held by pid(s) {} after SIGKILL", format_pids(.remaining))]
    PartialReclamation { port: u16, remaining: Vec<u32> },

    #[error("Tool unavailable in sandbox: {0}")]
    ToolUnavailable(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

fn format_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(|pid| pid.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
