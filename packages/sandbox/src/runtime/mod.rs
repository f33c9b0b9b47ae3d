// ABOUTME: Container runtime contract consumed by the sandbox lifecycle
// ABOUTME: Defines the start/exec/stop/pull interface and its request and result types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;
pub mod endpoint;

pub use docker::DockerRuntime;
pub use endpoint::EngineEndpoint;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Exec error: {0}")]
    ExecError(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Everything needed to create and start one container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub command: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub env_vars: HashMap<String, String>,
    pub volumes: Vec<VolumeBinding>,
    pub ports: Vec<PortBinding>,
    pub network: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

impl VolumeBinding {
    /// Engine bind string, `host:container:rw`
    pub fn to_bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path,
            self.container_path,
            if self.readonly { "ro" } else { "rw" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String, // tcp or udp
}

/// What the engine reports back after a successful start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedContainer {
    pub id: String,
    pub name: String,
    pub state: String,
    pub mounts: Vec<String>,
}

/// Output of a finished exec, stdout and stderr interleaved as received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: String,
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    pub fn new(output: impl Into<String>, exit_code: i64) -> Self {
        Self {
            output: output.into(),
            exit_code: Some(exit_code),
        }
    }

    /// Missing exit codes count as success; the engine omits them for some exec drivers
    pub fn succeeded(&self) -> bool {
        self.exit_code.unwrap_or(0) == 0
    }

    /// 126 (not executable) and 127 (not found) are the shell's "no such tool" codes
    pub fn tool_missing(&self) -> bool {
        matches!(self.exit_code, Some(126) | Some(127))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub tags: Vec<String>,
    pub size_bytes: i64,
    pub created: i64,
}

/// Container engine backend for the sandbox
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull the image if needed, then create and start a container
    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer>;

    /// Run a command inside a running container and wait for it to exit
    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
    ) -> Result<ExecOutput>;

    /// Stop a container and optionally remove it
    async fn stop(&self, container_id: &str, remove: bool) -> Result<()>;

    /// Pull an image unless it already exists locally
    async fn pull_if_missing(&self, image: &str) -> Result<()>;

    /// List images available to the engine
    async fn list_images(&self) -> Result<Vec<ImageSummary>>;
}
