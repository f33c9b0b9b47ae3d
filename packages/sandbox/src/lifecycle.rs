// ABOUTME: Single active sandbox lifecycle
// ABOUTME: Launches or adopts the container, switches runtime flavor and tears it down

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, VolumeBinding};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Mount point of the host volume, also the default working directory
pub const CONTAINER_WORKSPACE: &str = "/root/workspace";

/// Keeps the container alive on any base image with a POSIX shell
const IDLE_LOOP: &str = "while true; do sleep 3600; done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Node,
    Python,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Node => "node",
            RuntimeKind::Python => "python",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node" | "nodejs" => Ok(RuntimeKind::Node),
            "python" | "python3" => Ok(RuntimeKind::Python),
            other => Err(format!(
                "Unknown runtime '{}'. Expected one of: node, python",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxState {
    pub container_id: String,
    pub runtime_kind: RuntimeKind,
    pub host_volume_path: PathBuf,
    pub container_volume_path: String,
}

/// Read-only view of the active sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub runtime_kind: RuntimeKind,
    pub container_id: String,
    pub host_volume_path: String,
    pub container_volume_path: String,
}

impl From<&SandboxState> for SandboxInfo {
    fn from(state: &SandboxState) -> Self {
        Self {
            runtime_kind: state.runtime_kind,
            container_id: state.container_id.clone(),
            host_volume_path: state.host_volume_path.display().to_string(),
            container_volume_path: state.container_volume_path.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub switched: bool,
    pub state: SandboxState,
}

pub struct SandboxLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<SandboxConfig>,
    state: RwLock<Option<SandboxState>>,
}

impl SandboxLifecycle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: Arc<SandboxConfig>) -> Self {
        Self {
            runtime,
            config,
            state: RwLock::new(None),
        }
    }

    /// Launch a fresh container, or adopt `reuse_container_id` without touching the engine.
    /// Any other active sandbox is torn down first.
    pub async fn launch(
        &self,
        kind: RuntimeKind,
        host_volume_path: &Path,
        reuse_container_id: Option<&str>,
    ) -> Result<SandboxState> {
        let mut guard = self.state.write().await;

        if let (Some(id), Some(current)) = (reuse_container_id, guard.as_ref()) {
            if current.container_id == id {
                debug!("Container {} is already the active sandbox", id);
                return Ok(current.clone());
            }
        }

        if let Some(previous) = guard.take() {
            info!(
                "Tearing down active sandbox {} before launch",
                previous.container_id
            );
            self.teardown(&previous).await;
        }

        let host_path = absolutize(host_volume_path)?;

        let state = match reuse_container_id {
            Some(id) => {
                info!("Reusing container {} as {} sandbox", id, kind);
                SandboxState {
                    container_id: id.to_string(),
                    runtime_kind: kind,
                    host_volume_path: host_path,
                    container_volume_path: CONTAINER_WORKSPACE.to_string(),
                }
            }
            None => self.start_container(kind, host_path).await?,
        };

        *guard = Some(state.clone());
        Ok(state)
    }

    /// Replace the active sandbox with one of `new_kind` over the same host volume.
    /// Same kind is a no-op. Everything outside the volume is lost.
    pub async fn switch_runtime(
        &self,
        new_kind: RuntimeKind,
        host_volume_path: Option<&Path>,
    ) -> Result<SwitchOutcome> {
        let mut guard = self.state.write().await;

        if let Some(current) = guard.as_ref() {
            if current.runtime_kind == new_kind {
                debug!("Sandbox already runs {}, nothing to switch", new_kind);
                return Ok(SwitchOutcome {
                    switched: false,
                    state: current.clone(),
                });
            }
        }

        let host_path = match (host_volume_path, guard.as_ref()) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(current)) => current.host_volume_path.clone(),
            (None, None) => return Err(SandboxError::NoActiveSandbox),
        };

        if let Some(previous) = guard.take() {
            info!(
                "Switching sandbox {} from {} to {}",
                previous.container_id, previous.runtime_kind, new_kind
            );
            self.teardown(&previous).await;
        }

        let state = self
            .start_container(new_kind, absolutize(&host_path)?)
            .await?;
        *guard = Some(state.clone());

        Ok(SwitchOutcome {
            switched: true,
            state,
        })
    }

    /// Stop and remove the active container. State is cleared even if the engine refuses.
    pub async fn shutdown(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        match guard.take() {
            Some(state) => {
                info!("Shutting down sandbox {}", state.container_id);
                self.teardown(&state).await;
            }
            None => debug!("Shutdown requested with no active sandbox"),
        }
        Ok(())
    }

    pub async fn info(&self) -> Option<SandboxInfo> {
        self.state.read().await.as_ref().map(SandboxInfo::from)
    }

    pub async fn active(&self) -> Result<SandboxState> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(SandboxError::NoActiveSandbox)
    }

    /// Run a command in the active container, defaulting to the workspace directory
    pub async fn exec_in_active(
        &self,
        command: Vec<String>,
        working_dir: Option<String>,
    ) -> Result<ExecOutput> {
        // Snapshot the id so a concurrent switch is not blocked for the whole exec
        let container_id = self.active().await?.container_id;
        let working_dir = working_dir.unwrap_or_else(|| CONTAINER_WORKSPACE.to_string());

        Ok(self
            .runtime
            .exec(&container_id, command, Some(working_dir))
            .await?)
    }

    async fn start_container(&self, kind: RuntimeKind, host_path: PathBuf) -> Result<SandboxState> {
        tokio::fs::create_dir_all(&host_path).await?;

        let short_id = uuid::Uuid::new_v4().simple().to_string();
        let spec = ContainerSpec {
            image: self.config.image_for(kind).to_string(),
            name: Some(format!("agentbox-{}-{}", kind, &short_id[..8])),
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                IDLE_LOOP.to_string(),
            ]),
            working_dir: Some(CONTAINER_WORKSPACE.to_string()),
            volumes: vec![VolumeBinding {
                host_path: host_path.display().to_string(),
                container_path: CONTAINER_WORKSPACE.to_string(),
                readonly: false,
            }],
            labels: HashMap::from([("agentbox.runtime".to_string(), kind.to_string())]),
            ..Default::default()
        };

        let started = self.runtime.start(&spec).await?;
        info!(
            "Launched {} sandbox {} ({}) with {} mounted at {}",
            kind,
            started.name,
            started.id,
            host_path.display(),
            CONTAINER_WORKSPACE
        );

        Ok(SandboxState {
            container_id: started.id,
            runtime_kind: kind,
            host_volume_path: host_path,
            container_volume_path: CONTAINER_WORKSPACE.to_string(),
        })
    }

    async fn teardown(&self, state: &SandboxState) {
        if let Err(e) = self.runtime.stop(&state.container_id, true).await {
            warn!(
                "Failed to stop sandbox container {}: {}",
                state.container_id, e
            );
        }
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
