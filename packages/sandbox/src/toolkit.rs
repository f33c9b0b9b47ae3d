// ABOUTME: Process-wide sandbox toolkit handle
// ABOUTME: Wires lifecycle, executor, registry, resolver, controller and search to one runtime

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::executor::CommandExecutor;
use crate::lifecycle::{RuntimeKind, SandboxInfo, SandboxLifecycle, SandboxState};
use crate::ports::PortResolver;
use crate::process::{ProcessController, Signal};
use crate::runtime::{ContainerRuntime, DockerRuntime, RuntimeError};
use crate::search::WorkspaceSearch;
use crate::servers::{ServerRegistry, DEFAULT_LOG_LINES};
use crate::types::{
    ExecuteRequest, ExecuteResult, FindPidsResult, FreePortResult, ImagesResult, KillResult,
    LaunchResult, ListServersResult, SearchRequest, SearchResult, ServerLogsResult,
    ShutdownResult, StartServerRequest, StartServerResult, StopServerResult, SwitchResult,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct SandboxToolkit {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<SandboxConfig>,
    lifecycle: Arc<SandboxLifecycle>,
    executor: CommandExecutor,
    resolver: Arc<PortResolver>,
    controller: Arc<ProcessController>,
    servers: ServerRegistry,
    search: WorkspaceSearch,
}

impl SandboxToolkit {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        let config = Arc::new(config);
        let lifecycle = Arc::new(SandboxLifecycle::new(runtime.clone(), config.clone()));
        let resolver = Arc::new(PortResolver::new(lifecycle.clone()));
        let controller = Arc::new(ProcessController::new(
            lifecycle.clone(),
            resolver.clone(),
        ));

        Self {
            executor: CommandExecutor::new(lifecycle.clone(), config.clone()),
            servers: ServerRegistry::new(
                lifecycle.clone(),
                resolver.clone(),
                controller.clone(),
                config.clone(),
            ),
            search: WorkspaceSearch::new(lifecycle.clone()),
            runtime,
            config,
            lifecycle,
            resolver,
            controller,
        }
    }

    /// Build a toolkit backed by the Docker engine named in `config`
    pub fn connect(config: SandboxConfig) -> Result<Self> {
        let runtime = DockerRuntime::connect(&config).map_err(|e| match e {
            RuntimeError::ConfigError(msg) => SandboxError::Configuration(msg),
            other => SandboxError::Runtime(other),
        })?;
        Ok(Self::new(Arc::new(runtime), config))
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub async fn launch(
        &self,
        kind: RuntimeKind,
        host_volume_path: &Path,
        reuse_container_id: Option<&str>,
    ) -> LaunchResult {
        let previous = self.lifecycle.info().await.map(|i| i.container_id);
        match self
            .lifecycle
            .launch(kind, host_volume_path, reuse_container_id)
            .await
        {
            Ok(state) => {
                if previous.as_deref() != Some(state.container_id.as_str()) {
                    self.servers.clear().await;
                }
                LaunchResult {
                    success: true,
                    sandbox: Some(SandboxInfo::from(&state)),
                    error: None,
                }
            }
            Err(e) => {
                // A failed launch may already have torn the old sandbox down
                if self.lifecycle.info().await.is_none() {
                    self.servers.clear().await;
                }
                warn!("Sandbox launch failed: {}", e);
                LaunchResult {
                    success: false,
                    sandbox: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn switch_runtime(
        &self,
        kind: RuntimeKind,
        host_volume_path: Option<&Path>,
    ) -> SwitchResult {
        match self.lifecycle.switch_runtime(kind, host_volume_path).await {
            Ok(outcome) => {
                if outcome.switched {
                    self.servers.clear().await;
                }
                SwitchResult {
                    success: true,
                    switched: outcome.switched,
                    sandbox: Some(SandboxInfo::from(&outcome.state)),
                    error: None,
                }
            }
            Err(e) => {
                if self.lifecycle.info().await.is_none() {
                    self.servers.clear().await;
                }
                warn!("Runtime switch to {} failed: {}", kind, e);
                SwitchResult {
                    success: false,
                    switched: false,
                    sandbox: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn shutdown(&self) -> ShutdownResult {
        let result = self.lifecycle.shutdown().await;
        self.servers.clear().await;
        match result {
            Ok(()) => ShutdownResult {
                success: true,
                error: None,
            },
            Err(e) => ShutdownResult {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }

    pub async fn info(&self) -> Option<SandboxInfo> {
        self.lifecycle.info().await
    }

    pub async fn state(&self) -> Option<SandboxState> {
        self.lifecycle.active().await.ok()
    }

    pub async fn execute(&self, request: ExecuteRequest) -> ExecuteResult {
        self.executor.execute(request).await
    }

    pub async fn start_server(&self, request: StartServerRequest) -> StartServerResult {
        self.servers.start_server(request).await
    }

    pub async fn stop_server(&self, name: Option<&str>, port: Option<u16>) -> StopServerResult {
        self.servers.stop_server(name, port).await
    }

    pub async fn list_servers(&self) -> ListServersResult {
        self.servers.list_servers().await
    }

    pub async fn get_server_logs(&self, name: &str, lines: Option<usize>) -> ServerLogsResult {
        self.servers
            .get_server_logs(name, lines.unwrap_or(DEFAULT_LOG_LINES))
            .await
    }

    pub async fn find_pids_by_port(&self, port: u16) -> FindPidsResult {
        self.resolver.find_pids_by_port(port).await
    }

    pub async fn kill_pid(&self, pid: u32, signal: Option<Signal>) -> KillResult {
        self.controller.kill_pid(pid, signal.unwrap_or_default()).await
    }

    pub async fn free_port(&self, port: u16, timeout: Option<Duration>) -> FreePortResult {
        self.controller
            .free_port(port, timeout.unwrap_or(self.config.free_port_timeout))
            .await
    }

    pub async fn search(&self, request: SearchRequest) -> SearchResult {
        self.search.search(request).await
    }

    pub async fn list_images(&self) -> ImagesResult {
        match self.runtime.list_images().await {
            Ok(images) => ImagesResult {
                success: true,
                images,
                error: None,
            },
            Err(e) => ImagesResult {
                success: false,
                images: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}
