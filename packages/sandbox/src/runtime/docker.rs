// ABOUTME: Docker runtime implementation for the sandbox container
// ABOUTME: Uses bollard to pull, start, exec into and tear down the managed container

use super::{
    ContainerRuntime, ContainerSpec, EngineEndpoint, ExecOutput, ImageSummary, Result,
    RuntimeError, StartedContainer,
};
use crate::config::SandboxConfig;
use agentbox_config::constants::{AGENTBOX_DOCKER_HOST, DOCKER_HOST};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, LogOutput,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    image::{CreateImageOptions, ListImagesOptions},
    Docker, API_DEFAULT_VERSION,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const LABEL_PREFIX: &str = "agentbox";

pub struct DockerRuntime {
    client: Docker,
    pull_timeout: Duration,
    stop_grace_secs: i64,
    network: Option<String>,
}

impl DockerRuntime {
    /// Connect using the configured endpoint. A missing endpoint is a configuration
    /// error; an unusable one degrades to engine auto-detection.
    pub fn connect(config: &SandboxConfig) -> Result<Self> {
        let raw = config.docker_host.as_deref().ok_or_else(|| {
            RuntimeError::ConfigError(format!(
                "No container engine endpoint configured. Set {} or {}",
                AGENTBOX_DOCKER_HOST, DOCKER_HOST
            ))
        })?;

        let endpoint = EngineEndpoint::parse(raw, config.tls_verify);
        info!(
            "Connecting to container engine via {}: {}",
            endpoint.transport(),
            raw
        );

        let client = connect_endpoint(&endpoint, config)
            .map_err(|e| RuntimeError::ConnectionError(e.to_string()))?;

        Ok(Self::with_client(client, config))
    }

    /// Wrap an existing connection
    pub fn with_client(client: Docker, config: &SandboxConfig) -> Self {
        Self {
            client,
            pull_timeout: config.pull_timeout,
            stop_grace_secs: config.stop_grace_secs,
            network: config.network.clone(),
        }
    }

    fn to_bollard_config(&self, spec: &ContainerSpec) -> Config<String> {
        let mut labels = spec.labels.clone();
        labels.insert(format!("{}.managed", LABEL_PREFIX), "true".to_string());

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();

        for port in &spec.ports {
            let container_port = format!("{}/{}", port.container_port, port.protocol);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            let binding = vec![bollard::models::PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(port.host_port.to_string()),
            }];
            port_bindings.insert(container_port, Some(binding));
        }

        let binds: Vec<String> = spec.volumes.iter().map(|v| v.to_bind()).collect();

        let env: Vec<String> = spec
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = bollard::models::HostConfig {
            binds: Some(binds),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            network_mode: spec.network.clone().or_else(|| self.network.clone()),
            // Reap orphaned background processes
            init: Some(true),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            env: Some(env),
            working_dir: spec.working_dir.clone(),
            labels: Some(labels),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::ImageError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(
            "Pulling image: {} (timeout: {:?})",
            image, self.pull_timeout
        );

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            let mut last_status = String::new();
            let mut progress_update_count = 0;

            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = &info.status {
                            if status != &last_status {
                                debug!("Pull status: {}", status);
                                last_status = status.clone();
                            }
                            progress_update_count += 1;
                            if progress_update_count % 10 == 0 {
                                info!("Image pull progress: {}", status);
                            }
                        }
                        if let Some(error) = info.error {
                            return Err(RuntimeError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(RuntimeError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }

            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RuntimeError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    async fn describe(&self, container_id: &str, name: &str) -> StartedContainer {
        match self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                let state = inspect
                    .state
                    .as_ref()
                    .and_then(|s| s.status.as_ref())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());

                let mounts = inspect
                    .mounts
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| match (m.source, m.destination) {
                        (Some(src), Some(dst)) => Some(format!("{}:{}", src, dst)),
                        _ => None,
                    })
                    .collect();

                StartedContainer {
                    id: container_id.to_string(),
                    name: inspect
                        .name
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_else(|| name.to_string()),
                    state,
                    mounts,
                }
            }
            Err(e) => {
                warn!("Failed to inspect container {}: {}", container_id, e);
                StartedContainer {
                    id: container_id.to_string(),
                    name: name.to_string(),
                    state: "unknown".to_string(),
                    mounts: Vec::new(),
                }
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<StartedContainer> {
        let name = spec.name.clone().unwrap_or_default();
        info!("Creating container: {} from {}", name, spec.image);

        self.pull_if_missing(&spec.image).await?;

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let container = self
            .client
            .create_container(options, self.to_bollard_config(spec))
            .await
            .map_err(|e| RuntimeError::ContainerError(e.to_string()))?;

        debug!("Created container: {}", container.id);

        info!("Starting container: {}", container.id);
        self.client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::ContainerError(e.to_string()))?;

        Ok(self.describe(&container.id, &name).await)
    }

    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
    ) -> Result<ExecOutput> {
        debug!(
            "Executing command in container {}: {:?}",
            container_id, command
        );

        let exec_config = CreateExecOptions {
            cmd: Some(command),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir,
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| RuntimeError::ExecError(e.to_string()))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeError::ExecError(e.to_string()))?;

        // stdout and stderr share one buffer so interleaving is preserved
        let mut combined = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::StdErr { message })
                        | Ok(LogOutput::Console { message }) => {
                            combined.extend_from_slice(&message)
                        }
                        Ok(_) => {}
                        Err(e) => return Err(RuntimeError::ExecError(e.to_string())),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::ExecError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::ExecError(e.to_string()))?;

        Ok(ExecOutput {
            output: String::from_utf8_lossy(&combined).into_owned(),
            exit_code: exec_inspect.exit_code,
        })
    }

    async fn stop(&self, container_id: &str, remove: bool) -> Result<()> {
        info!(
            "Stopping container: {} (grace: {}s)",
            container_id, self.stop_grace_secs
        );

        let options = StopContainerOptions {
            t: self.stop_grace_secs,
        };

        match self
            .client
            .stop_container(container_id, Some(options))
            .await
        {
            Ok(_) => {}
            // 304 already stopped, 404 already gone
            Err(BollardError::DockerResponseServerError { status_code, .. })
                if status_code == 304 || status_code == 404 =>
            {
                debug!(
                    "Container {} already stopped or missing ({})",
                    container_id, status_code
                );
            }
            Err(e) => warn!("Failed to stop container {}: {}", container_id, e),
        }

        if !remove {
            return Ok(());
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(_) => info!("Removed container: {}", container_id),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => debug!("Container {} already removed", container_id),
            Err(e) => warn!("Failed to remove container {}: {}", container_id, e),
        }

        Ok(())
    }

    async fn pull_if_missing(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            debug!("Image {} present locally, skipping pull", image);
            return Ok(());
        }
        self.pull_image(image).await
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };

        let images = self
            .client
            .list_images(Some(options))
            .await
            .map_err(|e| RuntimeError::ImageError(e.to_string()))?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                tags: image.repo_tags,
                size_bytes: image.size,
                created: image.created,
            })
            .collect())
    }
}

fn connect_endpoint(
    endpoint: &EngineEndpoint,
    config: &SandboxConfig,
) -> std::result::Result<Docker, BollardError> {
    let timeout = config.engine_timeout_secs;
    match endpoint {
        EngineEndpoint::UnixSocket(path) => connect_unix(path, timeout),
        EngineEndpoint::NamedPipe(path) => connect_named_pipe(path, timeout),
        EngineEndpoint::Tcp { address, tls: false } => {
            Docker::connect_with_http(address, timeout, API_DEFAULT_VERSION)
        }
        EngineEndpoint::Tcp { address, tls: true } => {
            let certs = &config.cert_path;
            Docker::connect_with_ssl(
                address,
                &certs.join("key.pem"),
                &certs.join("cert.pem"),
                &certs.join("ca.pem"),
                timeout,
                API_DEFAULT_VERSION,
            )
        }
        EngineEndpoint::AutoDetect => Docker::connect_with_local_defaults(),
    }
}

#[cfg(unix)]
fn connect_unix(path: &str, timeout: u64) -> std::result::Result<Docker, BollardError> {
    Docker::connect_with_unix(path, timeout, API_DEFAULT_VERSION)
}

#[cfg(not(unix))]
fn connect_unix(path: &str, _timeout: u64) -> std::result::Result<Docker, BollardError> {
    warn!(
        "Unix sockets are not supported on this platform ({}), falling back to auto-detection",
        path
    );
    Docker::connect_with_local_defaults()
}

#[cfg(windows)]
fn connect_named_pipe(path: &str, timeout: u64) -> std::result::Result<Docker, BollardError> {
    Docker::connect_with_named_pipe(path, timeout, API_DEFAULT_VERSION)
}

#[cfg(not(windows))]
fn connect_named_pipe(path: &str, _timeout: u64) -> std::result::Result<Docker, BollardError> {
    warn!(
        "Named pipes are not supported on this platform ({}), falling back to auto-detection",
        path
    );
    Docker::connect_with_local_defaults()
}
