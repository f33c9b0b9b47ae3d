// ABOUTME: Sandbox configuration loaded from the environment
// ABOUTME: Engine endpoint, base images, timeouts and server log location with validated defaults

use crate::lifecycle::RuntimeKind;
use agentbox_config::constants::*;
use agentbox_config::{env_flag, env_string, parse_env_or_default_with_validation};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_NODE_IMAGE: &str = "node:20-alpine";
pub const DEFAULT_PYTHON_IMAGE: &str = "python:3.12-alpine";
pub const DEFAULT_SERVER_LOG_DIR: &str = "/tmp/agentbox-servers";

const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SERVER_START_GRACE_MS: u64 = 1_000;
const DEFAULT_FREE_PORT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_STOP_GRACE_SECS: i64 = 3;
const DEFAULT_PULL_TIMEOUT_SECS: u64 = 600;
const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Raw endpoint string, `None` when neither variable is set
    pub docker_host: Option<String>,
    pub tls_verify: bool,
    /// Directory holding key.pem, cert.pem and ca.pem
    pub cert_path: PathBuf,
    pub node_image: String,
    pub python_image: String,
    pub exec_timeout: Duration,
    pub server_start_grace: Duration,
    pub free_port_timeout: Duration,
    pub server_log_dir: String,
    pub stop_grace_secs: i64,
    pub pull_timeout: Duration,
    pub engine_timeout_secs: u64,
    pub network: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            tls_verify: false,
            cert_path: default_cert_path(),
            node_image: DEFAULT_NODE_IMAGE.to_string(),
            python_image: DEFAULT_PYTHON_IMAGE.to_string(),
            exec_timeout: Duration::from_millis(DEFAULT_EXEC_TIMEOUT_MS),
            server_start_grace: Duration::from_millis(DEFAULT_SERVER_START_GRACE_MS),
            free_port_timeout: Duration::from_millis(DEFAULT_FREE_PORT_TIMEOUT_MS),
            server_log_dir: DEFAULT_SERVER_LOG_DIR.to_string(),
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
            pull_timeout: Duration::from_secs(DEFAULT_PULL_TIMEOUT_SECS),
            engine_timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
            network: None,
        }
    }
}

impl SandboxConfig {
    /// Read configuration from environment variables, keeping defaults for
    /// anything unset or invalid
    pub fn from_env() -> Self {
        let cert_path = env_string(&[DOCKER_CERT_PATH])
            .map(PathBuf::from)
            .unwrap_or_else(default_cert_path);

        Self {
            docker_host: env_string(&[AGENTBOX_DOCKER_HOST, DOCKER_HOST]),
            tls_verify: env_flag(DOCKER_TLS_VERIFY),
            cert_path,
            node_image: env_string(&[AGENTBOX_NODE_IMAGE])
                .unwrap_or_else(|| DEFAULT_NODE_IMAGE.to_string()),
            python_image: env_string(&[AGENTBOX_PYTHON_IMAGE])
                .unwrap_or_else(|| DEFAULT_PYTHON_IMAGE.to_string()),
            exec_timeout: Duration::from_millis(parse_env_or_default_with_validation(
                AGENTBOX_EXEC_TIMEOUT_MS,
                DEFAULT_EXEC_TIMEOUT_MS,
                |v| v > 0,
            )),
            server_start_grace: Duration::from_millis(parse_env_or_default_with_validation(
                AGENTBOX_SERVER_START_GRACE_MS,
                DEFAULT_SERVER_START_GRACE_MS,
                |v| v <= 60_000,
            )),
            free_port_timeout: Duration::from_millis(parse_env_or_default_with_validation(
                AGENTBOX_FREE_PORT_TIMEOUT_MS,
                DEFAULT_FREE_PORT_TIMEOUT_MS,
                |v| v > 0,
            )),
            server_log_dir: env_string(&[AGENTBOX_SERVER_LOG_DIR])
                .map(|dir| dir.trim_end_matches('/').to_string())
                .filter(|dir| dir.starts_with('/'))
                .unwrap_or_else(|| DEFAULT_SERVER_LOG_DIR.to_string()),
            stop_grace_secs: parse_env_or_default_with_validation(
                AGENTBOX_STOP_GRACE_SECS,
                DEFAULT_STOP_GRACE_SECS,
                |v| (0..=300).contains(&v),
            ),
            pull_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                AGENTBOX_PULL_TIMEOUT_SECS,
                DEFAULT_PULL_TIMEOUT_SECS,
                |v| v > 0,
            )),
            engine_timeout_secs: parse_env_or_default_with_validation(
                AGENTBOX_ENGINE_TIMEOUT_SECS,
                DEFAULT_ENGINE_TIMEOUT_SECS,
                |v| v > 0,
            ),
            network: env_string(&[AGENTBOX_NETWORK]),
        }
    }

    /// Base image for a runtime flavor
    pub fn image_for(&self, kind: RuntimeKind) -> &str {
        match kind {
            RuntimeKind::Node => &self.node_image,
            RuntimeKind::Python => &self.python_image,
        }
    }
}

fn default_cert_path() -> PathBuf {
    dirs::home_dir()
        .or_else(|| env_string(&[HOME, USERPROFILE]).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docker")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            AGENTBOX_DOCKER_HOST,
            DOCKER_HOST,
            DOCKER_TLS_VERIFY,
            DOCKER_CERT_PATH,
            AGENTBOX_NODE_IMAGE,
            AGENTBOX_EXEC_TIMEOUT_MS,
            AGENTBOX_SERVER_LOG_DIR,
            AGENTBOX_STOP_GRACE_SECS,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear_env();
        let config = SandboxConfig::from_env();
        assert!(config.docker_host.is_none());
        assert!(!config.tls_verify);
        assert_eq!(config.node_image, "node:20-alpine");
        assert_eq!(config.exec_timeout, Duration::from_millis(30_000));
        assert_eq!(config.server_log_dir, "/tmp/agentbox-servers");
        assert!(config.cert_path.ends_with(".docker"));
    }

    #[test]
    #[serial]
    fn test_agentbox_host_wins_over_docker_host() {
        clear_env();
        std::env::set_var(DOCKER_HOST, "unix:///var/run/docker.sock");
        std::env::set_var(AGENTBOX_DOCKER_HOST, "tcp://10.0.0.2:2375");
        let config = SandboxConfig::from_env();
        assert_eq!(config.docker_host.as_deref(), Some("tcp://10.0.0.2:2375"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_keep_defaults() {
        clear_env();
        std::env::set_var(AGENTBOX_EXEC_TIMEOUT_MS, "0");
        std::env::set_var(AGENTBOX_STOP_GRACE_SECS, "soon");
        std::env::set_var(AGENTBOX_SERVER_LOG_DIR, "relative/logs");
        let config = SandboxConfig::from_env();
        assert_eq!(config.exec_timeout, Duration::from_millis(30_000));
        assert_eq!(config.stop_grace_secs, 3);
        assert_eq!(config.server_log_dir, "/tmp/agentbox-servers");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_image_for_kind() {
        clear_env();
        std::env::set_var(AGENTBOX_NODE_IMAGE, "node:22-bookworm");
        let config = SandboxConfig::from_env();
        assert_eq!(config.image_for(RuntimeKind::Node), "node:22-bookworm");
        assert_eq!(config.image_for(RuntimeKind::Python), "python:3.12-alpine");
        clear_env();
    }
}
