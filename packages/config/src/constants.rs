// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across agentbox

// Container Engine Connection
pub const AGENTBOX_DOCKER_HOST: &str = "AGENTBOX_DOCKER_HOST";
pub const DOCKER_HOST: &str = "DOCKER_HOST"; // Engine-standard fallback
pub const DOCKER_TLS_VERIFY: &str = "DOCKER_TLS_VERIFY";
pub const DOCKER_CERT_PATH: &str = "DOCKER_CERT_PATH";
pub const AGENTBOX_ENGINE_TIMEOUT_SECS: &str = "AGENTBOX_ENGINE_TIMEOUT_SECS";
pub const AGENTBOX_PULL_TIMEOUT_SECS: &str = "AGENTBOX_PULL_TIMEOUT_SECS";
pub const AGENTBOX_STOP_GRACE_SECS: &str = "AGENTBOX_STOP_GRACE_SECS";
pub const AGENTBOX_NETWORK: &str = "AGENTBOX_NETWORK";

// Base Images
pub const AGENTBOX_NODE_IMAGE: &str = "AGENTBOX_NODE_IMAGE";
pub const AGENTBOX_PYTHON_IMAGE: &str = "AGENTBOX_PYTHON_IMAGE";

// Execution Limits
pub const AGENTBOX_EXEC_TIMEOUT_MS: &str = "AGENTBOX_EXEC_TIMEOUT_MS";
pub const AGENTBOX_FREE_PORT_TIMEOUT_MS: &str = "AGENTBOX_FREE_PORT_TIMEOUT_MS";

// Background Servers
pub const AGENTBOX_SERVER_START_GRACE_MS: &str = "AGENTBOX_SERVER_START_GRACE_MS";
pub const AGENTBOX_SERVER_LOG_DIR: &str = "AGENTBOX_SERVER_LOG_DIR";

// System Environment Variables
pub const HOME: &str = "HOME";
pub const USERPROFILE: &str = "USERPROFILE"; // Windows
