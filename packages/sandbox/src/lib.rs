// ABOUTME: Sandbox execution and process lifecycle for agentbox
// ABOUTME: One managed container with a bound workspace, command execution, background servers and port reclamation

pub mod config;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod ports;
pub mod process;
pub mod runtime;
pub mod search;
pub mod servers;
pub mod shell;
pub mod toolkit;
pub mod types;

pub use config::SandboxConfig;
pub use error::{Result, SandboxError};
pub use executor::CommandExecutor;
pub use lifecycle::{
    RuntimeKind, SandboxInfo, SandboxLifecycle, SandboxState, SwitchOutcome, CONTAINER_WORKSPACE,
};
pub use ports::{PortResolver, StrategyOutcome};
pub use process::{ProcessController, Signal};
pub use runtime::{
    ContainerRuntime, ContainerSpec, DockerRuntime, EngineEndpoint, ExecOutput, ImageSummary,
    RuntimeError, StartedContainer,
};
pub use search::WorkspaceSearch;
pub use servers::ServerRegistry;
pub use toolkit::SandboxToolkit;
pub use types::*;
