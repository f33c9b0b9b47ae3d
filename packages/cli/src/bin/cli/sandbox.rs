// ABOUTME: CLI commands driving one sandbox session per invocation
// ABOUTME: Launches or adopts a container, runs one operation and prints its JSON record

use agentbox_sandbox::{
    ExecuteRequest, RuntimeKind, SandboxConfig, SandboxToolkit, SearchRequest, Signal,
    DEFAULT_MAX_RESULTS,
};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Which sandbox a command runs against
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Runtime flavor for a fresh sandbox (node or python)
    #[arg(long, default_value = "node")]
    kind: RuntimeKind,

    /// Host directory bound at /root/workspace
    #[arg(long, default_value = ".")]
    volume: PathBuf,

    /// Adopt an existing container instead of creating one
    #[arg(long)]
    container: Option<String>,

    /// Leave a freshly created container running afterwards
    #[arg(long)]
    keep: bool,
}

#[derive(Subcommand)]
pub enum SandboxCommands {
    /// List images known to the engine
    Images,

    /// Run one command in the sandbox
    Exec {
        #[command(flatten)]
        session: SessionArgs,

        /// Wall-clock limit in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Working directory inside the container (default: /root/workspace)
        #[arg(long)]
        workdir: Option<String>,

        /// Environment variable as KEY=VALUE, repeatable
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Command followed by its arguments
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Show which processes listen on a port
    Ports {
        port: u16,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Terminate whatever listens on a port, escalating to SIGKILL
    FreePort {
        port: u16,

        #[command(flatten)]
        session: SessionArgs,

        /// How long to wait for SIGTERM before escalating
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Send a signal to a process in the sandbox
    Kill {
        pid: u32,

        #[command(flatten)]
        session: SessionArgs,

        /// Signal name or number (default: TERM)
        #[arg(long)]
        signal: Option<Signal>,
    },

    /// Search workspace files with grep
    Search {
        pattern: String,

        #[command(flatten)]
        session: SessionArgs,

        /// Directory to search (default: /root/workspace)
        #[arg(long)]
        path: Option<String>,

        /// Only search files matching this glob
        #[arg(long)]
        include: Option<String>,

        /// Case-insensitive match
        #[arg(short, long)]
        ignore_case: bool,

        #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
        max_results: usize,
    },
}

impl SandboxCommands {
    /// Run the command, returning whether the printed record reports success
    pub async fn execute(&self) -> Result<bool> {
        let toolkit = SandboxToolkit::connect(SandboxConfig::from_env())
            .context("Failed to connect to the container engine")?;

        match self {
            SandboxCommands::Images => {
                let result = toolkit.list_images().await;
                print_json(&result)?;
                Ok(result.success)
            }
            SandboxCommands::Exec {
                session,
                timeout_ms,
                workdir,
                env,
                command,
            } => {
                let Some((program, args)) = command.split_first() else {
                    anyhow::bail!("No command given");
                };
                let request = ExecuteRequest {
                    command: program.clone(),
                    args: args.to_vec(),
                    workdir: workdir.clone(),
                    env: env.iter().cloned().collect(),
                    timeout_ms: *timeout_ms,
                };
                with_session(&toolkit, session, |toolkit| async move {
                    let result = toolkit.execute(request).await;
                    print_json(&result)?;
                    Ok(result.success)
                })
                .await
            }
            SandboxCommands::Ports { port, session } => {
                with_session(&toolkit, session, |toolkit| async move {
                    let result = toolkit.find_pids_by_port(*port).await;
                    print_json(&result)?;
                    Ok(result.success)
                })
                .await
            }
            SandboxCommands::FreePort {
                port,
                session,
                timeout_ms,
            } => {
                with_session(&toolkit, session, |toolkit| async move {
                    let result = toolkit
                        .free_port(*port, timeout_ms.map(Duration::from_millis))
                        .await;
                    print_json(&result)?;
                    Ok(result.success)
                })
                .await
            }
            SandboxCommands::Kill {
                pid,
                session,
                signal,
            } => {
                with_session(&toolkit, session, |toolkit| async move {
                    let result = toolkit.kill_pid(*pid, *signal).await;
                    print_json(&result)?;
                    Ok(result.success)
                })
                .await
            }
            SandboxCommands::Search {
                pattern,
                session,
                path,
                include,
                ignore_case,
                max_results,
            } => {
                let request = SearchRequest {
                    pattern: pattern.clone(),
                    path: path.clone(),
                    include: include.clone(),
                    ignore_case: *ignore_case,
                    max_results: *max_results,
                };
                with_session(&toolkit, session, |toolkit| async move {
                    let result = toolkit.search(request).await;
                    print_json(&result)?;
                    Ok(result.success)
                })
                .await
            }
        }
    }
}

/// Launch or adopt the sandbox, run `op`, then tear down a container this call created
async fn with_session<'a, F, Fut>(
    toolkit: &'a SandboxToolkit,
    session: &SessionArgs,
    op: F,
) -> Result<bool>
where
    F: FnOnce(&'a SandboxToolkit) -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let launch = toolkit
        .launch(session.kind, &session.volume, session.container.as_deref())
        .await;
    if !launch.success {
        print_json(&launch)?;
        return Ok(false);
    }

    let outcome = op(toolkit).await;

    // Adopted containers belong to someone else
    if session.container.is_none() && !session.keep {
        let shutdown = toolkit.shutdown().await;
        if let Some(e) = shutdown.error {
            warn!("Sandbox teardown failed: {}", e);
        }
    } else if let Some(sandbox) = toolkit.info().await {
        info!("Leaving sandbox {} running", sandbox.container_id);
    }

    outcome
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("missing variable name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
