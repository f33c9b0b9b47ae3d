// ABOUTME: agentbox command-line entry point
// ABOUTME: Parses arguments, initializes logging and dispatches to the sandbox commands

use clap::Parser;
use colored::*;
use std::process;

mod cli;

use cli::sandbox::SandboxCommands;

#[derive(Parser)]
#[command(name = "agentbox")]
#[command(about = "agentbox - disposable execution sandbox for coding agents")]
#[command(version)]
struct Cli {
    /// Log engine calls and state transitions
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: SandboxCommands,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.execute().await {
        Ok(true) => {}
        // The record was printed; it carries the failure details
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}
