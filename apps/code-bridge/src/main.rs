#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_bridge::config::CodeBridgeConfig;
use code_bridge::http::make_code_bridge_http_server;
use code_bridge::service::CodeBridgeService;

#[derive(Parser)]
#[command(name = "code-bridge")]
#[command(about = "Authenticated file and command bridge for one project directory")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Overrides the PORT environment variable.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate configuration and print what would be served.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port } => run_serve(port).await,
        Command::Check => run_check(),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,code_bridge=debug,bridge_guard=info")),
        )
        .with_current_span(true)
        .init();
}

fn load_config() -> Result<CodeBridgeConfig> {
    CodeBridgeConfig::from_process_env().context("failed to load code bridge config")
}

async fn run_serve(port: Option<u16>) -> Result<()> {
    init_tracing();
    let mut config = load_config()?;
    if let Some(port) = port {
        config.port = port;
    }

    let service = Arc::new(CodeBridgeService::new(config));
    let server = make_code_bridge_http_server(service.clone())
        .await
        .map_err(|error| anyhow!(error))
        .context("failed to start code bridge server")?;

    info!(
        address = %server.address,
        allow_run = service.run_gate().is_enabled(),
        "code bridge listening"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed while waiting for ctrl-c")?;
    server.close().await.map_err(|error| anyhow!(error))?;
    Ok(())
}

fn run_check() -> Result<()> {
    let config = load_config()?;
    println!("[code-bridge] project root: {}", config.project_root.display());
    println!("[code-bridge] listen: {}:{}", config.host, config.port);
    println!(
        "[code-bridge] run: {}",
        if config.allow_run { "enabled" } else { "disabled" }
    );
    Ok(())
}
