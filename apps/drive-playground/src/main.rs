#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drive_playground::config::{
    DEFAULT_HTTP_TIMEOUT, DriveMode, DrivePlaygroundConfig, FolderSource, OAuthFiles,
};
use drive_playground::drive::{DriveApi, GoogleDrive, MemoryDrive};
use drive_playground::http::make_drive_playground_http_server;
use drive_playground::oauth::{LoopbackRedirect, TokenSource};
use drive_playground::service::DrivePlaygroundService;

#[derive(Parser)]
#[command(name = "drive-playground")]
#[command(about = "Authenticated list/read/write bridge for one Google Drive folder")]
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
    /// Validate configuration and resolve the playground folder.
    Check,
    /// Run the browser consent flow once and save the token file.
    Authorize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port } => run_serve(port).await,
        Command::Check => run_check().await,
        Command::Authorize => run_authorize().await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,drive_playground=debug,bridge_guard=info")
            }),
        )
        .with_current_span(true)
        .init();
}

fn load_config() -> Result<DrivePlaygroundConfig> {
    DrivePlaygroundConfig::from_process_env().context("failed to load drive playground config")
}

fn google_drive(config: &DrivePlaygroundConfig) -> Result<Arc<dyn DriveApi>> {
    let user = config
        .load_authorized_user()
        .context("failed to load google credentials")?;
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build http client")?;
    let tokens = Arc::new(TokenSource::new(user, http.clone()));
    Ok(Arc::new(GoogleDrive::new(http, tokens)))
}

async fn connect(config: &DrivePlaygroundConfig) -> Result<DrivePlaygroundService> {
    let mut config = config.clone();
    let drive: Arc<dyn DriveApi> = match config.mode {
        DriveMode::Google => google_drive(&config)?,
        DriveMode::Mock => {
            // Memory ids are generated, so a configured id becomes a folder name.
            let names = match &config.folder {
                FolderSource::Id(id) => vec![id.clone()],
                FolderSource::Path(names) => names.clone(),
            };
            let drive = MemoryDrive::new();
            config.folder = FolderSource::Id(drive.ensure_folder_path(&names).await);
            Arc::new(drive)
        }
    };
    DrivePlaygroundService::connect(&config, drive)
        .await
        .context("failed to resolve the playground folder")
}

async fn run_serve(port: Option<u16>) -> Result<()> {
    init_tracing();
    let mut config = load_config()?;
    if let Some(port) = port {
        config.port = port;
    }

    let service = Arc::new(connect(&config).await?);
    let server = make_drive_playground_http_server(service.clone(), &config.host, config.port)
        .await
        .map_err(|error| anyhow!(error))
        .context("failed to start drive playground server")?;

    info!(
        address = %server.address,
        folder_id = %service.folder_id(),
        mock = config.mode == DriveMode::Mock,
        "drive playground listening"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed while waiting for ctrl-c")?;
    server.close().await.map_err(|error| anyhow!(error))?;
    Ok(())
}

async fn run_check() -> Result<()> {
    let config = load_config()?;
    let service = connect(&config).await?;
    println!("[drive-playground] folder id: {}", service.folder_id());
    println!("[drive-playground] listen: {}:{}", config.host, config.port);
    println!(
        "[drive-playground] mode: {}",
        match config.mode {
            DriveMode::Google => "google",
            DriveMode::Mock => "mock",
        }
    );
    Ok(())
}

async fn run_authorize() -> Result<()> {
    let files = OAuthFiles::from_process_env();
    let secrets = files
        .load_client_secrets()
        .context("failed to load oauth client secrets")?;

    let loopback = LoopbackRedirect::bind().await?;
    let redirect_uri = loopback.redirect_uri().to_string();
    let state = uuid::Uuid::new_v4().to_string();
    let consent = secrets.consent_url(&redirect_uri, &state)?;
    println!("Open this URL in a browser and approve access:\n\n{consent}\n");

    let code = loopback.wait_for_code(&state).await?;
    let http = reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    let user = secrets.exchange_code(&http, &code, &redirect_uri).await?;
    std::fs::write(&files.token_file, user.to_json()?)
        .with_context(|| format!("failed to write {}", files.token_file.display()))?;

    println!("Saved token to {}", files.token_file.display());
    println!("For hosted deployments, set GOOGLE_DRIVE_TOKEN_JSON to the file's contents.");
    Ok(())
}
