//! exec-relay - code execution relay with HTTP API.
//!
//! Usage:
//!   exec-relay serve [--port 8001]                  # Start HTTP server
//!   exec-relay run <file> [--local-timeout-secs N]  # Run a script through the local interpreter

use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use exec_relay::config::{Cli, Commands, LocalArgs, ServeArgs};
use exec_relay::http_server;
use exec_relay::orchestrator::Orchestrator;
use exec_relay::sandbox::{DaytonaClient, SandboxClient};
use exec_relay::state::AppState;
use exec_relay::store::{RecordStore, SqliteStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Run { file, local } => run_file(&file, &local).await,
    };
    exit(code);
}

async fn serve(args: ServeArgs) -> i32 {
    let store = match SqliteStore::connect(&args.database_url, &args.db_name).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to open record store");
            return 1;
        }
    };

    let remote: Option<Arc<dyn SandboxClient>> = match args.daytona_config() {
        Some(config) => match DaytonaClient::new(config) {
            Ok(client) => {
                info!(api_url = %args.daytona_api_url, "Remote sandbox enabled");
                Some(Arc::new(client) as Arc<dyn SandboxClient>)
            }
            Err(e) => {
                error!(error = %e, "Failed to build remote sandbox client");
                return 1;
            }
        },
        None => {
            warn!("DAYTONA_API_KEY not set; Python runs on the local fallback only");
            None
        }
    };

    let local = args.local.executor();
    let allowed: Vec<&str> = local.capabilities().builtins().map(|b| b.name()).collect();
    info!(
        python = %args.local.local_python.display(),
        builtins = ?allowed,
        timeout_secs = args.local.local_timeout_secs,
        memory_mib = args.local.local_memory_mib,
        "Local fallback ready"
    );
    let orchestrator = Orchestrator::new(store.clone(), remote, local);
    let state = AppState::new(store.clone(), orchestrator);

    let result = http_server::run_server(args.port, state, shutdown_signal()).await;
    store.close().await;

    match result {
        Ok(()) => {
            info!("Server stopped");
            0
        }
        Err(e) => {
            error!(error = %e, "HTTP server failed");
            1
        }
    }
}

async fn run_file(path: &Path, local: &LocalArgs) -> i32 {
    let code = match tokio::fs::read_to_string(path).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", path.display(), e);
            return 1;
        }
    };

    let outcome = local.executor().run(&code).await;
    print!("{}", outcome.output);
    match outcome.error {
        Some(message) => {
            eprintln!("{}", message);
            1
        }
        None => 0,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
