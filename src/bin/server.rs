//! Process entrypoint: wires config, store, capability clients, every
//! component (C1-C9) and the admin HTTP surface, then runs until signalled.
//!
//! Grounded on the teacher's `AgentRuntime::new()`/`shutdown()` composition
//! root in `lib.rs`, generalized from "agent runtime" to this orchestrator's
//! own components.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use cadence_orchestrator::capability::CapabilitySet;
use cadence_orchestrator::config::OrchestratorConfig;
use cadence_orchestrator::logging;
use cadence_orchestrator::store::{SqliteStore, Store};
use cadence_orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "cadence-orchestrator", about = "Podcast pipeline orchestrator")]
struct Cli {
    /// Path to a `.env` file to load before reading the environment.
    #[arg(long)]
    env_file: Option<std::path::PathBuf>,

    /// Override `DATABASE_PATH` from the CLI instead of the environment.
    #[arg(long)]
    database_path: Option<String>,

    /// Run with an in-memory store and mock capability clients instead of
    /// the real SQLite store and HTTP clients. For local smoke-testing.
    #[arg(long)]
    dry_run: bool,

    /// Disable the admin HTTP surface even when the `http-api` feature is on.
    #[arg(long)]
    no_http: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let mut config = OrchestratorConfig::from_env()?;
    if let Some(path) = &cli.database_path {
        config.store.database_path = path.clone();
    }

    logging::init(&config.logging);
    info!("starting cadence-orchestrator");

    let store: Arc<dyn Store> = if cli.dry_run {
        Arc::new(SqliteStore::open_in_memory()?)
    } else {
        if let Some(parent) = std::path::Path::new(&config.store.database_path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Arc::new(SqliteStore::open(std::path::Path::new(&config.store.database_path))?)
    };

    let capabilities = Arc::new(if cli.dry_run {
        CapabilitySet::mock()
    } else {
        CapabilitySet::from_config(&config.capabilities)
    });

    let bind_addr = config.api.bind_addr.clone();
    let orchestrator = Orchestrator::new(config, store, capabilities);
    let background = orchestrator.spawn_background_tasks();

    #[cfg(feature = "http-api")]
    let http_handle = if cli.no_http {
        None
    } else {
        let (host, port) = bind_addr
            .rsplit_once(':')
            .map(|(h, p)| (h.to_string(), p.parse().unwrap_or(8080)))
            .unwrap_or(("0.0.0.0".to_string(), 8080));
        let server = cadence_orchestrator::api::HttpApiServer::new(
            cadence_orchestrator::api::HttpApiConfig {
                bind_address: host,
                port,
                ..Default::default()
            },
            orchestrator.clone(),
        );
        Some(tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!(error = %e, "admin HTTP surface exited with error");
            }
        }))
    };
    #[cfg(not(feature = "http-api"))]
    let _ = cli.no_http;

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received, draining background tasks");
    orchestrator.shutdown();

    for handle in background {
        handle.abort();
    }
    #[cfg(feature = "http-api")]
    if let Some(handle) = http_handle {
        handle.abort();
    }

    Ok(())
}
