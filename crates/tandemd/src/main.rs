//! tandemd: the Tandem release orchestrator daemon.
//!
//! Single binary that assembles every Tandem subsystem:
//! - State store (redb)
//! - Routing table with the staging and production listeners
//! - Health gate over HTTP probes
//! - Traffic shift controller
//! - Staging and production pipelines
//! - REST API
//!
//! # Usage
//!
//! ```text
//! tandemd serve --config tandem.toml --port 8480 --data-dir /var/lib/tandem
//! tandemd check-config --config tandem.toml
//! ```

mod adapters;
mod wiring;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};

use tandem_core::{EnvironmentName, TandemConfig, TargetGroup};
use tandem_routing::{IpSet, RoutingSync, RoutingTable};
use tandem_state::StateStore;

#[derive(Parser)]
#[command(name = "tandemd", about = "Tandem blue/green release orchestrator")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator and serve the API.
    Serve {
        /// Path to tandem.toml.
        #[arg(long, env = "TANDEM_CONFIG", default_value = "tandem.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/tandem")]
        data_dir: PathBuf,

        /// Routing sync interval in seconds.
        #[arg(long, default_value = "5")]
        sync_interval: u64,
    },

    /// Parse and validate tandem.toml, then exit.
    CheckConfig {
        /// Path to tandem.toml.
        #[arg(long, env = "TANDEM_CONFIG", default_value = "tandem.toml")]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tandemd=debug,tandem=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            sync_interval,
        } => serve(&config, port, data_dir, sync_interval).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &Path) -> anyhow::Result<TandemConfig> {
    let config = TandemConfig::from_file(path)?;
    config
        .validate()
        .with_context(|| format!("{} failed validation", path.display()))?;
    IpSet::parse(&config.staging.allow_list).context("staging.allow_list")?;
    // The daemon's health gate polls the configured addresses over HTTP.
    config.check_health_address_coverage()?;
    Ok(config)
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let (live, shadow) = config.production_target_groups()?;
    println!("{}: ok", path.display());
    println!(
        "  staging:    listener {} -> {} ({} allow-list entries)",
        config.staging.listener,
        config.staging.target_group,
        config.staging.allow_list.len()
    );
    println!(
        "  production: listener {} -> group {} over {live}/{shadow}",
        config.production.listener, config.production.deployment_group
    );
    println!("  tracking:   {} -> {}", config.source.branch, config.artifact.repository);

    let green = config.environment(EnvironmentName::Green);
    let blue = config.environment(EnvironmentName::Blue);
    let groups = [
        TargetGroup::for_environment(config.staging.target_group.as_str(), &green),
        TargetGroup::for_environment(live.as_str(), &blue),
        TargetGroup::for_environment(shadow.as_str(), &blue),
    ];
    for group in &groups {
        println!(
            "  target group {} ({} / {}): {:?} {}",
            group.id,
            group.environment,
            group.environment.role(),
            group.protocol,
            group.health_check_path
        );
    }
    Ok(())
}

async fn serve(config_path: &Path, port: u16, data_dir: PathBuf, sync_interval: u64) -> anyhow::Result<()> {
    info!("Tandem daemon starting");

    let config = load_config(config_path)?;
    info!(path = %config_path.display(), branch = %config.source.branch, "configuration loaded");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("tandem.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Routing and wiring ─────────────────────────────────────

    let table = RoutingTable::new();
    wiring::bootstrap(&config, &store, &table)?;
    let api_state = wiring::assemble(&config, store.clone(), table.clone(), wiring::Adapters::from_config(&config))?;

    let recovered = api_state.coordinator.recover().await?;
    if !recovered.is_empty() {
        warn!(count = recovered.len(), "failed runs left in flight by a previous process");
    }

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_handle = tokio::spawn(wiring::run_sync_loop(
        RoutingSync::new(table),
        store,
        Duration::from_secs(sync_interval.max(1)),
        shutdown_rx,
    ));

    // ── API server ─────────────────────────────────────────────

    let router = tandem_api::build_router(api_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c; serving until killed");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;
    let _ = sync_handle.await;

    info!("Tandem daemon stopped");
    Ok(())
}
