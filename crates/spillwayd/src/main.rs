//! spillwayd: the Spillway daemon.
//!
//! Single binary that assembles every Spillway subsystem:
//! - Job ledger + cost estimator
//! - Dispatcher (inbound HTTP, forwarding, overflow)
//! - Instance monitor (CPU + worker stats polling)
//! - Autoscaler over a standby worker pool
//! - Admin API (health, status, Prometheus)
//!
//! # Usage
//!
//! ```text
//! spillwayd run --config spillway.toml
//! spillwayd check-config --config spillway.toml
//! ```

mod assemble;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use spillway_api::AdminState;
use spillway_core::SpillwayConfig;
use spillway_dispatch::DispatchServer;

use crate::assemble::{Components, assemble};

const DEFAULT_LOG_FILTER: &str = "info,spillwayd=debug,spillway=debug";

#[derive(Parser)]
#[command(name = "spillwayd", about = "Spillway request dispatcher")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher and its background tasks.
    Run {
        /// Path to spillway.toml.
        #[arg(long, default_value = "spillway.toml")]
        config: PathBuf,

        /// Override `server.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Validate a config file and print it with defaults filled in.
    CheckConfig {
        #[arg(long, default_value = "spillway.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, listen } => run(&config, listen).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &Path) -> anyhow::Result<SpillwayConfig> {
    SpillwayConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml_string()?);
    info!(path = %path.display(), "config ok");
    Ok(())
}

async fn run(path: &Path, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut config = load_config(path)?;
    if let Some(listen) = listen {
        config.server.listen = listen;
    }
    info!(config = %path.display(), "Spillway starting");

    // ── Initialize subsystems ──────────────────────────────────

    let Components {
        ledger,
        board,
        dispatcher,
        registry,
        monitor,
        mut autoscaler,
    } = assemble(&config)?;

    registry
        .activate(config.fleet.initial)
        .await
        .context("activating initial workers")?;
    info!(
        workers = ledger.workers().len(),
        standby = registry.available(),
        "fleet ready"
    );

    let autoscale_enabled = !config.fleet.workers.is_empty();
    let admin_state = AdminState {
        dispatcher: dispatcher.clone(),
        board,
        autoscale: autoscale_enabled.then(|| autoscaler.stats()),
    };

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let monitor_shutdown = shutdown_rx.clone();
    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let autoscale_handle = if autoscale_enabled {
        let interval = config.autoscale_interval()?;
        let autoscale_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            autoscaler.run(interval, autoscale_shutdown).await;
        }))
    } else {
        warn!("no standby worker slots configured; autoscaler disabled");
        None
    };

    let server = DispatchServer::bind(config.server.listen, dispatcher).await?;
    let dispatch_handle = tokio::spawn(server.serve(shutdown_rx.clone()));

    // ── Start admin API ────────────────────────────────────────

    let router = spillway_api::build_router(admin_state);
    let admin_addr = config.server.admin_listen;
    let listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener on {admin_addr}"))?;
    info!(addr = %admin_addr, "admin API listening");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for background tasks.
    match dispatch_handle.await {
        Ok(Err(e)) => error!(error = %e, "dispatcher exited with error"),
        Err(e) => error!(error = %e, "dispatcher task panicked"),
        Ok(Ok(())) => {}
    }
    let _ = monitor_handle.await;
    if let Some(handle) = autoscale_handle {
        let _ = handle.await;
    }

    info!("Spillway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "spillwayd",
            "run",
            "--config",
            "/etc/spillway.toml",
            "--listen",
            "127.0.0.1:8080",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        match cli.command {
            Command::Run { config, listen } => {
                assert_eq!(config, PathBuf::from("/etc/spillway.toml"));
                assert_eq!(listen, Some("127.0.0.1:8080".parse().unwrap()));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn check_config_defaults_path() {
        let cli = Cli::try_parse_from(["spillwayd", "check-config"]).unwrap();
        assert!(!cli.log_json);
        assert!(matches!(
            cli.command,
            Command::CheckConfig { config } if config == Path::new("spillway.toml")
        ));
    }

    #[test]
    fn missing_config_is_an_error() {
        let err = load_config(Path::new("/nonexistent/spillway.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/spillway.toml"));
    }
}
