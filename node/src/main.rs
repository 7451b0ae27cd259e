// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tollgate Node
//!
//! Entry point for the `tollgate-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the identity store and serves the
//! HTTP API.
//!
//! - `run`: serve the API and metrics endpoints
//! - `init`: create the data directory and a default `plans.json`
//! - `plans`: print the effective plan catalogue as JSON
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;

use tollgate_core::clock::SystemClock;
use tollgate_core::config::{GateConfig, API_VERSION};
use tollgate_core::identity::{Ed25519Verifier, SignatureVerifier, UpstreamVerified};
use tollgate_core::plan::PlanCatalogue;
use tollgate_core::storage::GateDB;
use tollgate_core::Tollgate;

use cli::{Commands, LogFormat, TollgateCli};
use metrics::NodeMetrics;

/// Catalogue file name inside the data directory.
const PLANS_FILE: &str = "plans.json";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TollgateCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Plans(args) => print_plans(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Explicit path, else `<data_dir>/plans.json` if present, else built-in.
fn load_catalogue(explicit: Option<&Path>, data_dir: Option<&Path>) -> Result<PlanCatalogue> {
    let path: Option<PathBuf> = match (explicit, data_dir) {
        (Some(p), _) => Some(p.to_path_buf()),
        (None, Some(dir)) => Some(dir.join(PLANS_FILE)).filter(|p| p.exists()),
        (None, None) => None,
    };

    match path {
        Some(path) => {
            let catalogue = PlanCatalogue::load(&path)
                .with_context(|| format!("failed to load plans from {}", path.display()))?;
            tracing::info!(path = %path.display(), plans = catalogue.len(), "plan catalogue loaded");
            Ok(catalogue)
        }
        None => {
            tracing::info!("using built-in plan catalogue");
            Ok(PlanCatalogue::builtin())
        }
    }
}

async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        trial_days = args.trial_days,
        "starting tollgate-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = GateDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(
        path = %db_path.display(),
        primaries = db.primary_count(),
        linked = db.linked_total(),
        "database opened"
    );

    // --- Gate ---
    let catalogue = load_catalogue(args.plans.as_deref(), Some(&args.data_dir))?;
    let config = GateConfig::default().with_trial_days(args.trial_days);
    let verifier: Arc<dyn SignatureVerifier> = if args.trust_upstream_signatures {
        tracing::warn!("ownership signatures are NOT verified by this node");
        Arc::new(UpstreamVerified)
    } else {
        Arc::new(Ed25519Verifier::default())
    };
    let tollgate = Tollgate::with_parts(
        db.clone(),
        catalogue,
        config,
        Arc::new(SystemClock),
        verifier,
    )
    .context("invalid gate configuration")?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    let billing_secret = args.billing_secret.filter(|s| !s.is_empty());
    if billing_secret.is_none() {
        tracing::warn!("no billing secret configured; /subscriptions will reject every call");
    }

    let tollgate = Arc::new(tollgate);
    let app_state = api::AppState {
        started_at: tollgate.now(),
        tollgate,
        metrics: Arc::clone(&node_metrics),
        version: format!("{} (api {})", env!("CARGO_PKG_VERSION"), API_VERSION),
        billing_secret: billing_secret.map(Arc::from),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    db.flush().context("failed to flush database")?;
    tracing::info!("tollgate-node stopped");
    Ok(())
}

/// Creates the data directory and writes the built-in catalogue as an
/// editable `plans.json`.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("tollgate_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let plans_path = data_dir.join(PLANS_FILE);
    if plans_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (pass --force to overwrite)",
            plans_path.display()
        );
    }
    std::fs::write(&plans_path, PlanCatalogue::builtin().to_json_pretty())
        .with_context(|| format!("failed to write {}", plans_path.display()))?;
    tracing::info!(path = %plans_path.display(), "default plan catalogue written");

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Plans          : {}", plans_path.display());

    Ok(())
}

fn print_plans(args: cli::PlansArgs) -> Result<()> {
    let catalogue = load_catalogue(args.plans.as_deref(), None)?;
    println!("{}", catalogue.to_json_pretty());
    Ok(())
}

fn print_version() {
    println!("tollgate-node {}", env!("CARGO_PKG_VERSION"));
    println!("api           {}", API_VERSION);
    println!("rustc         {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
