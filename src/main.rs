//! Gateway binary: load config, wire subsystems, serve.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use apigw::config;
use apigw::http::server;
use apigw::lifecycle::{wait_for_signal, Shutdown};
use apigw::observability;

#[derive(Parser)]
#[command(name = "apigw", version, about = "HTTP reverse-proxy gateway")]
struct Args {
    /// Path to the YAML config file.
    #[arg(long)]
    config: PathBuf,

    /// Parse and validate the config, then exit.
    #[arg(long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    observability::logging::init();

    let config = match config::load_config(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(path = %args.config.display(), error = %err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    if args.validate_config {
        tracing::info!("config ok");
        return ExitCode::SUCCESS;
    }

    let metrics = match observability::metrics::install() {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, "failed to install metrics recorder");
            return ExitCode::FAILURE;
        }
    };

    // Histogram samples accumulate until drained into the rendered snapshot.
    let upkeep = metrics.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        loop {
            tick.tick().await;
            upkeep.run_upkeep();
        }
    });

    let state = match server::AppState::from_config(config, Some(metrics)).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "failed to assemble gateway");
            return ExitCode::FAILURE;
        }
    };

    let addr = state.config.server.addr.clone();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(addr = %addr, error = %err, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        addr = %addr,
        routes = state.table.len(),
        rate_backend = %state.limiter_backend,
        admin_enabled = state.admin_key.is_some(),
        "apigw listening"
    );

    let limiter = state.limiter.clone();
    let app = server::build_router(state);

    let shutdown = Arc::new(Shutdown::new());
    let sig = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(signal, "shutdown signal received");
        sig.trigger(signal);
    });

    let result = server::run(listener, app, &shutdown).await;

    limiter.close().await;

    match result {
        Ok(()) => {
            tracing::info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "server error");
            ExitCode::FAILURE
        }
    }
}
