// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! berth-server - single-host application fleet manager
//!
//! Boot sequence: load configuration, scan the apps root, start every app
//! with a current version, then serve the HTTP API until SIGINT or SIGTERM.
//! On shutdown the whole fleet is stopped before the process exits.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use berth_core::AppManager;
use berth_server::api::{self, ApiState};
use berth_server::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "berth_server=info,berth_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    apply_args(&mut config, std::env::args().skip(1))?;

    info!(
        listen_addr = %config.listen_addr,
        apps_path = %config.apps_path.display(),
        "Starting berth-server"
    );

    let manager = Arc::new(AppManager::new(&config.apps_path));
    manager.start().await?;

    let router = api::router(ApiState {
        manager: Arc::clone(&manager),
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Server ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, stopping apps");
    manager.stop().await;

    info!("berth-server shut down");
    Ok(())
}

/// Command line flags override environment configuration.
fn apply_args(
    config: &mut Config,
    mut args: impl Iterator<Item = String>,
) -> anyhow::Result<()> {
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--port requires a value"))?;
                let port: u16 = value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid port: {value}"))?;
                config.listen_addr.set_port(port);
            }
            "--apps-path" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--apps-path requires a value"))?;
                config.apps_path = value.into();
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}
