// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use enclave_lease_server::{
    api::router,
    clock::SystemClock,
    config::{LogFormat, MarketConfig},
    keeper::Keeper,
    market::Market,
    state::AppState,
};

const DEFAULT_LOG_FILTER: &str = "info,enclave_lease_server=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = MarketConfig::from_env()?;
    init_tracing(config.log_format);

    let clock = Arc::new(SystemClock);
    let market = Market::new(&config, clock.clone())?;
    let state = AppState::new(market, clock);

    info!(
        replication_factor = config.lease.replication_factor,
        trusted_signers = config.trusted_signers.len(),
        persistent = config.data_dir.is_some(),
        "Lease market initialized"
    );

    let shutdown = CancellationToken::new();
    match Keeper::new(state.market.clone(), config.keeper_interval_secs) {
        Some(keeper) => {
            tokio::spawn(keeper.run(shutdown.clone()));
        }
        None => info!("Lease keeper disabled (KEEPER_INTERVAL_SECS=0)"),
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    });

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Enclave lease server listening (docs at /docs)");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
