//! Arena Server - Authoritative multiplayer arena brawler server
//!
//! This is the main entry point for the game server. It handles:
//! - TCP line-protocol sessions for players
//! - The lobby/active match lifecycle
//! - Periodic world snapshots to every connected client
//! - An optional read-only HTTP status endpoint

mod app;
mod config;
mod game;
mod http;
mod net;
mod util;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::{Broadcaster, LifecycleController};
use crate::http::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Arena Server");
    info!("Game address: {}", config.server_addr);

    // Create application state
    let state = AppState::new(config.clone());

    // Spawn lifecycle controller
    let lifecycle = LifecycleController::new(
        state.world.clone(),
        config.min_players,
        config.lifecycle_interval,
    );
    tokio::spawn(lifecycle.run());

    // Spawn snapshot broadcaster
    let broadcaster = Broadcaster::new(state.world.clone(), config.broadcast_interval);
    tokio::spawn(broadcaster.run());

    // Optional status endpoint
    if let Some(status_addr) = config.status_addr {
        let status_listener = TcpListener::bind(status_addr).await?;
        let router = build_router(state.clone());
        info!("Health check: http://{}/health", status_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(status_listener, router).await {
                error!(error = %e, "Status server failed");
            }
        });
    }

    // Start game server
    let listener = TcpListener::bind(config.server_addr).await?;
    info!("Server listening on {}", config.server_addr);

    tokio::select! {
        _ = net::serve(listener, state) => {}
        _ = shutdown_signal() => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
