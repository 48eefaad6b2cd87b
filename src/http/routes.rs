//! HTTP route definitions

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;

/// Build the read-only status router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    phase: &'static str,
    players: usize,
    connections: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        phase: state.world.phase().as_str(),
        players: state.world.player_count(),
        connections: state.world.connection_count(),
    })
}

// ============================================================================
// Match status endpoint
// ============================================================================

#[derive(Serialize)]
struct StatusResponse {
    phase: &'static str,
    min_players: usize,
    players: Vec<PlayerStatus>,
    weapons: usize,
    graves: usize,
}

#[derive(Serialize)]
struct PlayerStatus {
    name: String,
    skin: String,
    hp: i32,
    alive: bool,
    ready: bool,
    has_weapon: bool,
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let world = &state.world;
    let players = world
        .players_in_join_order()
        .into_iter()
        .map(|p| PlayerStatus {
            name: p.name,
            skin: p.skin,
            hp: p.hp,
            alive: p.alive,
            ready: p.ready,
            has_weapon: p.has_weapon,
        })
        .collect();

    Json(StatusResponse {
        phase: world.phase().as_str(),
        min_players: state.config.min_players,
        players,
        weapons: world.weapons().len(),
        graves: world.graves().len(),
    })
}
