// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read-mostly projections of the agent, the event bus, and the version
// genealogy, plus start/stop controls. The UI polls these; there is no push
// channel. CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::AppState;
use crate::events::EventType;

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/agent/start", post(agent_start))
        .route("/agent/stop", post(agent_stop))
        .route("/agent/status", get(agent_status))
        .route("/agent/orders", get(agent_orders))
        .route("/agent/versions", get(agent_versions))
        .route("/agent/simulations", get(agent_simulations))
        .route("/agent/events", get(agent_events))
        .route("/agent/events/latest", get(agent_events_latest))
        .route("/agent/brain", get(agent_brain))
        .route("/agent/full-status", get(agent_full_status))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "server_time": Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Start / stop
// =============================================================================

#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    initial_capital: Option<f64>,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    status: &'static str,
    agent_id: String,
}

async fn agent_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let symbol = req
        .symbol
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_uppercase())
        .unwrap_or_else(|| state.settings.symbol.clone());
    if symbol.trim().is_empty() {
        return Err(client_error("symbol must not be empty"));
    }

    let capital = req.initial_capital.unwrap_or(state.settings.initial_capital);
    if capital <= 0.0 {
        return Err(client_error("initial_capital must be positive"));
    }

    match state.start_agent(symbol.clone(), capital) {
        Ok(agent_id) => {
            info!(agent_id = %agent_id, symbol = %symbol, capital, "agent started via API");
            Ok(Json(StartResponse {
                status: "started",
                agent_id,
            }))
        }
        Err(e) => Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

async fn agent_stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stopped = state.stop_agent();
    Json(json!({
        "status": if stopped { "stopping" } else { "not_running" },
    }))
}

// =============================================================================
// Projections
// =============================================================================

async fn agent_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.agent() {
        Some(agent) => Json(json!({ "agent": agent.status() })),
        None => Json(json!({ "agent": null })),
    }
}

async fn agent_orders(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let orders = state.agent().map(|a| a.orders()).unwrap_or_default();
    Json(orders)
}

async fn agent_versions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let versions = state.agent().map(|a| a.versions()).unwrap_or_default();
    Json(versions)
}

#[derive(Debug, Deserialize)]
struct SimulationsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn agent_simulations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SimulationsQuery>,
) -> impl IntoResponse {
    let mut simulations = state.agent().map(|a| a.simulations()).unwrap_or_default();
    if let Some(limit) = query.limit {
        let skip = simulations.len().saturating_sub(limit);
        simulations.drain(..skip);
    }
    Json(simulations)
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
}

async fn agent_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let event_type = match query.event_type.as_deref() {
        Some(raw) => Some(
            raw.parse::<EventType>()
                .map_err(|e| client_error(&e))?,
        ),
        None => None,
    };

    let events = state
        .bus
        .get(query.limit.unwrap_or(100), event_type, query.since);
    Ok(Json(json!({
        "events": events,
        "stats": state.bus.stats(),
    })))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    #[serde(default = "default_latest_count")]
    count: usize,
}

fn default_latest_count() -> usize {
    10
}

async fn agent_events_latest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LatestQuery>,
) -> impl IntoResponse {
    Json(state.bus.latest(query.count))
}

// =============================================================================
// Brain / composite
// =============================================================================

async fn agent_brain(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.advisor.stats())
}

async fn agent_full_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let agent = state.agent();
    let status = agent.as_ref().map(|a| a.status());
    let orders = agent.as_ref().map(|a| a.orders()).unwrap_or_default();
    let versions = agent.as_ref().map(|a| a.versions()).unwrap_or_default();
    let simulations = agent
        .as_ref()
        .map(|a| {
            let mut sims = a.simulations();
            let skip = sims.len().saturating_sub(20);
            sims.drain(..skip);
            sims
        })
        .unwrap_or_default();

    Json(json!({
        "agent": status,
        "orders": orders,
        "versions": versions,
        "simulations": simulations,
        "events": state.bus.latest(50),
        "event_stats": state.bus.stats(),
        "brain": state.advisor.stats(),
    }))
}

fn client_error(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": message })),
    )
}
