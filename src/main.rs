// =============================================================================
// Vela Paper Lab — Main Entry Point
// =============================================================================
//
// An autonomous paper-trading laboratory for one spot pair: the agent runs
// short simulations against the live price feed, scores them, consults the
// advisor, and breeds new parameter versions. No real orders, ever.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod advisor;
mod agent;
mod api;
mod app_state;
mod events;
mod graph;
mod indicators;
mod optimizer;
mod price_source;
mod settings;
mod signals;
mod sink;
mod trader;
mod types;
mod versions;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::advisor::AdvisorClient;
use crate::app_state::AppState;
use crate::events::EventBus;
use crate::settings::Settings;
use crate::sink::VersionSink;

const SETTINGS_PATH: &str = "vela_settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Vela Paper Lab starting up");

    let settings = Settings::load(SETTINGS_PATH)
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to load settings, using defaults");
            Settings::default()
        })
        .apply_env();

    if settings.symbol.trim().is_empty() {
        error!("no trading symbol configured (VELA_SYMBOL)");
        std::process::exit(1);
    }
    if settings.initial_capital <= 0.0 {
        error!("initial capital must be positive");
        std::process::exit(1);
    }

    info!(
        symbol = %settings.symbol,
        initial_capital = settings.initial_capital,
        bind_addr = %settings.bind_addr,
        "configured"
    );

    // ── 2. Collaborators ─────────────────────────────────────────────────
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    if api_key.as_deref().map_or(true, str::is_empty) {
        warn!("no advisor credential found, running on deterministic fallbacks");
    }
    let advisor = Arc::new(AdvisorClient::new(
        settings.advisor_url.clone(),
        settings.advisor_model.clone(),
        api_key,
    ));

    let sink = match &settings.sink_path {
        Some(path) => match VersionSink::open(path) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                warn!(error = %e, "version sink unavailable, continuing without persistence");
                None
            }
        },
        None => None,
    };

    let bus = Arc::new(EventBus::default());
    let state = Arc::new(AppState::new(settings.clone(), bus, advisor, sink));

    // ── 3. API server ────────────────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = match tokio::net::TcpListener::bind(&settings.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %settings.bind_addr, error = %e, "failed to bind API server");
            std::process::exit(1);
        }
    };
    info!(addr = %settings.bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");

    if state.stop_agent() {
        // Give the agent a moment to close its position and go idle.
        for _ in 0..20 {
            match state.agent() {
                Some(agent) if agent.is_running() => {
                    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                }
                _ => break,
            }
        }
    }
    server.abort();

    if let Err(e) = settings.save(SETTINGS_PATH) {
        warn!(error = %e, "failed to save settings on shutdown");
    }

    info!("Vela Paper Lab shut down complete.");
    Ok(())
}
