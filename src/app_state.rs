// =============================================================================
// Application State — the one runtime value behind the HTTP surface
// =============================================================================
//
// Built once at startup and handed to the handlers explicitly; there are no
// process-wide singletons. Holds the shared collaborators (event bus,
// advisor, sink) and at most one agent. Stopping an agent keeps its handle
// around so status and history remain queryable until the next start.
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::RwLock;
use tracing::info;

use crate::advisor::AdvisorClient;
use crate::agent::{AgentSettings, TradingAgent};
use crate::events::EventBus;
use crate::settings::Settings;
use crate::sink::VersionSink;

pub struct AppState {
    pub settings: Settings,
    pub bus: Arc<EventBus>,
    pub advisor: Arc<AdvisorClient>,
    pub sink: Option<Arc<VersionSink>>,
    agent: RwLock<Option<Arc<TradingAgent>>>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        bus: Arc<EventBus>,
        advisor: Arc<AdvisorClient>,
        sink: Option<Arc<VersionSink>>,
    ) -> Self {
        Self {
            settings,
            bus,
            advisor,
            sink,
            agent: RwLock::new(None),
        }
    }

    /// The current agent, running or stopped.
    pub fn agent(&self) -> Option<Arc<TradingAgent>> {
        self.agent.read().clone()
    }

    /// Start a new agent unless one is already running. Returns its id.
    pub fn start_agent(&self, symbol: String, initial_capital: f64) -> Result<String> {
        let mut slot = self.agent.write();
        if let Some(existing) = slot.as_ref() {
            if existing.is_running() {
                bail!("an agent is already running: {}", existing.agent_id);
            }
        }

        let agent = Arc::new(TradingAgent::new(
            symbol,
            initial_capital,
            self.advisor.clone(),
            self.bus.clone(),
            self.sink.clone(),
            AgentSettings::default(),
        ));
        let agent_id = agent.agent_id.clone();
        tokio::spawn(agent.clone().run());
        *slot = Some(agent);

        info!(agent_id = %agent_id, "agent task spawned");
        Ok(agent_id)
    }

    /// Request cooperative cancellation. Returns false when nothing runs.
    pub fn stop_agent(&self) -> bool {
        match self.agent.read().as_ref() {
            Some(agent) if agent.is_running() => {
                agent.request_stop();
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("symbol", &self.settings.symbol)
            .field("has_agent", &self.agent.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(
            Settings::default(),
            Arc::new(EventBus::default()),
            Arc::new(AdvisorClient::new("http://localhost", "test", None)),
            None,
        )
    }

    #[tokio::test]
    async fn stop_without_agent_is_false() {
        let s = state();
        assert!(!s.stop_agent());
        assert!(s.agent().is_none());
    }

    #[tokio::test]
    async fn double_start_is_rejected_while_running() {
        let s = state();
        let id = s.start_agent("BTC-USD".to_string(), 1000.0).unwrap();
        assert!(!id.is_empty());

        // The spawned task flips is_running quickly; poll briefly.
        for _ in 0..50 {
            if s.agent().map(|a| a.is_running()).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        if s.agent().map(|a| a.is_running()).unwrap_or(false) {
            assert!(s.start_agent("BTC-USD".to_string(), 1000.0).is_err());
            assert!(s.stop_agent());
        }
    }
}
