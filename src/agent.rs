// =============================================================================
// Trading Agent — the autonomous optimisation loop
// =============================================================================
//
// One agent per process. The cycle:
//
//   1. Run an initial simulation with the current parameter version.
//   2. Ask the advisor to evaluate it; combine with score thresholds.
//   3. High score  -> validate with a short simulation (live trading stays a
//      recorded decision, never an order).
//      Medium      -> tune parameters and adopt a new version.
//      Low         -> reach for the best historical version, else tune.
//   4. Repeat until stopped.
//
// State transitions are queued by synchronous helpers and drained to the
// event bus by the agent task at its next step, so a transition can never
// get lost for lack of an async context.
//
// Failures inside a cycle are caught at the cycle boundary: the agent emits
// an ERROR event, backs off exponentially, and keeps going. It never
// terminates itself.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::advisor::{clamp_parameters, AdvisorClient, BrainStats, NodeType};
use crate::events::{EventBus, EventType};
use crate::graph::{GraphConfig, ParameterOverlay};
use crate::optimizer::{TrainingLog, TrainingSummary};
use crate::price_source::SpotFeed;
use crate::sink::{VersionRecord, VersionSink};
use crate::trader::{LiveSimStats, PaperTrader, TradeView};
use crate::types::{AgentState, DecisionKind, MarketConditions, Severity};
use crate::versions::{AgentVersion, VersionStore};

/// Backoff base and cap for failed cycles, seconds.
const BACKOFF_BASE_S: u64 = 10;
const BACKOFF_CAP_S: u64 = 300;
/// Consecutive failures after which the counter wraps back to zero.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Pause between healthy cycles, seconds.
const CYCLE_BREATHER_S: f64 = 1.0;

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub initial_sim_duration_s: u64,
    pub short_sim_duration_s: u64,
    pub validation_sim_duration_s: u64,
    pub tick_interval_s: f64,
    pub high_score_threshold: f64,
    pub medium_score_threshold: f64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            initial_sim_duration_s: 30,
            short_sim_duration_s: 60,
            validation_sim_duration_s: 120,
            tick_interval_s: 2.0,
            high_score_threshold: 65.0,
            medium_score_threshold: 50.0,
        }
    }
}

// =============================================================================
// Records and projections
// =============================================================================

/// One finished simulation, as kept in the agent's history.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationRecord {
    pub id: String,
    pub version_id: String,
    pub duration_seconds: u64,
    pub total_orders: u64,
    pub winning_orders: u64,
    pub losing_orders: u64,
    pub winrate: f64,
    pub score: f64,
    pub total_pnl: f64,
    pub total_pnl_percent: f64,
    pub config: GraphConfig,
    pub orders: Vec<TradeView>,
    pub market_conditions: MarketConditions,
    pub recommendation: ParameterOverlay,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct SimProgress {
    start_time: DateTime<Utc>,
    duration_s: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationProgress {
    pub is_running: bool,
    pub duration: u64,
    pub elapsed: u64,
    pub remaining: u64,
    pub start_time: Option<DateTime<Utc>>,
}

/// Full status projection for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub symbol: String,
    pub state: AgentState,
    pub is_running: bool,
    pub current_version: Option<AgentVersion>,
    pub versions_count: usize,
    pub simulations_count: usize,
    pub active_orders: Vec<TradeView>,
    pub total_pnl: f64,
    pub session_winrate: f64,
    pub trades_executed: u64,
    pub brain: BrainStats,
    pub training: TrainingSummary,
    pub simulation: SimulationProgress,
    pub live_stats: LiveSimStats,
}

// =============================================================================
// Pure decision helpers
// =============================================================================

/// Winrate in percent; a run with no trades reads as neutral rather than as
/// a total loss, so a quiet market does not look like a broken strategy.
pub fn winrate_of(winning: u64, trades: u64) -> f64 {
    if trades > 0 {
        winning as f64 / trades as f64 * 100.0
    } else {
        50.0
    }
}

/// Winrate plus a P&L bonus capped at ten points.
pub fn simulation_score(winrate: f64, pnl_percent: f64) -> f64 {
    winrate + (pnl_percent * 2.0).min(10.0)
}

/// Combine the advisor's recommendation with the score thresholds. An
/// explicit recommendation wins; otherwise the thresholds decide.
pub fn decide(recommended: Option<&str>, score: f64, high: f64, medium: f64) -> DecisionKind {
    match recommended {
        Some("run_short_sim") => return DecisionKind::RunShortSim,
        Some("optimize") => return DecisionKind::Optimize,
        Some("search_history") => return DecisionKind::SearchHistory,
        _ => {}
    }
    if score >= high {
        DecisionKind::RunShortSim
    } else if score >= medium {
        DecisionKind::Optimize
    } else {
        DecisionKind::SearchHistory
    }
}

/// Exponential backoff after `failures` consecutive failed cycles.
pub fn backoff_delay_s(failures: u32) -> u64 {
    let attempt = failures.saturating_sub(1).min(10);
    (BACKOFF_BASE_S << attempt).min(BACKOFF_CAP_S)
}

/// Position size derived from the version's current score: confidence earns
/// exposure.
pub fn position_size_for_score(score: f64) -> f64 {
    if score >= 80.0 {
        20.0
    } else if score >= 70.0 {
        15.0
    } else if score >= 60.0 {
        10.0
    } else {
        5.0
    }
}

// =============================================================================
// TradingAgent
// =============================================================================

pub struct TradingAgent {
    pub agent_id: String,
    symbol: String,
    initial_capital: f64,
    settings: AgentSettings,
    feed: SpotFeed,
    advisor: Arc<AdvisorClient>,
    bus: Arc<EventBus>,
    sink: Option<Arc<VersionSink>>,
    versions: VersionStore,

    state: RwLock<AgentState>,
    running: AtomicBool,
    stop_flag: Arc<AtomicBool>,
    pending_transitions: Mutex<Vec<(AgentState, AgentState)>>,

    history: RwLock<Vec<SimulationRecord>>,
    orders: RwLock<Vec<TradeView>>,
    live: Arc<RwLock<LiveSimStats>>,
    progress: RwLock<Option<SimProgress>>,
    training: TrainingLog,
}

impl TradingAgent {
    pub fn new(
        symbol: impl Into<String>,
        initial_capital: f64,
        advisor: Arc<AdvisorClient>,
        bus: Arc<EventBus>,
        sink: Option<Arc<VersionSink>>,
        settings: AgentSettings,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            agent_id: Uuid::new_v4().to_string()[..8].to_string(),
            feed: SpotFeed::new(symbol.clone()),
            symbol,
            initial_capital,
            settings,
            advisor,
            bus,
            sink,
            versions: VersionStore::new(),
            state: RwLock::new(AgentState::Idle),
            running: AtomicBool::new(false),
            stop_flag: Arc::new(AtomicBool::new(false)),
            pending_transitions: Mutex::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            orders: RwLock::new(Vec::new()),
            live: Arc::new(RwLock::new(LiveSimStats::default())),
            progress: RwLock::new(None),
            training: TrainingLog::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cooperative stop: observed at the cycle top and between ticks. An
    /// open position is closed before the agent goes idle.
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        info!(agent_id = %self.agent_id, "stop requested");
    }

    // -------------------------------------------------------------------------
    // State transitions
    // -------------------------------------------------------------------------

    /// Record a transition. Safe to call from synchronous helpers; the event
    /// is published when the agent task next drains the queue.
    fn set_state(&self, next: AgentState) {
        let old = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, next)
        };
        if old != next {
            self.pending_transitions.lock().push((old, next));
        }
    }

    fn flush_transitions(&self) {
        let pending: Vec<_> = std::mem::take(&mut *self.pending_transitions.lock());
        for (old, new) in pending {
            self.bus
                .state_changed(&self.agent_id, &old.to_string(), &new.to_string());
        }
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.stop_flag.store(false, Ordering::SeqCst);
        self.bus
            .agent_started(&self.agent_id, &self.symbol, self.initial_capital);

        self.load_versions_from_sink().await;

        if self.versions.current().is_none() {
            let version = self
                .versions
                .create("v1_initial", GraphConfig::scalping(), None);
            if let Err(e) = self.versions.adopt(&version.id) {
                warn!(error = %e, "failed to adopt initial version");
            }
            self.bus.version_created(
                &self.agent_id,
                &version.name,
                &["initial scalping baseline".to_string()],
            );
        }

        let mut failures: u32 = 0;
        while !self.stop_flag.load(Ordering::SeqCst) {
            self.flush_transitions();
            match self.run_cycle().await {
                Ok(()) => {
                    failures = 0;
                }
                Err(e) => {
                    self.bus.agent_error(&self.agent_id, &e.to_string());
                    self.set_state(AgentState::Error);
                    self.flush_transitions();

                    failures += 1;
                    if failures > MAX_CONSECUTIVE_FAILURES {
                        failures = 1;
                    }
                    let delay = backoff_delay_s(failures);
                    warn!(agent_id = %self.agent_id, failures, delay, "cycle failed, backing off");
                    self.cancellable_sleep(delay as f64).await;
                }
            }
            self.cancellable_sleep(CYCLE_BREATHER_S).await;
        }

        self.set_state(AgentState::Idle);
        self.flush_transitions();
        self.bus.agent_stopped(&self.agent_id);
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_cycle(&self) -> Result<()> {
        self.set_state(AgentState::RunningInitial);
        self.flush_transitions();
        let initial = self
            .run_simulation(self.settings.initial_sim_duration_s)
            .await?;
        if self.stop_flag.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.set_state(AgentState::Evaluating);
        self.flush_transitions();
        let decision = self.evaluate_simulation(&initial).await;
        if self.stop_flag.load(Ordering::SeqCst) {
            return Ok(());
        }

        match decision {
            DecisionKind::RunShortSim => {
                self.set_state(AgentState::RunningShort);
                self.flush_transitions();
                let short = self
                    .run_simulation(self.settings.short_sim_duration_s)
                    .await?;
                if short.winrate >= initial.winrate {
                    // Both simulations hold up. Going live is a recorded
                    // decision only; no order path exists here.
                    self.bus.emit(
                        EventType::Info,
                        format!(
                            "Version {} validated: ready for live ({:.1}% -> {:.1}%)",
                            short.version_id, initial.winrate, short.winrate
                        ),
                        json!({
                            "agent_id": self.agent_id,
                            "decision": "ready_for_live",
                            "initial_winrate": initial.winrate,
                            "short_winrate": short.winrate,
                        }),
                        Severity::Success,
                    );
                } else {
                    self.optimize(&short).await?;
                }
            }
            DecisionKind::SearchHistory => {
                self.set_state(AgentState::SearchingHistory);
                self.flush_transitions();
                self.search_history(&initial).await?;
            }
            DecisionKind::Optimize => {
                self.optimize(&initial).await?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Simulation
    // -------------------------------------------------------------------------

    async fn run_simulation(&self, duration_s: u64) -> Result<SimulationRecord> {
        let version = self
            .versions
            .current()
            .context("no active version to simulate")?;

        self.orders.write().clear();
        *self.live.write() = LiveSimStats {
            is_running: true,
            initial_balance: self.initial_capital,
            current_balance: self.initial_capital,
            ..Default::default()
        };
        *self.progress.write() = Some(SimProgress {
            start_time: Utc::now(),
            duration_s,
        });
        self.bus
            .simulation_started(&self.agent_id, duration_s, &version.name);

        let config = version
            .config
            .with_position_size(position_size_for_score(version.score));

        let mut trader = PaperTrader::new(
            config.clone(),
            &self.symbol,
            self.initial_capital,
            self.bus.clone(),
            &self.agent_id,
        )
        .with_live_stats(self.live.clone());

        let outcome = trader
            .run(
                &self.feed,
                duration_s,
                self.settings.tick_interval_s,
                &self.stop_flag,
            )
            .await;
        *self.progress.write() = None;
        let report = outcome?;

        let winrate = winrate_of(report.stats.winning_trades, report.stats.trades_executed);
        let score = simulation_score(winrate, report.stats.total_pnl_percent);

        let record = SimulationRecord {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            version_id: version.id.clone(),
            duration_seconds: duration_s,
            total_orders: report.stats.trades_executed,
            winning_orders: report.stats.winning_trades,
            losing_orders: report.stats.losing_trades,
            winrate,
            score,
            total_pnl: report.stats.total_pnl,
            total_pnl_percent: report.stats.total_pnl_percent,
            config,
            orders: report.trades.clone(),
            market_conditions: report.market_conditions,
            recommendation: report.recommendation.clone(),
            created_at: Utc::now(),
        };

        *self.orders.write() = report.trades;
        self.versions
            .annotate(&version.id, score, winrate, report.market_conditions)?;
        self.history.write().push(record.clone());
        self.bus.simulation_completed(
            &self.agent_id,
            &version.name,
            winrate,
            record.total_pnl_percent,
            record.total_orders,
        );
        self.persist_version(&record);

        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    async fn evaluate_simulation(&self, record: &SimulationRecord) -> DecisionKind {
        let context = [
            (
                "simulation_results",
                serde_json::to_string(record).unwrap_or_default(),
            ),
            (
                "config",
                serde_json::to_string(&record.config).unwrap_or_default(),
            ),
            (
                "market_conditions",
                serde_json::to_string(&record.market_conditions).unwrap_or_default(),
            ),
        ];
        let outcome = self
            .advisor
            .think(NodeType::EvaluateSimulation, &context)
            .await;

        let recommended = outcome
            .content
            .get("recommended_next_step")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.bus.brain_decision(
            &self.agent_id,
            recommended.as_deref().unwrap_or("thresholds"),
            &outcome.reasoning,
            outcome.confidence,
        );

        decide(
            recommended.as_deref(),
            record.score,
            self.settings.high_score_threshold,
            self.settings.medium_score_threshold,
        )
    }

    // -------------------------------------------------------------------------
    // Optimisation
    // -------------------------------------------------------------------------

    async fn optimize(&self, last: &SimulationRecord) -> Result<()> {
        self.set_state(AgentState::Optimizing);
        self.flush_transitions();
        self.bus.emit(
            EventType::OptimizationStarted,
            "Parameter optimisation started",
            json!({ "agent_id": self.agent_id }),
            Severity::Info,
        );

        let current = self
            .versions
            .current()
            .context("no active version to optimise")?;

        let recent: Vec<SimulationRecord> = {
            let history = self.history.read();
            history.iter().rev().take(5).cloned().collect()
        };
        let patterns = self.analyze_patterns();
        let context = [
            (
                "recent_results",
                serde_json::to_string(&recent).unwrap_or_default(),
            ),
            (
                "current_config",
                serde_json::to_string(&current.config).unwrap_or_default(),
            ),
            ("patterns", patterns.to_string()),
        ];

        let outcome = self
            .advisor
            .think(NodeType::OptimizeParameters, &context)
            .await;
        self.bus.brain_decision(
            &self.agent_id,
            "optimize_parameters",
            &outcome.reasoning,
            outcome.confidence,
        );

        let raw = outcome
            .content
            .get("optimized_parameters")
            .cloned()
            .unwrap_or(Value::Null);
        let (mut overlay, clamps, unknown) = clamp_parameters(&raw);

        for note in &clamps {
            self.bus.emit(
                EventType::Info,
                format!(
                    "Advisor parameter {} clamped from {} to {}",
                    note.field, note.from, note.to
                ),
                json!({ "agent_id": self.agent_id, "field": note.field }),
                Severity::Warning,
            );
        }
        for field in &unknown {
            self.bus.emit(
                EventType::Info,
                format!("Advisor returned unknown parameter '{field}', ignored"),
                json!({ "agent_id": self.agent_id, "field": field }),
                Severity::Warning,
            );
        }

        // Nothing usable from the advisor: fall back to the deterministic
        // rules the simulation already derived, then to the best-performing
        // parameters the training log has seen.
        if overlay.is_empty() {
            overlay = last.recommendation.clone();
        }
        if overlay.is_empty() {
            if let Some(best) = self.training.best_parameters() {
                overlay = serde_json::from_value(best).unwrap_or_default();
            }
        }

        let next_number = self.versions.count() + 1;
        let mut config = current.config.apply_overlay(&overlay);
        config.version = format!("v{next_number}");
        config.name = format!("v{next_number}_brain_optimized");
        config.description = outcome
            .content
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or("tuned from recent simulations")
            .to_string();

        let name = config.name.clone();
        let version = self
            .versions
            .create(name, config, Some(current.id.clone()));
        self.versions.adopt(&version.id)?;

        let changes: Vec<String> = outcome
            .content
            .get("changes_made")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        self.bus
            .version_created(&self.agent_id, &version.name, &changes);

        self.training.add(
            serde_json::to_value(&overlay).unwrap_or(Value::Null),
            last.market_conditions,
            last.total_pnl_percent,
        );

        self.bus.emit(
            EventType::OptimizationCompleted,
            format!("Adopted {}", version.name),
            json!({ "agent_id": self.agent_id, "version": version.name }),
            Severity::Success,
        );
        Ok(())
    }

    fn analyze_patterns(&self) -> Value {
        let history = self.history.read();
        if history.is_empty() {
            return json!({ "no_data": true });
        }
        let window = &history[history.len().saturating_sub(10)..];
        let winrates: Vec<f64> = window.iter().map(|r| r.winrate).collect();
        let pnls: Vec<f64> = window.iter().map(|r| r.total_pnl_percent).collect();
        let trend = if winrates.len() > 1 && winrates[winrates.len() - 1] > winrates[0] {
            "improving"
        } else {
            "declining"
        };
        json!({
            "avg_winrate": winrates.iter().sum::<f64>() / winrates.len() as f64,
            "winrate_trend": trend,
            "avg_pnl": pnls.iter().sum::<f64>() / pnls.len() as f64,
            "total_simulations": history.len(),
            "best_winrate": winrates.iter().cloned().fold(f64::MIN, f64::max),
            "worst_winrate": winrates.iter().cloned().fold(f64::MAX, f64::min),
        })
    }

    // -------------------------------------------------------------------------
    // History search
    // -------------------------------------------------------------------------

    async fn search_history(&self, last: &SimulationRecord) -> Result<()> {
        let conditions = last.market_conditions;
        let versions = self.versions.list();
        let versions_view: Vec<&AgentVersion> = versions.iter().map(|v| v.as_ref()).collect();
        let results_view: Vec<Value> = {
            let history = self.history.read();
            history
                .iter()
                .map(|r| {
                    json!({
                        "version_id": r.version_id,
                        "winrate": r.winrate,
                        "pnl": r.total_pnl_percent,
                        "market_conditions": r.market_conditions,
                    })
                })
                .collect()
        };

        let context = [
            (
                "current_conditions",
                serde_json::to_string(&conditions).unwrap_or_default(),
            ),
            (
                "historical_versions",
                serde_json::to_string(&versions_view).unwrap_or_default(),
            ),
            (
                "historical_results",
                serde_json::to_string(&results_view).unwrap_or_default(),
            ),
        ];

        let outcome = self.advisor.think(NodeType::SearchHistory, &context).await;
        self.bus.brain_decision(
            &self.agent_id,
            "search_history",
            &outcome.reasoning,
            outcome.confidence,
        );

        if let Some(best_id) = outcome.content.get("best_version_id").and_then(Value::as_str) {
            if let Ok(version) = self.versions.adopt(best_id) {
                self.bus.version_activated(&self.agent_id, &version.name);
                return Ok(());
            }
            warn!(best_id, "advisor suggested an unknown version");
        }

        if let Some(version) = self
            .versions
            .find_best_for(&conditions, self.settings.medium_score_threshold)
        {
            self.versions.adopt(&version.id)?;
            self.bus.version_activated(&self.agent_id, &version.name);
            return Ok(());
        }

        // No eligible history: tune instead.
        self.optimize(last).await
    }

    // -------------------------------------------------------------------------
    // Durable sink
    // -------------------------------------------------------------------------

    async fn load_versions_from_sink(&self) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let symbol = self.symbol.clone();
        let loaded = tokio::task::spawn_blocking(move || sink.load_all(&symbol)).await;

        match loaded {
            Ok(Ok(records)) => {
                let versions: Vec<AgentVersion> = records
                    .into_iter()
                    .map(|r| AgentVersion {
                        config: serde_json::from_str(&r.config_json).unwrap_or_default(),
                        id: r.id,
                        name: r.version_name,
                        score: r.score,
                        winrate: r.winrate,
                        total_simulations: 1,
                        is_active: r.is_active,
                        is_production: false,
                        created_at: r
                            .created_at
                            .parse::<DateTime<Utc>>()
                            .unwrap_or_else(|_| Utc::now()),
                        market_conditions: None,
                        parent_id: None,
                    })
                    .collect();
                self.versions.seed(versions);
            }
            Ok(Err(e)) => warn!(error = %e, "could not load versions from sink"),
            Err(e) => warn!(error = %e, "sink load task failed"),
        }
    }

    /// Fire-and-forget snapshot write. Sink trouble is a log line, nothing
    /// more.
    fn persist_version(&self, record: &SimulationRecord) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let Some(version) = self.versions.current() else {
            return;
        };
        let snapshot = VersionRecord {
            id: version.id.clone(),
            symbol: self.symbol.clone(),
            version_name: version.name.clone(),
            config_json: serde_json::to_string(&version.config).unwrap_or_else(|_| "{}".into()),
            score: record.score,
            winrate: record.winrate,
            total_trades: record.total_orders as i64,
            winning_trades: record.winning_orders as i64,
            losing_trades: record.losing_orders as i64,
            total_pnl: record.total_pnl,
            total_pnl_percent: record.total_pnl_percent,
            duration_seconds: record.duration_seconds as i64,
            initial_capital: self.initial_capital,
            final_capital: self.initial_capital + record.total_pnl,
            is_active: version.is_active,
            created_at: version.created_at.to_rfc3339(),
        };
        tokio::task::spawn_blocking(move || {
            if let Err(e) = sink.upsert_version(&snapshot) {
                warn!(error = %e, "version snapshot not persisted");
            }
        });
    }

    async fn cancellable_sleep(&self, seconds: f64) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs_f64(seconds);
        while std::time::Instant::now() < deadline {
            if self.stop_flag.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }

    // -------------------------------------------------------------------------
    // Projections
    // -------------------------------------------------------------------------

    pub fn status(&self) -> AgentStatus {
        let progress = *self.progress.read();
        let simulation = match progress {
            Some(p) => {
                let elapsed = (Utc::now() - p.start_time).num_seconds().max(0) as u64;
                SimulationProgress {
                    is_running: elapsed < p.duration_s,
                    duration: p.duration_s,
                    elapsed,
                    remaining: p.duration_s.saturating_sub(elapsed),
                    start_time: Some(p.start_time),
                }
            }
            None => SimulationProgress {
                is_running: false,
                duration: 0,
                elapsed: 0,
                remaining: 0,
                start_time: None,
            },
        };

        let history = self.history.read();
        let total_pnl: f64 = history.iter().map(|r| r.total_pnl).sum();
        let trades_executed: u64 = history.iter().map(|r| r.total_orders).sum();
        let session_winrate = history
            .last()
            .map(|r| r.winrate)
            .unwrap_or(0.0);

        AgentStatus {
            agent_id: self.agent_id.clone(),
            symbol: self.symbol.clone(),
            state: *self.state.read(),
            is_running: self.is_running(),
            current_version: self.versions.current().map(|v| v.as_ref().clone()),
            versions_count: self.versions.count(),
            simulations_count: history.len(),
            active_orders: self
                .orders
                .read()
                .iter()
                .filter(|o| o.status == "filled")
                .cloned()
                .collect(),
            total_pnl,
            session_winrate,
            trades_executed,
            brain: self.advisor.stats(),
            training: self.training.summary(),
            simulation,
            live_stats: self.live.read().clone(),
        }
    }

    pub fn orders(&self) -> Vec<TradeView> {
        self.orders.read().clone()
    }

    pub fn versions(&self) -> Vec<AgentVersion> {
        self.versions
            .list()
            .iter()
            .map(|v| v.as_ref().clone())
            .collect()
    }

    pub fn simulations(&self) -> Vec<SimulationRecord> {
        self.history.read().clone()
    }
}

impl std::fmt::Debug for TradingAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingAgent")
            .field("agent_id", &self.agent_id)
            .field("symbol", &self.symbol)
            .field("state", &*self.state.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- decision mapping --------------------------------------------------

    #[test]
    fn advisor_recommendation_wins_over_thresholds() {
        assert_eq!(
            decide(Some("search_history"), 90.0, 65.0, 50.0),
            DecisionKind::SearchHistory
        );
        assert_eq!(
            decide(Some("run_short_sim"), 10.0, 65.0, 50.0),
            DecisionKind::RunShortSim
        );
        assert_eq!(
            decide(Some("optimize"), 90.0, 65.0, 50.0),
            DecisionKind::Optimize
        );
    }

    #[test]
    fn thresholds_decide_without_a_recommendation() {
        assert_eq!(decide(None, 70.0, 65.0, 50.0), DecisionKind::RunShortSim);
        assert_eq!(decide(None, 55.0, 65.0, 50.0), DecisionKind::Optimize);
        // A 30% run with no advisor lands on history search.
        assert_eq!(decide(None, 30.0, 65.0, 50.0), DecisionKind::SearchHistory);
        // An unrecognised recommendation falls back to thresholds too.
        assert_eq!(
            decide(Some("dance"), 55.0, 65.0, 50.0),
            DecisionKind::Optimize
        );
    }

    #[test]
    fn threshold_edges_are_inclusive() {
        assert_eq!(decide(None, 65.0, 65.0, 50.0), DecisionKind::RunShortSim);
        assert_eq!(decide(None, 50.0, 65.0, 50.0), DecisionKind::Optimize);
        assert_eq!(decide(None, 49.99, 65.0, 50.0), DecisionKind::SearchHistory);
    }

    // ---- scoring -----------------------------------------------------------

    #[test]
    fn score_caps_the_pnl_bonus() {
        assert!((simulation_score(60.0, 2.0) - 64.0).abs() < 1e-12);
        assert!((simulation_score(60.0, 50.0) - 70.0).abs() < 1e-12);
        // Losses are uncapped downwards.
        assert!((simulation_score(60.0, -10.0) - 40.0).abs() < 1e-12);
    }

    #[test]
    fn winrate_is_neutral_with_no_trades() {
        assert_eq!(winrate_of(0, 0), 50.0);
        assert_eq!(winrate_of(3, 4), 75.0);
    }

    // ---- backoff -----------------------------------------------------------

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay_s(1), 10);
        assert_eq!(backoff_delay_s(2), 20);
        assert_eq!(backoff_delay_s(3), 40);
        assert_eq!(backoff_delay_s(5), 160);
        assert_eq!(backoff_delay_s(9), 300);
    }

    // ---- sizing ------------------------------------------------------------

    #[test]
    fn position_size_follows_confidence() {
        assert_eq!(position_size_for_score(85.0), 20.0);
        assert_eq!(position_size_for_score(72.0), 15.0);
        assert_eq!(position_size_for_score(61.0), 10.0);
        assert_eq!(position_size_for_score(0.0), 5.0);
    }

    // ---- pattern aggregates ------------------------------------------------

    fn record_with(winrate: f64, pnl_pct: f64) -> SimulationRecord {
        SimulationRecord {
            id: "r".to_string(),
            version_id: "v".to_string(),
            duration_seconds: 30,
            total_orders: 4,
            winning_orders: 2,
            losing_orders: 2,
            winrate,
            score: winrate,
            total_pnl: pnl_pct * 10.0,
            total_pnl_percent: pnl_pct,
            config: GraphConfig::scalping(),
            orders: Vec::new(),
            market_conditions: MarketConditions::default(),
            recommendation: Default::default(),
            created_at: Utc::now(),
        }
    }

    fn bare_agent() -> TradingAgent {
        TradingAgent::new(
            "BTC-USD",
            1000.0,
            Arc::new(AdvisorClient::new("http://localhost", "test", None)),
            Arc::new(EventBus::default()),
            None,
            AgentSettings::default(),
        )
    }

    #[test]
    fn patterns_empty_without_history() {
        let agent = bare_agent();
        assert_eq!(agent.analyze_patterns(), json!({ "no_data": true }));
    }

    #[test]
    fn patterns_aggregate_recent_history() {
        let agent = bare_agent();
        agent.history.write().push(record_with(40.0, -0.5));
        agent.history.write().push(record_with(60.0, 1.0));

        let patterns = agent.analyze_patterns();
        assert_eq!(patterns["winrate_trend"], "improving");
        assert!((patterns["avg_winrate"].as_f64().unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(patterns["total_simulations"], 2);
        assert_eq!(patterns["best_winrate"], 60.0);
    }

    // ---- offline optimisation path ----------------------------------------

    #[tokio::test]
    async fn fallback_optimize_adopts_deterministic_overlay() {
        let agent = bare_agent();
        let v1 = agent
            .versions
            .create("v1_initial", GraphConfig::scalping(), None);
        agent.versions.adopt(&v1.id).unwrap();

        // A quiet simulation recommends loosening the entry side.
        let mut record = record_with(50.0, 0.0);
        record.version_id = v1.id.clone();
        record.recommendation.rsi_oversold = Some(35.0);
        record.recommendation.price_change_threshold = Some(0.035);

        agent.optimize(&record).await.unwrap();

        let current = agent.versions.current().unwrap();
        assert_ne!(current.id, v1.id);
        assert_eq!(current.name, "v2_brain_optimized");
        assert_eq!(current.parent_id.as_deref(), Some(v1.id.as_str()));
        assert!((current.config.rsi_oversold - 35.0).abs() < 1e-12);
        assert!((current.config.price_change_threshold - 0.035).abs() < 1e-12);
        assert_eq!(agent.training.len(), 1);
    }

    #[tokio::test]
    async fn optimize_reaches_for_best_training_parameters_last() {
        let agent = bare_agent();
        let v1 = agent
            .versions
            .create("v1_initial", GraphConfig::scalping(), None);
        agent.versions.adopt(&v1.id).unwrap();

        let strong = ParameterOverlay {
            min_buy_score: Some(3.0),
            ..Default::default()
        };
        agent.training.add(
            serde_json::to_value(&strong).unwrap(),
            MarketConditions::default(),
            1.5,
        );

        // The advisor fallback offers nothing and the simulation produced an
        // empty recommendation, so the training log decides.
        let mut record = record_with(55.0, 0.2);
        record.version_id = v1.id.clone();
        assert!(record.recommendation.is_empty());

        agent.optimize(&record).await.unwrap();

        let current = agent.versions.current().unwrap();
        assert_eq!(current.name, "v2_brain_optimized");
        assert!((current.config.min_buy_score - 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn low_score_with_no_history_falls_through_to_optimize() {
        let agent = bare_agent();
        let v1 = agent
            .versions
            .create("v1_initial", GraphConfig::scalping(), None);
        agent.versions.adopt(&v1.id).unwrap();

        // 30% winrate and no credential: the fallback recommends nothing,
        // the thresholds pick history search, and with no eligible history
        // the agent must end up on a freshly optimised version.
        let mut record = record_with(30.0, -1.0);
        record.version_id = v1.id.clone();
        record.recommendation.rsi_oversold = Some(25.0);

        let decision = agent.evaluate_simulation(&record).await;
        assert_eq!(decision, DecisionKind::SearchHistory);

        agent.search_history(&record).await.unwrap();
        let current = agent.versions.current().unwrap();
        assert_eq!(current.name, "v2_brain_optimized");
    }

    #[tokio::test]
    async fn search_history_adopts_matching_version() {
        let agent = bare_agent();
        let good = agent
            .versions
            .create("v1_good", GraphConfig::scalping(), None);
        agent.versions.adopt(&good.id).unwrap();
        agent
            .versions
            .annotate(&good.id, 80.0, 75.0, MarketConditions::default())
            .unwrap();

        let v2 = agent
            .versions
            .create("v2_current", GraphConfig::scalping(), None);
        agent.versions.adopt(&v2.id).unwrap();

        let mut record = record_with(30.0, -1.0);
        record.version_id = v2.id.clone();
        agent.search_history(&record).await.unwrap();

        // The proven version is re-adopted instead of minting a new one.
        assert_eq!(agent.versions.current().unwrap().id, good.id);
    }

    #[test]
    fn transitions_queue_until_flushed() {
        let agent = bare_agent();
        agent.set_state(AgentState::RunningInitial);
        agent.set_state(AgentState::Evaluating);
        assert_eq!(agent.pending_transitions.lock().len(), 2);

        agent.flush_transitions();
        assert!(agent.pending_transitions.lock().is_empty());
        let events = agent.bus.get(10, Some(EventType::StateChanged), None);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn status_projects_consistent_counts() {
        let agent = bare_agent();
        let v1 = agent
            .versions
            .create("v1_initial", GraphConfig::scalping(), None);
        agent.versions.adopt(&v1.id).unwrap();
        agent.history.write().push(record_with(55.0, 0.4));

        let status = agent.status();
        assert_eq!(status.versions_count, 1);
        assert_eq!(status.simulations_count, 1);
        assert_eq!(status.current_version.unwrap().id, v1.id);
        assert!(!status.simulation.is_running);
        assert_eq!(status.trades_executed, 4);
    }
}
