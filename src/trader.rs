// =============================================================================
// Paper Trader — tick-driven simulation of a single long position
// =============================================================================
//
// Life-cycle: Idle -> Running -> Closing -> Done. One simulation owns one
// price window, at most one open position, and its stats; nothing is shared
// with other simulations.
//
// Per-tick cycle:
//   1. Reject structural garbage (price <= 0) and stale timestamps.
//   2. Update price extrema, append to the window.
//   3. Compute the indicator snapshot.
//   4. Evaluate the signal.
//   5. BUY with no position  -> open at the bid.
//   6. SELL while holding    -> close.
//   7. While holding: ratchet the trailing stop, then check stop / take.
//
// `step` is synchronous and deterministic so the whole engine is testable
// with synthetic ticks; `run` drives it from the live feed.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::EventBus;
use crate::graph::{GraphConfig, ParameterOverlay};
use crate::indicators::IndicatorSnapshot;
use crate::indicators::{momentum, rsi, trend};
use crate::price_source::{SpotFeed, Tick};
use crate::signals::{self, TradeTiming};
use crate::types::{ExitReason, MarketConditions, SignalKind};

/// Maximum ticks retained in the rolling window.
const PRICE_WINDOW_CAP: usize = 100;

// =============================================================================
// Positions and trades
// =============================================================================

/// The one open long holding of a running simulation.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub id: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Never decreases over the position's lifetime.
    pub highest_price: f64,
    pub lowest_price: f64,
}

/// A realised round trip.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedTrade {
    pub id: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub pnl: f64,
    pub pnl_percent: f64,
}

/// Order projection for the HTTP surface: closed trades and the still-open
/// position share one shape.
#[derive(Debug, Clone, Serialize)]
pub struct TradeView {
    pub id: String,
    pub symbol: String,
    pub side: &'static str,
    pub entry_price: f64,
    pub quantity: f64,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl TradeView {
    fn from_closed(trade: &ClosedTrade, symbol: &str) -> Self {
        Self {
            id: trade.id.clone(),
            symbol: symbol.to_string(),
            side: "buy",
            entry_price: trade.entry_price,
            quantity: trade.quantity,
            status: "closed",
            created_at: trade.entry_time,
            closed_at: Some(trade.exit_time),
            exit_price: Some(trade.exit_price),
            exit_reason: Some(trade.exit_reason),
            pnl: trade.pnl,
            pnl_percent: trade.pnl_percent,
            stop_loss: trade.stop_loss,
            take_profit: trade.take_profit,
        }
    }

    fn from_open(position: &Position, symbol: &str, last_price: f64) -> Self {
        let pnl = (last_price - position.entry_price) * position.quantity;
        let pnl_percent = if position.entry_price > 0.0 {
            (last_price - position.entry_price) / position.entry_price * 100.0
        } else {
            0.0
        };
        Self {
            id: position.id.clone(),
            symbol: symbol.to_string(),
            side: "buy",
            entry_price: position.entry_price,
            quantity: position.quantity,
            status: "filled",
            created_at: position.entry_time,
            closed_at: None,
            exit_price: None,
            exit_reason: None,
            pnl,
            pnl_percent,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SimulationStats {
    pub initial_capital: f64,
    pub current_capital: f64,
    pub peak_capital: f64,
    pub signals_generated: u64,
    pub trades_executed: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: f64,
    pub total_pnl_percent: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub max_drawdown_pct: f64,
    pub current_drawdown_pct: f64,
    pub start_price: f64,
    pub end_price: f64,
    pub high_price: f64,
    pub low_price: f64,
}

impl SimulationStats {
    fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            current_capital: initial_capital,
            peak_capital: initial_capital,
            signals_generated: 0,
            trades_executed: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: 0.0,
            total_pnl_percent: 0.0,
            best_trade: 0.0,
            worst_trade: 0.0,
            max_drawdown_pct: 0.0,
            current_drawdown_pct: 0.0,
            start_price: 0.0,
            end_price: 0.0,
            high_price: 0.0,
            low_price: 0.0,
        }
    }
}

/// Rolling projection of a running simulation for UI polling.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveSimStats {
    pub is_running: bool,
    pub initial_balance: f64,
    pub current_balance: f64,
    pub total_orders: u64,
    pub active_orders: u64,
    pub closed_orders: u64,
    pub winning_orders: u64,
    pub losing_orders: u64,
    pub winrate: f64,
    pub total_pnl: f64,
    pub pnl_percent: f64,
}

// =============================================================================
// Report
// =============================================================================

/// Everything the agent needs after a simulation finishes.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub stats: SimulationStats,
    pub trades: Vec<TradeView>,
    pub market_conditions: MarketConditions,
    pub buy_and_hold_pnl_percent: f64,
    /// Deterministic tuning suggestion derived from the outcome. Used
    /// directly when the advisor has nothing better to offer.
    pub recommendation: ParameterOverlay,
}

// =============================================================================
// Trader
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraderState {
    Idle,
    Running,
    Closing,
    Done,
}

pub struct PaperTrader {
    config: GraphConfig,
    symbol: String,
    agent_id: String,
    bus: Arc<EventBus>,
    state: TraderState,
    stats: SimulationStats,
    window: Vec<f64>,
    position: Option<Position>,
    closed: Vec<ClosedTrade>,
    timing: TradeTiming,
    last_tick_time: Option<DateTime<Utc>>,
    last_price: f64,
    live: Option<Arc<RwLock<LiveSimStats>>>,
}

impl PaperTrader {
    pub fn new(
        config: GraphConfig,
        symbol: impl Into<String>,
        initial_capital: f64,
        bus: Arc<EventBus>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            stats: SimulationStats::new(initial_capital),
            config,
            symbol: symbol.into(),
            agent_id: agent_id.into(),
            bus,
            state: TraderState::Idle,
            window: Vec::with_capacity(PRICE_WINDOW_CAP),
            position: None,
            closed: Vec::new(),
            timing: TradeTiming::default(),
            last_tick_time: None,
            last_price: 0.0,
            live: None,
        }
    }

    /// Mirror per-tick progress into a shared projection.
    pub fn with_live_stats(mut self, live: Arc<RwLock<LiveSimStats>>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn state(&self) -> TraderState {
        self.state
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn timing(&self) -> &TradeTiming {
        &self.timing
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    /// Closed trades plus the open position, newest first.
    pub fn trade_views(&self) -> Vec<TradeView> {
        let mut views: Vec<TradeView> = self
            .closed
            .iter()
            .map(|t| TradeView::from_closed(t, &self.symbol))
            .collect();
        if let Some(pos) = &self.position {
            views.push(TradeView::from_open(pos, &self.symbol, self.last_price));
        }
        views.reverse();
        views
    }

    // -------------------------------------------------------------------------
    // One tick
    // -------------------------------------------------------------------------

    /// Process one tick. Stale timestamps are ignored; a non-positive price
    /// is a structural fault and aborts the simulation.
    pub fn step(&mut self, tick: &Tick) -> Result<()> {
        if tick.price <= 0.0 {
            anyhow::bail!("structural fault: non-positive price {}", tick.price);
        }
        if let Some(last) = self.last_tick_time {
            if tick.timestamp <= last {
                debug!(symbol = %self.symbol, "stale tick ignored");
                return Ok(());
            }
        }
        self.last_tick_time = Some(tick.timestamp);
        self.last_price = tick.price;
        self.state = TraderState::Running;

        // Price extrema.
        if self.stats.start_price == 0.0 {
            self.stats.start_price = tick.price;
            self.stats.high_price = tick.price;
            self.stats.low_price = tick.price;
        }
        self.stats.end_price = tick.price;
        self.stats.high_price = self.stats.high_price.max(tick.price);
        self.stats.low_price = self.stats.low_price.min(tick.price);

        self.window.push(tick.price);
        while self.window.len() > PRICE_WINDOW_CAP {
            self.window.remove(0);
        }

        let snapshot = IndicatorSnapshot::compute(&self.window, &self.config);
        let signal = signals::evaluate(
            tick.price,
            &snapshot,
            self.position.as_ref(),
            tick.timestamp,
            &self.config,
            &self.timing,
        );

        if let Some(sig) = signal {
            self.stats.signals_generated += 1;
            match sig.kind {
                SignalKind::Buy if self.position.is_none() => {
                    self.open_position(tick.price, tick.timestamp, &sig.reason);
                }
                SignalKind::Sell if self.position.is_some() => {
                    let reason = if sig.strategy_tags.iter().any(|t| t == "time_exit") {
                        ExitReason::TimeExit
                    } else {
                        ExitReason::Signal
                    };
                    self.close_position(tick.price, tick.timestamp, reason);
                }
                _ => {}
            }
        }

        // Protective exits on whatever is still open.
        let mut protective_exit = None;
        if let Some(pos) = &mut self.position {
            pos.highest_price = pos.highest_price.max(tick.price);
            pos.lowest_price = pos.lowest_price.min(tick.price);
            let trail = tick.price * (1.0 - self.config.trailing_stop_pct / 100.0);
            pos.stop_loss = pos.stop_loss.max(trail);

            if tick.price <= pos.stop_loss {
                protective_exit = Some(ExitReason::StopLoss);
            } else if tick.price >= pos.take_profit {
                protective_exit = Some(ExitReason::TakeProfit);
            }
        }
        if let Some(reason) = protective_exit {
            self.close_position(tick.price, tick.timestamp, reason);
        }

        self.publish_live(true);
        Ok(())
    }

    fn open_position(&mut self, price: f64, time: DateTime<Utc>, reason: &str) {
        let quantity = (self.config.position_size_pct / 100.0) * self.stats.current_capital / price;
        let (stop_pct, take_pct) = if self.config.is_scalping() {
            (self.config.micro_stop_loss, self.config.micro_profit_target)
        } else {
            (self.config.stop_loss_pct, self.config.take_profit_pct)
        };

        let position = Position {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            entry_price: price,
            entry_time: time,
            quantity,
            stop_loss: price * (1.0 - stop_pct / 100.0),
            take_profit: price * (1.0 + take_pct / 100.0),
            highest_price: price,
            lowest_price: price,
        };

        info!(
            symbol = %self.symbol,
            id = %position.id,
            price,
            quantity,
            stop_loss = position.stop_loss,
            take_profit = position.take_profit,
            reason,
            "position opened"
        );
        self.bus
            .order_created(&self.agent_id, &position.id, "buy", price, quantity);
        self.position = Some(position);
    }

    fn close_position(&mut self, price: f64, time: DateTime<Utc>, reason: ExitReason) {
        let Some(pos) = self.position.take() else {
            return;
        };
        self.state = TraderState::Closing;

        let pnl = (price - pos.entry_price) * pos.quantity;
        let pnl_percent = if pos.entry_price > 0.0 {
            (price - pos.entry_price) / pos.entry_price * 100.0
        } else {
            0.0
        };

        self.stats.current_capital += pnl;
        self.stats.peak_capital = self.stats.peak_capital.max(self.stats.current_capital);
        self.stats.current_drawdown_pct = if self.stats.peak_capital > 0.0 {
            (self.stats.peak_capital - self.stats.current_capital) / self.stats.peak_capital * 100.0
        } else {
            0.0
        };
        self.stats.max_drawdown_pct = self
            .stats
            .max_drawdown_pct
            .max(self.stats.current_drawdown_pct);

        self.stats.trades_executed += 1;
        if pnl > 0.0 {
            self.stats.winning_trades += 1;
        } else {
            self.stats.losing_trades += 1;
        }
        self.stats.total_pnl += pnl;
        self.stats.total_pnl_percent = if self.stats.initial_capital > 0.0 {
            self.stats.total_pnl / self.stats.initial_capital * 100.0
        } else {
            0.0
        };
        self.stats.best_trade = self.stats.best_trade.max(pnl);
        self.stats.worst_trade = self.stats.worst_trade.min(pnl);

        self.timing.last_trade_time = Some(time);
        if pnl < 0.0 {
            self.timing.last_loss_time = Some(time);
        }

        info!(
            symbol = %self.symbol,
            id = %pos.id,
            exit_price = price,
            %reason,
            pnl,
            pnl_percent,
            "position closed"
        );
        self.bus
            .order_closed(&self.agent_id, &pos.id, pnl, pnl_percent);

        self.closed.push(ClosedTrade {
            id: pos.id,
            entry_price: pos.entry_price,
            entry_time: pos.entry_time,
            quantity: pos.quantity,
            stop_loss: pos.stop_loss,
            take_profit: pos.take_profit,
            exit_price: price,
            exit_time: time,
            exit_reason: reason,
            pnl,
            pnl_percent,
        });
        self.state = TraderState::Running;
    }

    fn publish_live(&self, is_running: bool) {
        let Some(live) = &self.live else {
            return;
        };
        let unrealized = self
            .position
            .as_ref()
            .map(|p| (self.last_price - p.entry_price) * p.quantity)
            .unwrap_or(0.0);
        let closed = self.closed.len() as u64;
        let winning = self.stats.winning_trades;
        let total_pnl = self.stats.total_pnl + unrealized;

        let mut stats = live.write();
        stats.is_running = is_running;
        stats.initial_balance = self.stats.initial_capital;
        stats.current_balance = self.stats.initial_capital + total_pnl;
        stats.active_orders = if self.position.is_some() { 1 } else { 0 };
        stats.closed_orders = closed;
        stats.total_orders = closed + stats.active_orders;
        stats.winning_orders = winning;
        stats.losing_orders = self.stats.losing_trades;
        stats.winrate = if closed > 0 {
            winning as f64 / closed as f64 * 100.0
        } else {
            0.0
        };
        stats.total_pnl = total_pnl;
        stats.pnl_percent = if self.stats.initial_capital > 0.0 {
            total_pnl / self.stats.initial_capital * 100.0
        } else {
            0.0
        };
    }

    // -------------------------------------------------------------------------
    // Driving loops
    // -------------------------------------------------------------------------

    /// Run against the live feed for `duration_s`, one tick every
    /// `tick_interval_s`. Fetch failures skip the tick; a structural fault
    /// aborts with an error. Cancellation is observed between ticks.
    pub async fn run(
        &mut self,
        feed: &SpotFeed,
        duration_s: u64,
        tick_interval_s: f64,
        cancel: &AtomicBool,
    ) -> Result<SimulationReport> {
        let started = std::time::Instant::now();
        let interval = std::time::Duration::from_secs_f64(tick_interval_s);
        let mut cancelled = false;

        while started.elapsed().as_secs() < duration_s {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            match feed.current().await {
                Ok(tick) => self.step(&tick)?,
                Err(e) => debug!(symbol = %self.symbol, error = %e, "tick skipped"),
            }
            tokio::time::sleep(interval).await;
        }

        let reason = if cancelled {
            ExitReason::AgentStopped
        } else {
            ExitReason::SimulationEnd
        };
        Ok(self.finish(reason))
    }

    /// Close anything still open and assemble the report.
    pub fn finish(&mut self, open_position_reason: ExitReason) -> SimulationReport {
        if self.position.is_some() {
            let time = self.last_tick_time.unwrap_or_else(Utc::now);
            self.close_position(self.last_price, time, open_position_reason);
        }
        self.state = TraderState::Done;
        self.publish_live(false);

        let buy_and_hold_pnl_percent = if self.stats.start_price > 0.0 {
            (self.stats.end_price - self.stats.start_price) / self.stats.start_price * 100.0
        } else {
            0.0
        };

        let market_conditions = if self.window.len() >= 2 {
            MarketConditions {
                rsi: rsi::rsi(&self.window, self.config.rsi_period),
                volatility: momentum::volatility(&self.window),
                trend: trend::trend_slope(&self.window),
                momentum: momentum::momentum(&self.window, 10),
            }
        } else {
            MarketConditions::default()
        };

        let recommendation = recommend(&self.stats, buy_and_hold_pnl_percent, &self.config);

        SimulationReport {
            stats: self.stats.clone(),
            trades: self.trade_views(),
            market_conditions,
            buy_and_hold_pnl_percent,
            recommendation,
        }
    }
}

// =============================================================================
// Deterministic tuning rules
// =============================================================================

/// Derive a candidate parameter overlay from a finished simulation.
///
/// A quiet run loosens the entry side; a losing run tightens it; heavy
/// drawdown de-risks; overtrading slows the clock; underperforming
/// buy-and-hold lengthens the holds.
pub fn recommend(
    stats: &SimulationStats,
    buy_and_hold_pct: f64,
    config: &GraphConfig,
) -> ParameterOverlay {
    let trades = stats.trades_executed;
    let win_rate = if trades > 0 {
        stats.winning_trades as f64 / trades as f64
    } else {
        0.0
    };

    let mut overlay = ParameterOverlay::default();

    if trades == 0 {
        overlay.rsi_oversold = Some((config.rsi_oversold + 5.0).min(40.0));
        overlay.price_change_threshold = Some(config.price_change_threshold * 0.7);
    } else if win_rate < 0.4 {
        overlay.rsi_oversold = Some((config.rsi_oversold - 5.0).max(20.0));
        overlay.price_change_threshold = Some(config.price_change_threshold * 1.3);
    }

    if stats.max_drawdown_pct > 5.0 {
        overlay.position_size_pct = Some((config.position_size_pct * 0.7).max(5.0));
        overlay.stop_loss_pct = Some((config.stop_loss_pct * 0.8).max(1.0));
    }

    if trades > 10 {
        overlay.min_time_between_trades = Some(config.min_time_between_trades * 1.5);
    }

    if stats.total_pnl_percent < buy_and_hold_pct - 1.0 {
        overlay.take_profit_pct = Some(config.take_profit_pct * 1.2);
    }

    overlay
}
