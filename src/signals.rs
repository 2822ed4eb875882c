// =============================================================================
// Signal Evaluator — weighted additive scoring over an indicator snapshot
// =============================================================================
//
// Entry and exit decisions are sums of independent contributions, each the
// product of a per-family weight from the config and a fixed base value.
// Contributions are additive and order-independent; a signal is emitted only
// when the accumulated score clears the configured threshold (or a forced
// exit trigger fires).
//
// Gating happens before any scoring: trade spacing, loss cooldown, and the
// maximum position duration. The time exit outranks everything else.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::graph::GraphConfig;
use crate::indicators::IndicatorSnapshot;
use crate::trader::Position;
use crate::types::SignalKind;

// =============================================================================
// Base contributions
// =============================================================================

const BASE_RSI_CROSS: f64 = 2.0;
const BASE_RSI_MILD: f64 = 0.5;
const BASE_EMA_CROSS: f64 = 2.5;
const BASE_EMA_DIFF: f64 = 1.0;
const BASE_MACD: f64 = 1.5;
const BASE_BB_TOUCH: f64 = 2.0;
const BASE_BB_ZONE: f64 = 1.0;
const BASE_MOMENTUM: f64 = 2.0;
const BASE_MOMENTUM_MILD: f64 = 0.5;
const BASE_REVERSAL: f64 = 1.5;
const BASE_SCALP_MOVE_BUY: f64 = 2.0;
const BASE_SCALP_MOVE_SELL: f64 = 1.5;
const BASE_SCALP_PROFIT: f64 = 3.0;
const BASE_SCALP_STOP: f64 = 5.0;
const BASE_NEAR_TARGET: f64 = 1.5;

/// RSI band edges for the mild-zone contributions.
const RSI_MILD_LOW: f64 = 45.0;
const RSI_MILD_HIGH: f64 = 55.0;

/// Upper bound (percent) on the fast/slow EMA spread that still counts as a
/// "just crossed, early trend" buy hint.
const EMA_DIFF_SMALL_PCT: f64 = 0.1;

/// Bollinger position beyond which the zone contributions kick in.
const BB_ZONE_EDGE: f64 = 0.5;

/// Fraction of the take-profit distance where the pre-target exit hint fires.
const NEAR_TARGET_FRACTION: f64 = 0.7;

/// Score that maps to full confidence.
const CONFIDENCE_DIVISOR: f64 = 8.0;

// =============================================================================
// Types
// =============================================================================

/// Trade-spacing bookkeeping carried by the trader across evaluations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeTiming {
    pub last_trade_time: Option<DateTime<Utc>>,
    pub last_loss_time: Option<DateTime<Utc>>,
}

/// A buy or sell decision with its full evidence trail.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
    pub price: f64,
    pub confidence: f64,
    pub reason: String,
    pub strategy_tags: Vec<String>,
    pub indicators: IndicatorSnapshot,
}

struct Score {
    total: f64,
    tags: Vec<String>,
    forced: bool,
}

impl Score {
    fn new() -> Self {
        Self {
            total: 0.0,
            tags: Vec::new(),
            forced: false,
        }
    }

    fn add(&mut self, contribution: f64, tag: &str) {
        self.total += contribution;
        self.tags.push(tag.to_string());
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn seconds_since(now: DateTime<Utc>, then: DateTime<Utc>) -> f64 {
    (now - then).num_milliseconds() as f64 / 1000.0
}

/// Evaluate one tick. Returns `None` for hold.
pub fn evaluate(
    price: f64,
    snap: &IndicatorSnapshot,
    position: Option<&Position>,
    now: DateTime<Utc>,
    config: &GraphConfig,
    timing: &TradeTiming,
) -> Option<Signal> {
    // The time exit outranks the spacing gates: a stale position must go
    // even inside a cooldown window.
    if let Some(pos) = position {
        if seconds_since(now, pos.entry_time) > config.max_position_duration {
            return Some(Signal {
                timestamp: now,
                kind: SignalKind::Sell,
                price,
                confidence: 0.5,
                reason: "time_exit".to_string(),
                strategy_tags: vec!["time_exit".to_string()],
                indicators: snap.clone(),
            });
        }
    }

    if let Some(t) = timing.last_trade_time {
        if seconds_since(now, t) < config.min_time_between_trades {
            return None;
        }
    }
    if let Some(t) = timing.last_loss_time {
        if seconds_since(now, t) < config.cooldown_after_loss {
            return None;
        }
    }

    let (kind, score, threshold) = match position {
        None => (SignalKind::Buy, buy_score(snap, config), config.min_buy_score),
        Some(pos) => (
            SignalKind::Sell,
            sell_score(price, snap, pos, config),
            config.min_sell_score,
        ),
    };

    if score.total >= threshold || score.forced {
        Some(Signal {
            timestamp: now,
            kind,
            price,
            confidence: (score.total / CONFIDENCE_DIVISOR).min(1.0),
            reason: score.tags.join("+"),
            strategy_tags: score.tags,
            indicators: snap.clone(),
        })
    } else {
        None
    }
}

fn buy_score(snap: &IndicatorSnapshot, config: &GraphConfig) -> Score {
    let mut score = Score::new();

    if snap.rsi < config.rsi_oversold {
        score.add(config.weight_rsi * BASE_RSI_CROSS, "rsi_oversold");
    } else if snap.rsi < RSI_MILD_LOW {
        score.add(config.weight_rsi * BASE_RSI_MILD, "rsi_low");
    }

    if snap.ema_cross == 1 {
        score.add(config.weight_ema * BASE_EMA_CROSS, "ema_bullish_cross");
    } else if snap.ema_diff_pct > 0.0 && snap.ema_diff_pct < EMA_DIFF_SMALL_PCT {
        score.add(config.weight_ema * BASE_EMA_DIFF, "ema_fast_above");
    }

    if snap.macd_sign == 1 {
        score.add(config.weight_macd * BASE_MACD, "macd_positive");
    }

    if snap.bb_touch_lower {
        score.add(config.weight_bb * BASE_BB_TOUCH, "bb_touch_lower");
    } else if snap.bb_position < -BB_ZONE_EDGE {
        score.add(config.weight_bb * BASE_BB_ZONE, "bb_low_zone");
    }

    if snap.momentum_pct > config.price_change_threshold {
        score.add(config.weight_momentum * BASE_MOMENTUM, "momentum_up");
    } else if snap.momentum_pct > 0.0 {
        score.add(config.weight_momentum * BASE_MOMENTUM_MILD, "momentum_mild");
    }

    if snap.reversal_up {
        score.add(config.weight_price_action * BASE_REVERSAL, "reversal_up");
    }

    if config.is_scalping() && snap.micro_move && snap.tick_change_pct > 0.0 {
        score.add(config.weight_momentum * BASE_SCALP_MOVE_BUY, "scalp_move_up");
    }

    score
}

fn sell_score(
    price: f64,
    snap: &IndicatorSnapshot,
    position: &Position,
    config: &GraphConfig,
) -> Score {
    let mut score = Score::new();
    let pnl_pct = if position.entry_price > 0.0 {
        (price - position.entry_price) / position.entry_price * 100.0
    } else {
        0.0
    };

    if snap.rsi > config.rsi_overbought {
        score.add(config.weight_rsi * BASE_RSI_CROSS, "rsi_overbought");
    } else if snap.rsi > RSI_MILD_HIGH {
        score.add(config.weight_rsi * BASE_RSI_MILD, "rsi_high");
    }

    if snap.ema_cross == -1 {
        score.add(config.weight_ema * BASE_EMA_CROSS, "ema_bearish_cross");
    } else if snap.ema_diff_pct < 0.0 {
        score.add(config.weight_ema * BASE_EMA_DIFF, "ema_fast_below");
    }

    if snap.macd_sign == -1 {
        score.add(config.weight_macd * BASE_MACD, "macd_negative");
    }

    if snap.bb_touch_upper {
        score.add(config.weight_bb * BASE_BB_TOUCH, "bb_touch_upper");
    } else if snap.bb_position > BB_ZONE_EDGE {
        score.add(config.weight_bb * BASE_BB_ZONE, "bb_high_zone");
    }

    if snap.momentum_pct < -config.price_change_threshold {
        score.add(config.weight_momentum * BASE_MOMENTUM, "momentum_down");
    }

    if snap.reversal_down {
        score.add(config.weight_price_action * BASE_REVERSAL, "reversal_down");
    }

    if config.is_scalping() {
        if snap.micro_move && snap.tick_change_pct < 0.0 {
            score.add(
                config.weight_momentum * BASE_SCALP_MOVE_SELL,
                "scalp_move_down",
            );
        }
        if pnl_pct >= config.micro_profit_target {
            score.add(BASE_SCALP_PROFIT, "micro_profit");
        }
        if pnl_pct <= -config.micro_stop_loss {
            score.add(BASE_SCALP_STOP, "micro_stop");
            score.forced = true;
        }
    } else if pnl_pct > NEAR_TARGET_FRACTION * config.take_profit_pct {
        score.add(BASE_NEAR_TARGET, "near_target");
    }

    score
}
