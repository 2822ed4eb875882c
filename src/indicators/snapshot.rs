// =============================================================================
// Indicator Snapshot — one struct per tick, fully determined by the window
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::graph::GraphConfig;
use crate::indicators::{bollinger, ema, momentum, rsi, trend};

/// Everything the signal evaluator looks at on a single tick.
///
/// Computing a snapshot is a pure function of the price window and the
/// config: identical inputs produce bitwise-identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    /// +1 bullish cross, -1 bearish cross, 0 none.
    pub ema_cross: i8,
    /// Fast-minus-slow EMA spread as percent of the slow EMA.
    pub ema_diff_pct: f64,
    pub macd_sign: i8,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_position: f64,
    pub bb_touch_upper: bool,
    pub bb_touch_lower: bool,
    /// Percent change over the latest tick.
    pub tick_change_pct: f64,
    /// Percent change over `momentum_period` ticks.
    pub momentum_pct: f64,
    /// Percent change over ten ticks.
    pub momentum_10_pct: f64,
    pub volatility_pct: f64,
    pub atr_pct: f64,
    pub trend_slope_pct: f64,
    pub trend_direction: i8,
    pub reversal_up: bool,
    pub reversal_down: bool,
    /// True when the latest tick moved at least `tick_scalp_threshold`.
    pub micro_move: bool,
}

impl IndicatorSnapshot {
    pub fn compute(prices: &[f64], config: &GraphConfig) -> Self {
        let ema_fast = ema::ema(prices, config.ema_fast_period);
        let ema_slow = ema::ema(prices, config.ema_slow_period);
        let ema_diff_pct = if ema_slow != 0.0 {
            (ema_fast - ema_slow) / ema_slow * 100.0
        } else {
            0.0
        };

        let bands = bollinger::bollinger(prices, config.bb_period, config.bb_std_dev);
        let tick_change_pct = momentum::momentum(prices, 1);

        Self {
            rsi: rsi::rsi(prices, config.rsi_period),
            ema_fast,
            ema_slow,
            ema_cross: ema::ema_cross(prices, config.ema_fast_period, config.ema_slow_period),
            ema_diff_pct,
            macd_sign: ema::macd_sign(prices, config.macd_fast, config.macd_slow),
            bb_upper: bands.upper,
            bb_middle: bands.middle,
            bb_lower: bands.lower,
            bb_position: bands.position,
            bb_touch_upper: bands.touch_upper,
            bb_touch_lower: bands.touch_lower,
            tick_change_pct,
            momentum_pct: momentum::momentum(prices, config.momentum_period),
            momentum_10_pct: momentum::momentum(prices, 10),
            volatility_pct: momentum::volatility(prices),
            atr_pct: momentum::average_tick_range(prices),
            trend_slope_pct: trend::trend_slope(prices),
            trend_direction: trend::trend_direction(prices),
            reversal_up: trend::reversal_up(prices),
            reversal_down: trend::reversal_down(prices),
            micro_move: tick_change_pct.abs() >= config.tick_scalp_threshold,
        }
    }
}
