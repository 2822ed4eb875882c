// =============================================================================
// Graph Configuration — the parameter sheet driving one simulation
// =============================================================================
//
// A GraphConfig is the full set of numeric knobs for the indicator kernel,
// the signal evaluator and the paper trader. It is immutable once a
// simulation adopts it; tuning produces a *new* config (and a new version)
// by overlaying a validated ParameterOverlay on the current one.
//
// Every field carries a serde default so configs saved by older builds (or
// partial advisor replies) still deserialise.
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_rsi_oversold() -> f64 {
    30.0
}
fn default_rsi_overbought() -> f64 {
    70.0
}
fn default_rsi_period() -> usize {
    14
}
fn default_ema_fast_period() -> usize {
    5
}
fn default_ema_slow_period() -> usize {
    12
}
fn default_macd_fast() -> usize {
    12
}
fn default_macd_slow() -> usize {
    26
}
fn default_bb_period() -> usize {
    20
}
fn default_bb_std_dev() -> f64 {
    2.0
}
fn default_price_change_threshold() -> f64 {
    0.5
}
fn default_momentum_period() -> usize {
    6
}
fn default_micro_profit_target() -> f64 {
    0.15
}
fn default_micro_stop_loss() -> f64 {
    0.1
}
fn default_tick_scalp_threshold() -> f64 {
    0.05
}
fn default_position_size_pct() -> f64 {
    10.0
}
fn default_stop_loss_pct() -> f64 {
    2.0
}
fn default_take_profit_pct() -> f64 {
    5.0
}
fn default_trailing_stop_pct() -> f64 {
    1.5
}
fn default_min_time_between_trades() -> f64 {
    60.0
}
fn default_cooldown_after_loss() -> f64 {
    120.0
}
fn default_max_position_duration() -> f64 {
    300.0
}
fn default_weight() -> f64 {
    1.0
}
fn default_min_score() -> f64 {
    2.5
}

/// Which family of entry/exit behaviour the config leans on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Conservative,
    Scalping,
    Momentum,
    MeanReversion,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::Conservative
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Conservative => "conservative",
            Self::Scalping => "scalping",
            Self::Momentum => "momentum",
            Self::MeanReversion => "mean_reversion",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// GraphConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub strategy: StrategyKind,

    // --- RSI -----------------------------------------------------------------
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    // --- EMA crossover -------------------------------------------------------
    #[serde(default = "default_ema_fast_period")]
    pub ema_fast_period: usize,
    #[serde(default = "default_ema_slow_period")]
    pub ema_slow_period: usize,

    // --- MACD ----------------------------------------------------------------
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,

    // --- Bollinger bands -----------------------------------------------------
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    #[serde(default = "default_bb_std_dev")]
    pub bb_std_dev: f64,

    // --- Momentum / price action ---------------------------------------------
    /// Percent move over `momentum_period` ticks that counts as momentum.
    #[serde(default = "default_price_change_threshold")]
    pub price_change_threshold: f64,
    #[serde(default = "default_momentum_period")]
    pub momentum_period: usize,

    // --- Scalping ------------------------------------------------------------
    /// Percent profit at which a scalp position is taken off.
    #[serde(default = "default_micro_profit_target")]
    pub micro_profit_target: f64,
    /// Percent loss at which a scalp position is cut.
    #[serde(default = "default_micro_stop_loss")]
    pub micro_stop_loss: f64,
    /// Minimum single-tick percent move that counts as a micro move.
    #[serde(default = "default_tick_scalp_threshold")]
    pub tick_scalp_threshold: f64,

    // --- Risk management -----------------------------------------------------
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,

    // --- Timing (seconds) ----------------------------------------------------
    #[serde(default = "default_min_time_between_trades")]
    pub min_time_between_trades: f64,
    #[serde(default = "default_cooldown_after_loss")]
    pub cooldown_after_loss: f64,
    #[serde(default = "default_max_position_duration")]
    pub max_position_duration: f64,

    // --- Signal weights ------------------------------------------------------
    #[serde(default = "default_weight")]
    pub weight_rsi: f64,
    #[serde(default = "default_weight")]
    pub weight_ema: f64,
    #[serde(default = "default_weight")]
    pub weight_macd: f64,
    #[serde(default = "default_weight")]
    pub weight_bb: f64,
    #[serde(default = "default_weight")]
    pub weight_momentum: f64,
    #[serde(default = "default_weight")]
    pub weight_price_action: f64,

    // --- Entry / exit score thresholds ---------------------------------------
    #[serde(default = "default_min_score")]
    pub min_buy_score: f64,
    #[serde(default = "default_min_score")]
    pub min_sell_score: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::conservative()
    }
}

impl GraphConfig {
    /// Classic RSI-led configuration with wide stops and slow timing.
    pub fn conservative() -> Self {
        Self {
            version: "v1".to_string(),
            name: "conservative_v1".to_string(),
            description: "RSI-led entries, wide stops".to_string(),
            strategy: StrategyKind::Conservative,
            rsi_oversold: default_rsi_oversold(),
            rsi_overbought: default_rsi_overbought(),
            rsi_period: default_rsi_period(),
            ema_fast_period: default_ema_fast_period(),
            ema_slow_period: default_ema_slow_period(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            bb_period: default_bb_period(),
            bb_std_dev: default_bb_std_dev(),
            price_change_threshold: default_price_change_threshold(),
            momentum_period: default_momentum_period(),
            micro_profit_target: default_micro_profit_target(),
            micro_stop_loss: default_micro_stop_loss(),
            tick_scalp_threshold: default_tick_scalp_threshold(),
            position_size_pct: default_position_size_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            trailing_stop_pct: default_trailing_stop_pct(),
            min_time_between_trades: default_min_time_between_trades(),
            cooldown_after_loss: default_cooldown_after_loss(),
            max_position_duration: default_max_position_duration(),
            weight_rsi: 1.0,
            weight_ema: 1.0,
            weight_macd: 1.0,
            weight_bb: 1.0,
            weight_momentum: 1.0,
            weight_price_action: 1.0,
            min_buy_score: default_min_score(),
            min_sell_score: default_min_score(),
        }
    }

    /// High-frequency baseline: small targets, tight timing, micro-move
    /// sensitivity down to half a basis point per tick.
    pub fn scalping() -> Self {
        Self {
            version: "v1".to_string(),
            name: "scalping_v1".to_string(),
            description: "tick-level scalps with micro targets".to_string(),
            strategy: StrategyKind::Scalping,
            price_change_threshold: 0.05,
            tick_scalp_threshold: 0.005,
            micro_profit_target: 0.15,
            micro_stop_loss: 0.1,
            min_time_between_trades: 5.0,
            cooldown_after_loss: 30.0,
            max_position_duration: 120.0,
            ..Self::conservative()
        }
    }

    /// Trend-following baseline: momentum carries extra weight and positions
    /// ride longer before the time exit.
    pub fn momentum() -> Self {
        Self {
            version: "v1".to_string(),
            name: "momentum_v1".to_string(),
            description: "trend-following entries".to_string(),
            strategy: StrategyKind::Momentum,
            weight_momentum: 1.5,
            weight_price_action: 1.2,
            max_position_duration: 600.0,
            ..Self::conservative()
        }
    }

    /// True when the config trades in scalp mode (micro targets drive the
    /// stop/take levels instead of the coarse percentages).
    pub fn is_scalping(&self) -> bool {
        self.strategy == StrategyKind::Scalping
    }

    /// Produce a new config with `overlay` applied on top of `self`.
    /// Untouched fields keep their current values.
    pub fn apply_overlay(&self, overlay: &ParameterOverlay) -> Self {
        let mut next = self.clone();
        macro_rules! overlay_field {
            ($field:ident) => {
                if let Some(v) = overlay.$field {
                    next.$field = v;
                }
            };
        }
        overlay_field!(rsi_oversold);
        overlay_field!(rsi_overbought);
        overlay_field!(stop_loss_pct);
        overlay_field!(take_profit_pct);
        overlay_field!(micro_profit_target);
        overlay_field!(micro_stop_loss);
        overlay_field!(position_size_pct);
        overlay_field!(min_time_between_trades);
        overlay_field!(cooldown_after_loss);
        overlay_field!(min_buy_score);
        overlay_field!(min_sell_score);
        overlay_field!(price_change_threshold);
        overlay_field!(trailing_stop_pct);
        next
    }

    /// Copy of `self` with an adjusted position size.
    pub fn with_position_size(&self, pct: f64) -> Self {
        let mut next = self.clone();
        next.position_size_pct = pct;
        next
    }
}

// =============================================================================
// ParameterOverlay
// =============================================================================

/// Sparse set of tunable parameters, as suggested by the advisor or by the
/// deterministic post-simulation rules. Only the tunable subset of the
/// config is representable here; structural knobs (periods, weights) are
/// not overlay targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_oversold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_overbought: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub micro_profit_target: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub micro_stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_size_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_time_between_trades: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_after_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_buy_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sell_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_change_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_stop_pct: Option<f64>,
}

/// Field names an overlay understands. Anything else in an advisor reply is
/// reported as a warning, not an error, so newer advisors stay compatible.
pub const OVERLAY_FIELDS: &[&str] = &[
    "rsi_oversold",
    "rsi_overbought",
    "stop_loss_pct",
    "take_profit_pct",
    "micro_profit_target",
    "micro_stop_loss",
    "position_size_pct",
    "min_time_between_trades",
    "cooldown_after_loss",
    "min_buy_score",
    "min_sell_score",
    "price_change_threshold",
    "trailing_stop_pct",
];

impl ParameterOverlay {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names present in `raw` that are not overlay fields (minus bookkeeping
    /// keys the advisor is allowed to attach).
    pub fn unknown_fields(raw: &serde_json::Value) -> Vec<String> {
        let ignored = ["reasoning", "changes_made"];
        match raw.as_object() {
            Some(map) => map
                .keys()
                .filter(|k| !OVERLAY_FIELDS.contains(&k.as_str()) && !ignored.contains(&k.as_str()))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_conservative() {
        let cfg = GraphConfig::default();
        assert_eq!(cfg.strategy, StrategyKind::Conservative);
        assert!((cfg.rsi_oversold - 30.0).abs() < f64::EPSILON);
        assert!((cfg.min_buy_score - 2.5).abs() < f64::EPSILON);
        assert!(!cfg.is_scalping());
    }

    #[test]
    fn scalping_preset_tightens_timing() {
        let cfg = GraphConfig::scalping();
        assert!(cfg.is_scalping());
        assert!(cfg.min_time_between_trades < 10.0);
        assert!(cfg.tick_scalp_threshold < 0.01);
        // Scoring thresholds stay at the shared baseline.
        assert!((cfg.min_buy_score - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: GraphConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.rsi_period, 14);
        assert_eq!(cfg.bb_period, 20);
        assert!((cfg.take_profit_pct - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation_is_lossless() {
        let cfg = GraphConfig::scalping();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: GraphConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn overlay_applies_only_set_fields() {
        let base = GraphConfig::scalping();
        let overlay = ParameterOverlay {
            rsi_oversold: Some(35.0),
            position_size_pct: Some(15.0),
            ..Default::default()
        };
        let next = base.apply_overlay(&overlay);
        assert!((next.rsi_oversold - 35.0).abs() < f64::EPSILON);
        assert!((next.position_size_pct - 15.0).abs() < f64::EPSILON);
        // Untouched fields survive.
        assert!((next.micro_profit_target - base.micro_profit_target).abs() < f64::EPSILON);
        assert_eq!(next.strategy, StrategyKind::Scalping);
    }

    #[test]
    fn unknown_fields_are_reported_not_rejected() {
        let raw = serde_json::json!({
            "rsi_oversold": 35,
            "reasoning": "tune",
            "galaxy_brain_factor": 9000,
        });
        let unknown = ParameterOverlay::unknown_fields(&raw);
        assert_eq!(unknown, vec!["galaxy_brain_factor".to_string()]);
    }

    #[test]
    fn empty_overlay_detected() {
        assert!(ParameterOverlay::default().is_empty());
        let o = ParameterOverlay {
            min_buy_score: Some(3.0),
            ..Default::default()
        };
        assert!(!o.is_empty());
    }
}
