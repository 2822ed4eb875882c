// =============================================================================
// Shared types used across the Vela paper-trading laboratory
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of an emitted trade signal. A quiet evaluation produces no
/// signal at all rather than an explicit hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeExit,
    Signal,
    SimulationEnd,
    AgentStopped,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TakeProfit => write!(f, "take_profit"),
            Self::TimeExit => write!(f, "time_exit"),
            Self::Signal => write!(f, "signal"),
            Self::SimulationEnd => write!(f, "simulation_end"),
            Self::AgentStopped => write!(f, "agent_stopped"),
        }
    }
}

/// Severity attached to every bus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Top-level state of the autonomous agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    RunningInitial,
    RunningShort,
    Evaluating,
    Optimizing,
    SearchingHistory,
    LiveTrading,
    Paused,
    Error,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::RunningInitial => "running_initial_simulation",
            Self::RunningShort => "running_short_simulation",
            Self::Evaluating => "evaluating",
            Self::Optimizing => "optimizing_parameters",
            Self::SearchingHistory => "searching_history",
            Self::LiveTrading => "live_trading",
            Self::Paused => "paused",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Action chosen after a simulation has been evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    RunShortSim,
    Optimize,
    SearchHistory,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RunShortSim => "run_short_simulation",
            Self::Optimize => "optimize_parameters",
            Self::SearchHistory => "search_history",
        };
        write!(f, "{s}")
    }
}

/// Coarse description of the market a simulation ran in. Used to match
/// historical parameter versions against the present conditions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    /// RSI in [0, 100].
    pub rsi: f64,
    /// Relative volatility, percent.
    pub volatility: f64,
    /// Normalised regression slope, percent per tick.
    pub trend: f64,
    /// Momentum over the recent window, percent.
    pub momentum: f64,
}

impl Default for MarketConditions {
    fn default() -> Self {
        Self {
            rsi: 50.0,
            volatility: 1.0,
            trend: 0.0,
            momentum: 0.0,
        }
    }
}

impl MarketConditions {
    /// Mean absolute normalised difference over the four components.
    /// Each component difference is scaled by 1/100 before averaging.
    pub fn distance(&self, other: &Self) -> f64 {
        let deltas = [
            (self.rsi - other.rsi).abs(),
            (self.volatility - other.volatility).abs(),
            (self.trend - other.trend).abs(),
            (self.momentum - other.momentum).abs(),
        ];
        deltas.iter().map(|d| d / 100.0).sum::<f64>() / deltas.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_serialise_snake_case() {
        let s = serde_json::to_string(&AgentState::RunningInitial).unwrap();
        assert_eq!(s, "\"running_initial\"");
        assert_eq!(
            AgentState::RunningInitial.to_string(),
            "running_initial_simulation"
        );
    }

    #[test]
    fn exit_reason_display_matches_wire_form() {
        assert_eq!(ExitReason::StopLoss.to_string(), "stop_loss");
        assert_eq!(ExitReason::SimulationEnd.to_string(), "simulation_end");
        let json = serde_json::to_string(&ExitReason::TimeExit).unwrap();
        assert_eq!(json, "\"time_exit\"");
    }

    #[test]
    fn market_distance_is_zero_for_identical_conditions() {
        let c = MarketConditions::default();
        assert_eq!(c.distance(&c), 0.0);
    }

    #[test]
    fn market_distance_averages_normalised_deltas() {
        let a = MarketConditions {
            rsi: 70.0,
            volatility: 2.0,
            trend: 0.5,
            momentum: 1.0,
        };
        let b = MarketConditions {
            rsi: 30.0,
            volatility: 2.0,
            trend: 0.5,
            momentum: 1.0,
        };
        // Only RSI differs: (40/100) / 4 = 0.1
        assert!((a.distance(&b) - 0.1).abs() < 1e-12);
    }
}
