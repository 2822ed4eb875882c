// =============================================================================
// Training Log — outcome samples collected from each optimisation round
// =============================================================================
//
// Every time the agent adopts a tuned parameter set, the pairing of
// (parameters, market conditions) with the eventual result is recorded here.
// The log powers two things: the aggregate stats exposed over HTTP and the
// best-known-parameters lookup at the end of the optimisation fallback
// chain (advisor reply, then post-simulation rules, then this log).
// =============================================================================

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::types::MarketConditions;

#[derive(Debug, Clone, Serialize)]
pub struct TrainingSample {
    pub parameters: Value,
    pub market_conditions: MarketConditions,
    /// P&L percent of the simulation that followed the adoption.
    pub result: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub total_samples: usize,
    pub avg_result: f64,
    pub best_result: f64,
    pub worst_result: f64,
    pub positive_rate_pct: f64,
}

#[derive(Debug, Default)]
pub struct TrainingLog {
    samples: Mutex<Vec<TrainingSample>>,
}

impl TrainingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, parameters: Value, market_conditions: MarketConditions, result: f64) {
        self.samples.lock().push(TrainingSample {
            parameters,
            market_conditions,
            result,
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Parameters of the best-performing sample so far, if any. The last
    /// resort of an optimisation round that has nothing else to apply.
    pub fn best_parameters(&self) -> Option<Value> {
        let samples = self.samples.lock();
        samples
            .iter()
            .max_by(|a, b| a.result.total_cmp(&b.result))
            .map(|s| s.parameters.clone())
    }

    pub fn summary(&self) -> TrainingSummary {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return TrainingSummary {
                total_samples: 0,
                avg_result: 0.0,
                best_result: 0.0,
                worst_result: 0.0,
                positive_rate_pct: 0.0,
            };
        }
        let results: Vec<f64> = samples.iter().map(|s| s.result).collect();
        let total = results.len();
        let positive = results.iter().filter(|r| **r > 0.0).count();
        TrainingSummary {
            total_samples: total,
            avg_result: results.iter().sum::<f64>() / total as f64,
            best_result: results.iter().cloned().fold(f64::MIN, f64::max),
            worst_result: results.iter().cloned().fold(f64::MAX, f64::min),
            positive_rate_pct: positive as f64 / total as f64 * 100.0,
        }
    }
}
