// =============================================================================
// Relative Strength Index — simple-average variant over the last N deltas
// =============================================================================
//
// Step 1 — Take the last `period` consecutive price differences.
// Step 2 — Average the gains and the losses separately (plain means, no
//          smoothing: the window is short-lived tick data, not daily closes).
// Step 3 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// With no losses in the window the loss average is floored at a small
// epsilon, which drives RSI to ~100 (within 0.01).
// =============================================================================

/// Floor for the average loss when the window contains no down moves.
pub const LOSS_EPSILON: f64 = 1e-4;

/// RSI over the last `period` price differences of `prices`.
///
/// Returns 50.0 (neutral) when fewer than `period + 1` prices are available
/// or `period` is zero.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }

    let tail = &prices[prices.len() - (period + 1)..];
    let (sum_gain, sum_loss) = tail.windows(2).fold((0.0_f64, 0.0_f64), |(g, l), w| {
        let d = w[1] - w[0];
        if d > 0.0 {
            (g + d, l)
        } else {
            (g, l + d.abs())
        }
    });

    let period_f = period as f64;
    let avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;
    if avg_loss == 0.0 {
        avg_loss = LOSS_EPSILON;
    }

    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_on_insufficient_data() {
        assert_eq!(rsi(&[], 14), 50.0);
        assert_eq!(rsi(&[100.0], 14), 50.0);
        // 14 prices give 13 deltas, one short of the 14 required.
        let prices: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert_eq!(rsi(&prices, 14), 50.0);
    }

    #[test]
    fn neutral_on_zero_period() {
        assert_eq!(rsi(&[1.0, 2.0, 3.0], 0), 50.0);
    }

    #[test]
    fn all_gains_approaches_one_hundred() {
        let prices: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let v = rsi(&prices, 14);
        // avg_loss floored at epsilon, so the result is just below 100.
        assert!((v - 100.0).abs() < 0.01, "expected ~100, got {v}");
    }

    #[test]
    fn all_losses_is_zero() {
        let prices: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        let v = rsi(&prices, 14);
        assert!(v.abs() < 1e-10, "expected 0, got {v}");
    }

    #[test]
    fn flat_window_is_zero_gain_zero_loss() {
        // No movement: avg_gain 0, avg_loss floored, RS = 0, RSI = 0.
        let prices = vec![100.0; 30];
        let v = rsi(&prices, 14);
        assert!(v.abs() < 1e-10, "expected 0, got {v}");
    }

    #[test]
    fn balanced_window_is_near_fifty() {
        // Alternate +1/-1: equal gains and losses.
        let mut prices = vec![100.0];
        for i in 0..20 {
            let last = *prices.last().unwrap();
            prices.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let v = rsi(&prices, 14);
        assert!((v - 50.0).abs() < 1.0, "expected ~50, got {v}");
    }

    #[test]
    fn result_stays_in_range() {
        let prices = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let v = rsi(&prices, 14);
        assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
    }

    #[test]
    fn only_last_window_counts() {
        // Same final period+1 tail must give the same RSI regardless of what
        // came before.
        let tail: Vec<f64> = vec![
            100.0, 100.5, 100.2, 100.8, 100.6, 101.0, 100.9, 101.3, 101.1, 101.6, 101.4, 101.9,
            101.7, 102.0, 101.8,
        ];
        let mut with_prefix = vec![50.0, 500.0, 5.0];
        with_prefix.extend_from_slice(&tail);
        assert_eq!(rsi(&tail, 14), rsi(&with_prefix, 14));
    }
}
