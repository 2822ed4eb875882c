// =============================================================================
// Exponential Moving Averages, crossover detection, MACD sign
// =============================================================================
//
// EMA seeds with the SMA of the first `period` prices, then folds the
// remainder with multiplier 2 / (period + 1). Short windows fall back to the
// running mean so early ticks still produce a usable value.
// =============================================================================

/// EMA of `prices` over `period`.
///
/// Fewer than `period` prices: the plain mean of everything seen so far.
/// Empty input: 0.0.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    if period == 0 || prices.len() < period {
        return prices.iter().sum::<f64>() / prices.len() as f64;
    }

    let seed = prices[..period].iter().sum::<f64>() / period as f64;
    let multiplier = 2.0 / (period as f64 + 1.0);

    prices[period..]
        .iter()
        .fold(seed, |acc, &p| (p - acc) * multiplier + acc)
}

/// Fast/slow EMA crossover between the previous tick and the current one.
///
/// +1 — fast crossed above slow on the latest tick (bullish)
/// -1 — fast crossed below slow (bearish)
///  0 — no cross, or not enough data to compare
pub fn ema_cross(prices: &[f64], fast_period: usize, slow_period: usize) -> i8 {
    if prices.len() < 2 {
        return 0;
    }
    let prev = &prices[..prices.len() - 1];

    let prev_fast = ema(prev, fast_period);
    let prev_slow = ema(prev, slow_period);
    let cur_fast = ema(prices, fast_period);
    let cur_slow = ema(prices, slow_period);

    if prev_fast <= prev_slow && cur_fast > cur_slow {
        1
    } else if prev_fast >= prev_slow && cur_fast < cur_slow {
        -1
    } else {
        0
    }
}

/// Sign of the MACD line (fast EMA minus slow EMA): +1, -1 or 0.
pub fn macd_sign(prices: &[f64], fast_period: usize, slow_period: usize) -> i8 {
    let diff = ema(prices, fast_period) - ema(prices, slow_period);
    if diff > 0.0 {
        1
    } else if diff < 0.0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(ema(&[], 5), 0.0);
    }

    #[test]
    fn short_window_is_running_mean() {
        assert!((ema(&[10.0, 20.0], 5) - 15.0).abs() < 1e-12);
        assert!((ema(&[10.0, 20.0, 30.0], 5) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn exact_period_is_sma_seed() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((ema(&prices, 5) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn ema_tracks_constant_series() {
        let prices = vec![42.0; 50];
        assert!((ema(&prices, 12) - 42.0).abs() < 1e-12);
    }

    #[test]
    fn ema_leans_towards_recent_prices() {
        let mut prices = vec![100.0; 20];
        prices.extend_from_slice(&[110.0, 110.0, 110.0]);
        let v = ema(&prices, 5);
        assert!(v > 105.0 && v < 110.0, "got {v}");
    }

    #[test]
    fn deterministic_fold() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64) * 0.3).collect();
        assert_eq!(ema(&prices, 12).to_bits(), ema(&prices, 12).to_bits());
    }

    // ---- ema_cross ---------------------------------------------------------

    #[test]
    fn no_cross_on_flat_series() {
        let prices = vec![100.0; 30];
        assert_eq!(ema_cross(&prices, 5, 12), 0);
    }

    #[test]
    fn bullish_cross_after_reversal() {
        // Long decline pulls fast below slow, then a sharp rally flips it.
        let mut prices: Vec<f64> = (0..20).map(|i| 110.0 - i as f64).collect();
        let mut crossed = false;
        for _ in 0..12 {
            let last = *prices.last().unwrap();
            prices.push(last + 4.0);
            if ema_cross(&prices, 5, 12) == 1 {
                crossed = true;
                break;
            }
        }
        assert!(crossed, "expected a bullish cross during the rally");
    }

    #[test]
    fn bearish_cross_after_breakdown() {
        let mut prices: Vec<f64> = (0..20).map(|i| 90.0 + i as f64).collect();
        let mut crossed = false;
        for _ in 0..12 {
            let last = *prices.last().unwrap();
            prices.push(last - 4.0);
            if ema_cross(&prices, 5, 12) == -1 {
                crossed = true;
                break;
            }
        }
        assert!(crossed, "expected a bearish cross during the breakdown");
    }

    #[test]
    fn cross_needs_two_prices() {
        assert_eq!(ema_cross(&[100.0], 5, 12), 0);
    }

    // ---- macd_sign ---------------------------------------------------------

    #[test]
    fn macd_sign_positive_in_uptrend() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        assert_eq!(macd_sign(&prices, 12, 26), 1);
    }

    #[test]
    fn macd_sign_negative_in_downtrend() {
        let prices: Vec<f64> = (0..40).map(|i| 140.0 - i as f64).collect();
        assert_eq!(macd_sign(&prices, 12, 26), -1);
    }

    #[test]
    fn macd_sign_zero_when_flat() {
        let prices = vec![100.0; 40];
        assert_eq!(macd_sign(&prices, 12, 26), 0);
    }
}
