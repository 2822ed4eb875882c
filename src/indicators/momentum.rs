// =============================================================================
// Momentum, volatility and average tick range
// =============================================================================

/// Number of trailing prices used by the volatility and range measures.
const SHORT_WINDOW: usize = 10;

/// Percent change between the last price and the price `lookback` ticks ago.
/// Returns 0.0 when the window is too short or the reference price is zero.
pub fn momentum(prices: &[f64], lookback: usize) -> f64 {
    if lookback == 0 || prices.len() < lookback + 1 {
        return 0.0;
    }
    let last = prices[prices.len() - 1];
    let reference = prices[prices.len() - 1 - lookback];
    if reference == 0.0 {
        return 0.0;
    }
    (last - reference) / reference * 100.0
}

/// Relative volatility of the last ten prices: stddev / mean, as percent.
pub fn volatility(prices: &[f64]) -> f64 {
    let window = tail(prices, SHORT_WINDOW);
    if window.len() < 2 {
        return 0.0;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean * 100.0
}

/// Mean absolute tick-to-tick move of the last ten prices, as a percent of
/// the latest price. A tick-level stand-in for the average true range.
pub fn average_tick_range(prices: &[f64]) -> f64 {
    let window = tail(prices, SHORT_WINDOW);
    if window.len() < 2 {
        return 0.0;
    }
    let last = window[window.len() - 1];
    if last == 0.0 {
        return 0.0;
    }
    let mean_abs_delta = window
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .sum::<f64>()
        / (window.len() - 1) as f64;
    mean_abs_delta / last * 100.0
}

fn tail(prices: &[f64], n: usize) -> &[f64] {
    if prices.len() > n {
        &prices[prices.len() - n..]
    } else {
        prices
    }
}
