// =============================================================================
// Trend slope and short-term reversal patterns
// =============================================================================
//
// The slope is an ordinary least-squares fit over the last ten prices,
// normalised by the window mean so it reads as percent-per-tick and is
// comparable across price levels.
// =============================================================================

/// Prices considered by the regression.
const SLOPE_WINDOW: usize = 10;

/// Dead zone (percent per tick) inside which the direction reads flat.
pub const DIRECTION_DEAD_ZONE: f64 = 0.01;

/// Normalised regression slope over the last ten prices, percent per tick.
pub fn trend_slope(prices: &[f64]) -> f64 {
    let window = if prices.len() > SLOPE_WINDOW {
        &prices[prices.len() - SLOPE_WINDOW..]
    } else {
        prices
    };
    let n = window.len();
    if n < 3 {
        return 0.0;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = window.iter().sum::<f64>() / n_f;
    if mean_y == 0.0 {
        return 0.0;
    }

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (i, &y) in window.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var_x += dx * dx;
    }
    if var_x == 0.0 {
        return 0.0;
    }

    (cov / var_x) / mean_y * 100.0
}

/// Direction of the trend: +1 up, -1 down, 0 inside the dead zone.
pub fn trend_direction(prices: &[f64]) -> i8 {
    let slope = trend_slope(prices);
    if slope > DIRECTION_DEAD_ZONE {
        1
    } else if slope < -DIRECTION_DEAD_ZONE {
        -1
    } else {
        0
    }
}

/// Dip-and-recover over the last three prices: the middle price is a local
/// low. The classic long-side reversal candle pattern at tick resolution.
pub fn reversal_up(prices: &[f64]) -> bool {
    let n = prices.len();
    n >= 3 && prices[n - 3] > prices[n - 2] && prices[n - 1] > prices[n - 2]
}

/// Pop-and-fade over the last three prices: the middle price is a local high.
pub fn reversal_down(prices: &[f64]) -> bool {
    let n = prices.len();
    n >= 3 && prices[n - 3] < prices[n - 2] && prices[n - 1] < prices[n - 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_zero_on_short_input() {
        assert_eq!(trend_slope(&[100.0, 101.0]), 0.0);
        assert_eq!(trend_slope(&[]), 0.0);
    }

    #[test]
    fn slope_positive_on_uptrend() {
        let prices: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let slope = trend_slope(&prices);
        // +1 per tick on a ~104.5 mean: just under 1% per tick.
        assert!(slope > 0.9 && slope < 1.0, "got {slope}");
        assert_eq!(trend_direction(&prices), 1);
    }

    #[test]
    fn slope_negative_on_downtrend() {
        let prices: Vec<f64> = (0..10).map(|i| 110.0 - i as f64).collect();
        assert!(trend_slope(&prices) < 0.0);
        assert_eq!(trend_direction(&prices), -1);
    }

    #[test]
    fn direction_flat_inside_dead_zone() {
        // +0.001 per tick on 100: ~0.001% per tick, inside the 0.01% zone.
        let prices: Vec<f64> = (0..10).map(|i| 100.0 + i as f64 * 0.001).collect();
        assert_eq!(trend_direction(&prices), 0);
    }

    #[test]
    fn slope_ignores_old_history() {
        let recent: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let mut with_prefix = vec![500.0; 5];
        with_prefix.extend_from_slice(&recent);
        assert_eq!(trend_slope(&recent), trend_slope(&with_prefix));
    }

    #[test]
    fn reversal_patterns() {
        assert!(reversal_up(&[101.0, 100.0, 100.5]));
        assert!(!reversal_up(&[100.0, 100.5, 101.0]));
        assert!(reversal_down(&[100.0, 101.0, 100.5]));
        assert!(!reversal_down(&[101.0, 100.5, 100.0]));
        assert!(!reversal_up(&[100.0, 101.0]));
    }
}
