// =============================================================================
// Bollinger Bands
// =============================================================================
//
// SMA and population standard deviation over the last `period` prices;
// bands at SMA ± k·stddev. The position value maps the last price into
// [-1, +1] across the band width, clamped at the edges.
// =============================================================================

/// Bands plus the derived position/touch signals for the latest price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Last price mapped into [-1, +1] across the band width.
    pub position: f64,
    pub touch_upper: bool,
    pub touch_lower: bool,
}

/// Compute bands over the last `period` prices of `prices`.
///
/// Shorter windows use whatever is available. A degenerate band (zero
/// width, e.g. a flat window) reports position 0 and no touches.
pub fn bollinger(prices: &[f64], period: usize, std_dev_mult: f64) -> BollingerBands {
    if prices.is_empty() {
        return BollingerBands {
            upper: 0.0,
            middle: 0.0,
            lower: 0.0,
            position: 0.0,
            touch_upper: false,
            touch_lower: false,
        };
    }

    let window = if prices.len() > period && period > 0 {
        &prices[prices.len() - period..]
    } else {
        prices
    };

    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let upper = mean + std_dev_mult * stddev;
    let lower = mean - std_dev_mult * stddev;
    let last = *prices.last().unwrap();

    let width = upper - lower;
    let (position, touch_upper, touch_lower) = if width > 0.0 {
        let pos = ((last - lower) / width * 2.0 - 1.0).clamp(-1.0, 1.0);
        (pos, last >= upper, last <= lower)
    } else {
        (0.0, false, false)
    };

    BollingerBands {
        upper,
        middle: mean,
        lower,
        position,
        touch_upper,
        touch_lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_window_is_degenerate() {
        let bands = bollinger(&[100.0; 30], 20, 2.0);
        assert_eq!(bands.middle, 100.0);
        assert_eq!(bands.upper, 100.0);
        assert_eq!(bands.lower, 100.0);
        assert_eq!(bands.position, 0.0);
        assert!(!bands.touch_upper);
        assert!(!bands.touch_lower);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let bands = bollinger(&[], 20, 2.0);
        assert_eq!(bands.middle, 0.0);
        assert!(!bands.touch_upper && !bands.touch_lower);
    }

    #[test]
    fn bands_bracket_the_mean() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + (i % 5) as f64).collect();
        let bands = bollinger(&prices, 20, 2.0);
        assert!(bands.lower < bands.middle);
        assert!(bands.middle < bands.upper);
    }

    #[test]
    fn spike_touches_upper_band() {
        let mut prices = vec![100.0, 100.2, 99.8, 100.1, 99.9, 100.0, 100.1, 99.9, 100.0, 100.2];
        prices.push(103.0); // 3% jump versus ~0.1% noise
        let bands = bollinger(&prices, 20, 2.0);
        assert!(bands.touch_upper);
        assert_eq!(bands.position, 1.0);
    }

    #[test]
    fn drop_touches_lower_band() {
        let mut prices = vec![100.0, 100.2, 99.8, 100.1, 99.9, 100.0, 100.1, 99.9, 100.0, 100.2];
        prices.push(97.0);
        let bands = bollinger(&prices, 20, 2.0);
        assert!(bands.touch_lower);
        assert_eq!(bands.position, -1.0);
    }

    #[test]
    fn position_is_signed_and_clamped() {
        let prices: Vec<f64> = (0..25).map(|i| 100.0 + (i as f64).sin()).collect();
        let bands = bollinger(&prices, 20, 2.0);
        assert!((-1.0..=1.0).contains(&bands.position));
    }

    #[test]
    fn only_last_period_counts() {
        let tail: Vec<f64> = (0..20).map(|i| 100.0 + (i % 3) as f64).collect();
        let mut with_prefix = vec![1.0, 1000.0];
        with_prefix.extend_from_slice(&tail);
        assert_eq!(bollinger(&tail, 20, 2.0), bollinger(&with_prefix, 20, 2.0));
    }
}
