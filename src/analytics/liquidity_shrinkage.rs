// =============================================================================
// Liquidity shrinkage — regression slope + percentile thresholds
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::config::AnalyticsParams;
use crate::time_window::TimeWindow;

use super::{parsed_levels, percentile_sorted, BookSides};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WarningLevel {
    None,
    Light,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquiditySample {
    pub liquidity: f64,
    pub spread: f64,
    pub depth: f64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityShrinkage {
    pub warning: bool,
    pub warning_level: WarningLevel,
    pub liquidity: f64,
    pub spread: f64,
    pub depth: f64,
    pub slope: f64,
    pub timestamp: i64,
}

pub fn sample_from_book(
    params: &AnalyticsParams,
    book: &BookSides,
    mid: f64,
    now_ms: i64,
) -> LiquiditySample {
    let best_bid = book.bids.first().and_then(|l| l.price.parse::<f64>().ok());
    let best_ask = book.asks.first().and_then(|l| l.price.parse::<f64>().ok());
    let spread = match (best_bid, best_ask) {
        (Some(bid), Some(ask)) if mid > 0.0 => (ask - bid) / mid,
        _ => 0.0,
    };

    let lower = mid * (1.0 - params.liquidity_near_price_delta_percent / 100.0);
    let upper = mid * (1.0 + params.liquidity_near_price_delta_percent / 100.0);
    let depth: f64 = parsed_levels(&book.bids)
        .chain(parsed_levels(&book.asks))
        .filter(|(price, _)| *price >= lower && *price <= upper)
        .map(|(_, size)| size)
        .sum();

    let liquidity = depth / (1.0 + spread);

    LiquiditySample {
        liquidity,
        spread,
        depth,
        timestamp_ms: now_ms,
    }
}

/// Ordinary least squares slope of `liquidity` against `timestamp_ms`
/// (seconds), restricted to samples within `short_window_secs` of `now_ms`.
fn regression_slope(samples: &[&LiquiditySample], now_ms: i64, short_window_secs: u64) -> f64 {
    let since = now_ms - (short_window_secs as i64) * 1000;
    let recent: Vec<&LiquiditySample> = samples
        .iter()
        .filter(|s| s.timestamp_ms >= since)
        .copied()
        .collect();
    if recent.len() < 2 {
        return 0.0;
    }

    let xs: Vec<f64> = recent.iter().map(|s| s.timestamp_ms as f64 / 1000.0).collect();
    let ys: Vec<f64> = recent.iter().map(|s| s.liquidity).collect();
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..xs.len() {
        num += (xs[i] - x_mean) * (ys[i] - y_mean);
        den += (xs[i] - x_mean).powi(2);
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

pub fn compute(
    params: &AnalyticsParams,
    window: &TimeWindow<LiquiditySample>,
    current: &LiquiditySample,
) -> crate::error::Result<LiquidityShrinkage> {
    let all: Vec<&LiquiditySample> = window.values().collect();
    if all.len() < 2 {
        return Ok(LiquidityShrinkage {
            warning: false,
            warning_level: WarningLevel::None,
            liquidity: current.liquidity,
            spread: current.spread,
            depth: current.depth,
            slope: 0.0,
            timestamp: current.timestamp_ms,
        });
    }

    let slope = regression_slope(&all, current.timestamp_ms, params.liquidity_short_window_secs);

    let mut liquidities: Vec<f64> = all.iter().map(|s| s.liquidity).collect();
    let mut spreads: Vec<f64> = all.iter().map(|s| s.spread).collect();
    liquidities.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    spreads.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let p25_liquidity = percentile_sorted(&liquidities, 0.25);
    let p75_spread = percentile_sorted(&spreads, 0.75);

    let cond_a = current.liquidity < p25_liquidity;
    let cond_b = slope < params.liquidity_slope_threshold;
    let cond_c = current.spread > p75_spread;
    let hits = [cond_a, cond_b, cond_c].iter().filter(|&&x| x).count();

    let warning = hits >= 2;
    let warning_level = if hits < 2 {
        WarningLevel::None
    } else if hits == 2 {
        WarningLevel::Light
    } else if slope < 2.0 * params.liquidity_slope_threshold {
        WarningLevel::Severe
    } else {
        WarningLevel::Moderate
    };

    Ok(LiquidityShrinkage {
        warning,
        warning_level,
        liquidity: current.liquidity,
        spread: current.spread,
        depth: current.depth,
        slope,
        timestamp: current.timestamp_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_samples_yields_no_warning() {
        let params = AnalyticsParams::default();
        let w: TimeWindow<LiquiditySample> =
            TimeWindow::new(std::time::Duration::from_secs(1800));
        let current = LiquiditySample {
            liquidity: 10.0,
            spread: 0.001,
            depth: 10.0,
            timestamp_ms: 0,
        };
        let result = compute(&params, &w, &current).unwrap();
        assert_eq!(result.warning_level, WarningLevel::None);
    }

    #[test]
    fn declining_liquidity_trips_warning() {
        let params = AnalyticsParams::default();
        let mut w: TimeWindow<LiquiditySample> =
            TimeWindow::new(std::time::Duration::from_secs(1800));
        for i in 0..40 {
            let liquidity = 100.0 - i as f64 * 2.0;
            w.push(
                i * 1000,
                LiquiditySample {
                    liquidity,
                    spread: 0.001 + i as f64 * 0.0005,
                    depth: liquidity,
                    timestamp_ms: i * 1000,
                },
            );
        }
        let current = LiquiditySample {
            liquidity: 5.0,
            spread: 0.05,
            depth: 5.0,
            timestamp_ms: 40_000,
        };
        let result = compute(&params, &w, &current).unwrap();
        assert!(result.warning);
    }
}
