// =============================================================================
// Depth anomaly — z-score of near-mid depth against its historical window
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::config::AnalyticsParams;
use crate::time_window::TimeWindow;

use super::{mean, parsed_levels, sample_std_dev, BookSides};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthAnomaly {
    pub anomaly: bool,
    pub z_score: f64,
    pub depth: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub direction: String,
    pub intensity: f64,
    pub timestamp: i64,
}

/// Aggregate notional within `price_range_percent` of `mid` across both
/// sides.
pub fn current_depth(params: &AnalyticsParams, book: &BookSides, mid: f64) -> f64 {
    let lower = mid * (1.0 - params.depth_price_range_percent / 100.0);
    let upper = mid * (1.0 + params.depth_price_range_percent / 100.0);
    parsed_levels(&book.bids)
        .chain(parsed_levels(&book.asks))
        .filter(|(price, _)| *price >= lower && *price <= upper)
        .map(|(price, size)| price * size)
        .sum()
}

pub fn compute(
    params: &AnalyticsParams,
    window: &TimeWindow<f64>,
    current: f64,
    now_ms: i64,
) -> crate::error::Result<DepthAnomaly> {
    let historical: Vec<f64> = window
        .values()
        .copied()
        .take(window.len().saturating_sub(1))
        .collect();

    if historical.len() < 2 {
        return Ok(DepthAnomaly {
            anomaly: false,
            z_score: 0.0,
            depth: current,
            mean: 0.0,
            std_dev: 0.0,
            direction: String::new(),
            intensity: 0.0,
            timestamp: now_ms,
        });
    }

    let m = mean(&historical);
    let std = sample_std_dev(&historical);
    let z = if std == 0.0 { 0.0 } else { (current - m) / std };
    let anomaly = z.abs() > params.depth_z_threshold;
    let direction = if z > params.depth_z_threshold {
        "increase"
    } else if z < -params.depth_z_threshold {
        "decrease"
    } else {
        ""
    };

    Ok(DepthAnomaly {
        anomaly,
        z_score: z,
        depth: current,
        mean: m,
        std_dev: std,
        direction: direction.to_string(),
        intensity: z.abs(),
        timestamp: now_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_historical_samples_is_not_an_anomaly() {
        let params = AnalyticsParams::default();
        let mut w: TimeWindow<f64> = TimeWindow::new(std::time::Duration::from_secs(300));
        w.push(0, 100.0);
        let result = compute(&params, &w, 100.0, 1_000).unwrap();
        assert!(!result.anomaly);
        assert_eq!(result.direction, "");
    }

    #[test]
    fn large_spike_is_flagged_as_increase() {
        let params = AnalyticsParams::default();
        let mut w: TimeWindow<f64> = TimeWindow::new(std::time::Duration::from_secs(300));
        for i in 0..10 {
            w.push(i * 1000, 100.0);
        }
        w.push(10_000, 10_000.0);
        let result = compute(&params, &w, 10_000.0, 11_000).unwrap();
        assert!(result.anomaly);
        assert_eq!(result.direction, "increase");
    }
}
