// =============================================================================
// Spread z-score — how anomalous is the current structural spread
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time_window::TimeWindow;

use super::{mean, sample_std_dev};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadZScore {
    pub spread_zscore: f64,
    pub current_spread: f64,
    pub analysis_time: i64,
}

pub fn compute(
    window: &TimeWindow<f64>,
    now_ms: i64,
    window_minutes: u32,
) -> Result<SpreadZScore> {
    let current_spread = *window
        .latest()
        .ok_or_else(|| Error::State("no spread samples yet".into()))?;

    let since = now_ms - (window_minutes as i64) * 60_000;
    let mut samples: Vec<f64> = window.values_since(since).copied().collect();
    if samples.len() < 2 {
        samples = window.values().copied().collect();
    }
    if samples.len() < 2 {
        return Err(Error::State("insufficient spread samples".into()));
    }

    let m = mean(&samples);
    let std = sample_std_dev(&samples);
    let z = if std == 0.0 { 0.0 } else { (current_spread - m) / std };

    Ok(SpreadZScore {
        spread_zscore: z,
        current_spread,
        analysis_time: now_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn insufficient_data_is_an_error() {
        let mut w: TimeWindow<f64> = TimeWindow::new(Duration::from_secs(1800));
        w.push(0, 1.0);
        assert!(compute(&w, 1_000, 5).is_err());
    }

    #[test]
    fn zero_std_yields_zero_zscore() {
        let mut w: TimeWindow<f64> = TimeWindow::new(Duration::from_secs(1800));
        w.push(0, 1.0);
        w.push(1_000, 1.0);
        let result = compute(&w, 2_000, 5).unwrap();
        assert_eq!(result.spread_zscore, 0.0);
    }

    #[test]
    fn falls_back_to_full_window_when_slice_too_short() {
        let mut w: TimeWindow<f64> = TimeWindow::new(Duration::from_secs(3600));
        w.push(0, 1.0);
        w.push(10_000, 2.0);
        // window_minutes=1 -> since = now - 60_000; with now=20_000 only the
        // last sample would match, so the computation should fall back to
        // using the whole window instead of erroring.
        let result = compute(&w, 20_000, 1).unwrap();
        assert!(result.spread_zscore.is_finite());
    }
}
