// =============================================================================
// Analytics engine — per-instrument microstructure computations
// =============================================================================

pub mod depth_anomaly;
pub mod liquidity_shrinkage;
pub mod sentiment;
pub mod spread_zscore;
pub mod support_resistance;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::AnalyticsParams;
use crate::error::{Error, Result};
use crate::orderbook::PriceLevel;
use crate::time_window::TimeWindow;

pub use depth_anomaly::DepthAnomaly;
pub use liquidity_shrinkage::{LiquidityShrinkage, WarningLevel};
pub use sentiment::Sentiment;
pub use spread_zscore::SpreadZScore;
pub use support_resistance::SupportResistance;

/// Parsed book side, owned so analytics can run without holding the store's
/// lock.
#[derive(Debug, Clone)]
pub struct BookSides {
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
}

impl BookSides {
    pub fn mid_price(&self) -> Result<f64> {
        let bid = self
            .bids
            .first()
            .and_then(|l| l.price.parse::<f64>().ok())
            .ok_or_else(|| Error::Data("missing best bid".into()))?;
        let ask = self
            .asks
            .first()
            .and_then(|l| l.price.parse::<f64>().ok())
            .ok_or_else(|| Error::Data("missing best ask".into()))?;
        if bid <= 0.0 || ask <= 0.0 {
            return Err(Error::Data("non-positive bid/ask".into()));
        }
        Ok((bid + ask) / 2.0)
    }
}

fn parsed_levels(levels: &[PriceLevel]) -> impl Iterator<Item = (f64, f64)> + '_ {
    levels.iter().filter_map(|l| {
        let price: f64 = l.price.parse().ok()?;
        let size: f64 = l.size.parse().ok()?;
        if price > 0.0 && size > 0.0 {
            Some((price, size))
        } else {
            None
        }
    })
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (Bessel-corrected); 0 for fewer than 2 samples.
pub(crate) fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Percentile via nearest-rank on a value already sorted ascending.
pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Per-instrument rolling state the analytics engine needs across ticks.
pub struct InstrumentWindows {
    pub spread: TimeWindow<f64>,
    pub sentiment: TimeWindow<f64>,
    pub depth: TimeWindow<f64>,
    pub liquidity: TimeWindow<liquidity_shrinkage::LiquiditySample>,
    pub support_resistance: TimeWindow<SupportResistance>,
}

impl InstrumentWindows {
    fn new(params: &AnalyticsParams) -> Self {
        Self {
            spread: TimeWindow::new(Duration::from_secs(1800)),
            sentiment: TimeWindow::new(Duration::from_secs(30)),
            // Analytics ticks at 1Hz, so `depth_window_size` samples span
            // roughly that many seconds.
            depth: TimeWindow::new(Duration::from_secs(params.depth_window_size as u64)),
            liquidity: TimeWindow::new(Duration::from_secs(params.liquidity_long_window_secs)),
            support_resistance: TimeWindow::new(Duration::from_secs(1800)),
        }
    }
}

/// Owns the per-instrument rolling windows the analytics formulas read and
/// append to; the store only ever holds the order book itself.
pub struct AnalyticsEngine {
    params: AnalyticsParams,
    windows: Mutex<HashMap<String, InstrumentWindows>>,
}

impl AnalyticsEngine {
    pub fn new(params: AnalyticsParams) -> Self {
        Self {
            params,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn with_windows<R>(&self, inst_id: &str, f: impl FnOnce(&mut InstrumentWindows) -> R) -> R {
        let mut guard = self.windows.lock();
        let entry = guard
            .entry(inst_id.to_string())
            .or_insert_with(|| InstrumentWindows::new(&self.params));
        f(entry)
    }

    pub fn support_resistance(
        &self,
        inst_id: &str,
        now_ms: i64,
        book: &BookSides,
    ) -> Result<SupportResistance> {
        let mut result = support_resistance::compute(&self.params, book)?;
        result.analysis_time = now_ms;
        self.with_windows(inst_id, |w| {
            w.spread.push(now_ms, result.spread);
            w.support_resistance.push(now_ms, result.clone());
        });
        Ok(result)
    }

    pub fn spread_zscore(
        &self,
        inst_id: &str,
        now_ms: i64,
        window_minutes: u32,
    ) -> Result<SpreadZScore> {
        self.with_windows(inst_id, |w| {
            spread_zscore::compute(&w.spread, now_ms, window_minutes)
        })
    }

    pub fn sentiment(&self, inst_id: &str, now_ms: i64, book: &BookSides) -> Result<Sentiment> {
        let raw = sentiment::compute(&self.params, book)?;
        self.with_windows(inst_id, |w| {
            w.sentiment.push(now_ms, raw);
            let smoothed = mean(&w.sentiment.values().copied().collect::<Vec<_>>());
            Sentiment {
                sentiment: smoothed,
                analysis_time: now_ms,
            }
        })
    }

    pub fn depth_anomaly(&self, inst_id: &str, now_ms: i64, book: &BookSides) -> Result<DepthAnomaly> {
        let mid = book.mid_price()?;
        let depth = depth_anomaly::current_depth(&self.params, book, mid);
        self.with_windows(inst_id, |w| {
            w.depth.push(now_ms, depth);
            depth_anomaly::compute(&self.params, &w.depth, depth, now_ms)
        })
    }

    pub fn liquidity_shrinkage(
        &self,
        inst_id: &str,
        now_ms: i64,
        book: &BookSides,
    ) -> Result<LiquidityShrinkage> {
        let mid = book.mid_price()?;
        let sample = liquidity_shrinkage::sample_from_book(&self.params, book, mid, now_ms);
        self.with_windows(inst_id, |w| {
            w.liquidity.push(now_ms, sample.clone());
            liquidity_shrinkage::compute(&self.params, &w.liquidity, &sample)
        })
    }

    pub fn remove_instrument(&self, inst_id: &str) {
        self.windows.lock().remove(inst_id);
    }
}
