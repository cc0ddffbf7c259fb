// =============================================================================
// Support / resistance — histogram peak detection over book notional
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::config::AnalyticsParams;
use crate::error::{Error, Result};

use super::{parsed_levels, mean, BookSides};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportResistance {
    pub support_high: f64,
    pub support_low: f64,
    pub resistance_high: f64,
    pub resistance_low: f64,
    pub spread: f64,
    pub analysis_time: i64,
}

struct Peak {
    bin_center: f64,
    volume: f64,
}

/// Uniform-width histogram of notional (price * size) over `[min, max]`.
fn histogram(levels: &[(f64, f64)], min_price: f64, max_price: f64, bins: usize) -> Vec<f64> {
    let mut hist = vec![0.0; bins];
    let width = (max_price - min_price) / bins as f64;
    if width <= 0.0 {
        return hist;
    }
    for &(price, size) in levels {
        let mut idx = ((price - min_price) / width) as usize;
        if idx >= bins {
            idx = bins - 1;
        }
        hist[idx] += price * size;
    }
    hist
}

fn bin_center(min_price: f64, width: f64, idx: usize) -> f64 {
    min_price + width * (idx as f64 + 0.5)
}

fn find_peaks(hist: &[f64], min_price: f64, width: f64, threshold: f64) -> Vec<Peak> {
    let avg = mean(hist);
    let mut peaks = Vec::new();
    for i in 0..hist.len() {
        let is_local_max = (i == 0 || hist[i] > hist[i - 1])
            && (i == hist.len() - 1 || hist[i] > hist[i + 1]);
        if hist[i] > threshold * avg && is_local_max {
            peaks.push(Peak {
                bin_center: bin_center(min_price, width, i),
                volume: hist[i],
            });
        }
    }
    if peaks.is_empty() {
        for (i, &v) in hist.iter().enumerate() {
            if v > 0.0 {
                peaks.push(Peak {
                    bin_center: bin_center(min_price, width, i),
                    volume: v,
                });
            }
        }
    }
    peaks.sort_by(|a, b| b.volume.partial_cmp(&a.volume).unwrap_or(std::cmp::Ordering::Equal));
    peaks
}

fn select_levels(peaks: Vec<Peak>, top_n: usize, min_distance_percent: f64) -> Vec<f64> {
    let mut selected: Vec<f64> = Vec::new();
    for peak in peaks {
        if selected.len() >= top_n {
            break;
        }
        let far_enough = selected.iter().all(|&s| {
            let distance_pct = ((peak.bin_center - s).abs() / s.abs().max(f64::EPSILON)) * 100.0;
            distance_pct >= min_distance_percent
        });
        if far_enough {
            selected.push(peak.bin_center);
        }
    }
    selected
}

pub fn compute(params: &AnalyticsParams, book: &BookSides) -> Result<SupportResistance> {
    let bids: Vec<(f64, f64)> = parsed_levels(&book.bids).collect();
    let asks: Vec<(f64, f64)> = parsed_levels(&book.asks).collect();

    let all_prices: Vec<f64> = bids
        .iter()
        .chain(asks.iter())
        .map(|(p, _)| *p)
        .collect();
    let min_price = all_prices
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min);
    let max_price = all_prices
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if !min_price.is_finite() || !max_price.is_finite() || max_price <= min_price {
        return Err(Error::State("degenerate price range".into()));
    }

    let width = (max_price - min_price) / params.bin_count as f64;
    let bid_hist = histogram(&bids, min_price, max_price, params.bin_count);
    let ask_hist = histogram(&asks, min_price, max_price, params.bin_count);

    let bid_peaks = find_peaks(&bid_hist, min_price, width, params.significance_threshold);
    let ask_peaks = find_peaks(&ask_hist, min_price, width, params.significance_threshold);

    let supports = select_levels(bid_peaks, params.top_n, params.min_distance_percent);
    let resistances = select_levels(ask_peaks, params.top_n, params.min_distance_percent);

    let support_high = supports.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let support_low = supports.iter().cloned().fold(f64::INFINITY, f64::min);
    let resistance_high = resistances.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let resistance_low = resistances.iter().cloned().fold(f64::INFINITY, f64::min);

    let spread = if !supports.is_empty() && !resistances.is_empty() {
        resistance_low - support_high
    } else {
        0.0
    };

    Ok(SupportResistance {
        support_high: if support_high.is_finite() { support_high } else { 0.0 },
        support_low: if support_low.is_finite() { support_low } else { 0.0 },
        resistance_high: if resistance_high.is_finite() { resistance_high } else { 0.0 },
        resistance_low: if resistance_low.is_finite() { resistance_low } else { 0.0 },
        spread,
        analysis_time: 0,
    })
}
