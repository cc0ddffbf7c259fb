// =============================================================================
// Large-order sentiment — percentile threshold + exponential decay weighting
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::config::AnalyticsParams;
use crate::error::Result;

use super::{parsed_levels, percentile_sorted, BookSides};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentiment {
    pub sentiment: f64,
    pub analysis_time: i64,
}

fn compress(raw: f64, deadzone: f64) -> f64 {
    if deadzone <= 0.0 {
        return raw.clamp(-1.0, 1.0);
    }
    let sign = raw.signum();
    if raw.abs() <= deadzone {
        raw / deadzone * 0.3
    } else {
        sign * 0.3 + (raw.abs() - deadzone) / (1.0 - deadzone) * 0.7 * sign
    }
}

/// Raw (unsmoothed) sentiment for the current book; callers append the
/// result to a rolling window and report its mean.
pub fn compute(params: &AnalyticsParams, book: &BookSides) -> Result<f64> {
    let mid = book.mid_price()?;

    let bids: Vec<(f64, f64)> = parsed_levels(&book.bids).collect();
    let asks: Vec<(f64, f64)> = parsed_levels(&book.asks).collect();

    let mut notionals: Vec<f64> = bids
        .iter()
        .chain(asks.iter())
        .map(|(p, s)| p * s)
        .collect();
    notionals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if notionals.is_empty() {
        return Ok(0.0);
    }
    let threshold = percentile_sorted(&notionals, params.percentile_alpha);

    let mut bull_power = 0.0;
    let mut bear_power = 0.0;
    for &(price, size) in &bids {
        let notional = price * size;
        if notional > threshold {
            let weight = (-params.decay_lambda * (price - mid).abs() / mid).exp();
            bull_power += notional * weight;
        }
    }
    for &(price, size) in &asks {
        let notional = price * size;
        if notional > threshold {
            let weight = (-params.decay_lambda * (price - mid).abs() / mid).exp();
            bear_power += notional * weight;
        }
    }

    let raw = if bull_power + bear_power > 0.0 {
        (bull_power - bear_power) / (bull_power + bear_power)
    } else {
        0.0
    };

    Ok(compress(raw, params.deadzone_threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::PriceLevel;

    fn level(price: &str, size: &str) -> PriceLevel {
        PriceLevel {
            price: price.into(),
            size: size.into(),
            order_count: None,
        }
    }

    #[test]
    fn heavier_bid_side_yields_positive_sentiment() {
        let params = AnalyticsParams::default();
        let book = BookSides {
            asks: vec![level("101", "1")],
            bids: vec![level("99", "1000")],
        };
        let raw = compute(&params, &book).unwrap();
        assert!(raw > 0.0);
    }

    #[test]
    fn empty_book_yields_zero() {
        let params = AnalyticsParams::default();
        let book = BookSides {
            asks: vec![],
            bids: vec![],
        };
        assert!(compute(&params, &book).is_err());
    }

    #[test]
    fn deadzone_compresses_small_imbalance_toward_zero() {
        let raw = 0.1;
        let compressed = compress(raw, 0.3);
        assert!(compressed.abs() < raw.abs() * 1.5);
        assert!(compressed > 0.0);
    }

    #[test]
    fn full_imbalance_maps_to_unit_boundary() {
        assert!((compress(1.0, 0.3) - 1.0).abs() < 1e-9);
        assert!((compress(-1.0, 0.3) - (-1.0)).abs() < 1e-9);
    }
}
