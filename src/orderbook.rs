// =============================================================================
// Order book store — OKX v5 `books`/`tickers` reconstruction with checksum
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A single price level. Price and size are kept as the exchange's own
/// decimal strings — re-formatting them would change the checksum input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    pub price: String,
    pub size: String,
    #[serde(default)]
    pub order_count: Option<u64>,
}

impl PriceLevel {
    fn price_f64(&self) -> Option<f64> {
        self.price.parse().ok()
    }

    fn size_f64(&self) -> Option<f64> {
        self.size.parse().ok()
    }

    fn is_zero_size(&self) -> bool {
        match self.size_f64() {
            Some(s) => s <= 0.0,
            None => true,
        }
    }
}

const MAX_LEVELS_PER_SIDE: usize = 400;
const CHECKSUM_DEPTH: usize = 25;

/// Reconstructed order book for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub instrument_id: String,
    pub timestamp: i64,
    /// Strictly ascending by price.
    pub asks: Vec<PriceLevel>,
    /// Strictly descending by price.
    pub bids: Vec<PriceLevel>,
    pub checksum: i32,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn mid_price(&self) -> Option<f64> {
        let bid = self.best_bid()?.price_f64()?;
        let ask = self.best_ask()?.price_f64()?;
        Some((bid + ask) / 2.0)
    }
}

/// Ticker snapshot for one instrument; written through to the cache, never
/// diffed against previous state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub instrument_id: String,
    pub last_price: String,
    pub best_bid: String,
    pub best_ask: String,
    pub open_24h: String,
    pub high_24h: String,
    pub low_24h: String,
    pub volume_24h: String,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct Arg {
    channel: String,
    #[serde(rename = "instId")]
    inst_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    arg: Option<Arg>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookData {
    #[serde(default)]
    asks: Vec<Vec<String>>,
    #[serde(default)]
    bids: Vec<Vec<String>>,
    ts: String,
    checksum: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    inst_id: String,
    last: String,
    #[serde(default)]
    bid_px: String,
    #[serde(default)]
    ask_px: String,
    open24h: String,
    high24h: String,
    low24h: String,
    vol_ccy24h: String,
    ts: String,
}

/// Per-instrument order book and ticker storage, mutated only by
/// [`OrderBookStore::process_message`].
pub struct OrderBookStore {
    books: RwLock<HashMap<String, OrderBook>>,
    tickers: RwLock<HashMap<String, TickerSnapshot>>,
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            tickers: RwLock::new(HashMap::new()),
        }
    }

    /// Parse and apply one exchange frame.
    pub fn process_message(&self, bytes: &[u8]) -> Result<()> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;

        if let Some(event) = envelope.event.as_deref() {
            if event == "error" {
                return Err(Error::Protocol {
                    code: envelope.code,
                    message: envelope.msg.unwrap_or_default(),
                });
            }
            // subscribe/unsubscribe acks carry no state change.
            return Ok(());
        }

        let arg = match envelope.arg {
            Some(a) => a,
            None => return Ok(()),
        };
        let data = match envelope.data {
            Some(d) if !d.is_empty() => d,
            _ => return Ok(()),
        };

        match arg.channel.as_str() {
            "books" => {
                let action = match envelope.action.as_deref() {
                    None | Some("") => "snapshot".to_string(),
                    Some(other) => other.to_string(),
                };
                for item in data {
                    let parsed: BookData = serde_json::from_value(item)?;
                    self.apply_book(&arg.inst_id, &action, parsed)?;
                }
                Ok(())
            }
            "tickers" => {
                for item in data {
                    let parsed: TickerData = serde_json::from_value(item)?;
                    self.apply_ticker(parsed);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_book(&self, inst_id: &str, action: &str, data: BookData) -> Result<()> {
        let timestamp: i64 = data.ts.parse().unwrap_or_default();

        let mut books = self.books.write();

        if action == "snapshot" {
            let mut asks = levels_from_raw(&data.asks);
            let mut bids = levels_from_raw(&data.bids);
            sort_asks(&mut asks);
            sort_bids(&mut bids);
            asks.truncate(MAX_LEVELS_PER_SIDE);
            bids.truncate(MAX_LEVELS_PER_SIDE);

            let book = OrderBook {
                instrument_id: inst_id.to_string(),
                timestamp,
                asks,
                bids,
                checksum: data.checksum as i32,
            };
            verify_checksum(&book);
            books.insert(inst_id.to_string(), book);
            return Ok(());
        }

        let book = books
            .get_mut(inst_id)
            .ok_or_else(|| Error::State(format!("update before snapshot for {inst_id}")))?;

        apply_delta(&mut book.asks, &data.asks, true);
        apply_delta(&mut book.bids, &data.bids, false);
        book.asks.truncate(MAX_LEVELS_PER_SIDE);
        book.bids.truncate(MAX_LEVELS_PER_SIDE);
        book.timestamp = timestamp;
        book.checksum = data.checksum as i32;
        verify_checksum(book);

        Ok(())
    }

    fn apply_ticker(&self, data: TickerData) {
        let timestamp: i64 = data.ts.parse().unwrap_or_default();
        let snapshot = TickerSnapshot {
            instrument_id: data.inst_id.clone(),
            last_price: data.last,
            best_bid: data.bid_px,
            best_ask: data.ask_px,
            open_24h: data.open24h,
            high_24h: data.high24h,
            low_24h: data.low24h,
            volume_24h: data.vol_ccy24h,
            timestamp,
        };
        self.tickers.write().insert(data.inst_id, snapshot);
    }

    /// Best up-to-400 levels per side, or `None` if the instrument has no
    /// book yet.
    pub fn get_top_400(&self, inst_id: &str) -> Option<(Vec<PriceLevel>, Vec<PriceLevel>)> {
        self.books
            .read()
            .get(inst_id)
            .map(|b| (b.asks.clone(), b.bids.clone()))
    }

    pub fn get_order_book(&self, inst_id: &str) -> Option<OrderBook> {
        self.books.read().get(inst_id).cloned()
    }

    pub fn get_ticker(&self, inst_id: &str) -> Option<TickerSnapshot> {
        self.tickers.read().get(inst_id).cloned()
    }

    pub fn remove(&self, inst_id: &str) {
        self.books.write().remove(inst_id);
        self.tickers.write().remove(inst_id);
    }

    pub fn instrument_ids(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}

impl Default for OrderBookStore {
    fn default() -> Self {
        Self::new()
    }
}

fn levels_from_raw(raw: &[Vec<String>]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|level| {
            let price = level.first()?.clone();
            let size = level.get(1)?.clone();
            let order_count = level.get(3).and_then(|s| s.parse().ok());
            Some(PriceLevel {
                price,
                size,
                order_count,
            })
        })
        .collect()
}

fn sort_asks(levels: &mut [PriceLevel]) {
    levels.sort_by(|a, b| {
        a.price_f64()
            .unwrap_or(f64::MAX)
            .partial_cmp(&b.price_f64().unwrap_or(f64::MAX))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn sort_bids(levels: &mut [PriceLevel]) {
    levels.sort_by(|a, b| {
        b.price_f64()
            .unwrap_or(f64::MIN)
            .partial_cmp(&a.price_f64().unwrap_or(f64::MIN))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Insert/replace/delete levels from a delta, keeping `side` sorted.
/// `ascending` selects ask (true) or bid (false) ordering.
fn apply_delta(side: &mut Vec<PriceLevel>, raw: &[Vec<String>], ascending: bool) {
    for level in levels_from_raw(raw) {
        let pos = side.iter().position(|l| l.price == level.price);
        if level.is_zero_size() {
            if let Some(idx) = pos {
                side.remove(idx);
            }
            continue;
        }
        match pos {
            Some(idx) => side[idx] = level,
            None => side.push(level),
        }
    }
    if ascending {
        sort_asks(side);
    } else {
        sort_bids(side);
    }
}

/// Recompute the CRC32/IEEE checksum over the interleaved best-25 levels and
/// warn (without aborting) on mismatch; the next snapshot heals the book.
fn verify_checksum(book: &OrderBook) {
    let computed = compute_checksum(&book.bids, &book.asks);
    if computed != book.checksum {
        warn!(
            instrument_id = %book.instrument_id,
            expected = book.checksum,
            computed,
            "order book checksum mismatch"
        );
    } else {
        debug!(instrument_id = %book.instrument_id, "checksum verified");
    }
}

fn compute_checksum(bids: &[PriceLevel], asks: &[PriceLevel]) -> i32 {
    let depth = CHECKSUM_DEPTH.min(bids.len().max(asks.len()));
    let mut parts: Vec<String> = Vec::with_capacity(depth * 4);
    for i in 0..depth {
        if let Some(b) = bids.get(i) {
            parts.push(b.price.clone());
            parts.push(b.size.clone());
        }
        if let Some(a) = asks.get(i) {
            parts.push(a.price.clone());
            parts.push(a.size.clone());
        }
    }
    let joined = parts.join(":");
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(joined.as_bytes());
    hasher.finalize() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: &str, size: &str) -> Vec<String> {
        vec![price.to_string(), size.to_string(), "0".to_string(), "1".to_string()]
    }

    #[test]
    fn snapshot_sorts_bids_descending_and_asks_ascending() {
        let store = OrderBookStore::new();
        let msg = serde_json::json!({
            "arg": {"channel": "books", "instId": "BTC-USDT-SWAP"},
            "action": "snapshot",
            "data": [{
                "asks": [level("101", "1"), level("100.5", "2")],
                "bids": [level("99", "1"), level("99.5", "2")],
                "ts": "1700000000000",
                "checksum": 0,
            }]
        });
        store
            .process_message(msg.to_string().as_bytes())
            .unwrap();
        let book = store.get_order_book("BTC-USDT-SWAP").unwrap();
        assert_eq!(book.asks[0].price, "100.5");
        assert_eq!(book.asks[1].price, "101");
        assert_eq!(book.bids[0].price, "99.5");
        assert_eq!(book.bids[1].price, "99");
    }

    #[test]
    fn empty_string_action_is_treated_as_snapshot() {
        let store = OrderBookStore::new();
        let msg = serde_json::json!({
            "arg": {"channel": "books", "instId": "X"},
            "action": "",
            "data": [{
                "asks": [level("101", "1")],
                "bids": [level("99", "1")],
                "ts": "1",
                "checksum": 0,
            }]
        });
        store.process_message(msg.to_string().as_bytes()).unwrap();
        let book = store.get_order_book("X").unwrap();
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.bids.len(), 1);
    }

    #[test]
    fn update_before_snapshot_fails() {
        let store = OrderBookStore::new();
        let msg = serde_json::json!({
            "arg": {"channel": "books", "instId": "BTC-USDT-SWAP"},
            "action": "update",
            "data": [{
                "asks": [],
                "bids": [],
                "ts": "1700000000000",
                "checksum": 0,
            }]
        });
        let err = store
            .process_message(msg.to_string().as_bytes())
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn zero_size_update_deletes_level() {
        let store = OrderBookStore::new();
        let snapshot = serde_json::json!({
            "arg": {"channel": "books", "instId": "X"},
            "action": "snapshot",
            "data": [{
                "asks": [level("101", "1")],
                "bids": [level("99", "1")],
                "ts": "1",
                "checksum": 0,
            }]
        });
        store.process_message(snapshot.to_string().as_bytes()).unwrap();

        let update = serde_json::json!({
            "arg": {"channel": "books", "instId": "X"},
            "action": "update",
            "data": [{
                "asks": [level("101", "0")],
                "bids": [],
                "ts": "2",
                "checksum": 0,
            }]
        });
        store.process_message(update.to_string().as_bytes()).unwrap();

        let book = store.get_order_book("X").unwrap();
        assert!(book.asks.is_empty());
        assert_eq!(book.bids.len(), 1);
    }

    #[test]
    fn truncates_to_400_levels() {
        let store = OrderBookStore::new();
        let asks: Vec<Vec<String>> = (0..500)
            .map(|i| level(&format!("{}", 100 + i), "1"))
            .collect();
        let msg = serde_json::json!({
            "arg": {"channel": "books", "instId": "X"},
            "action": "snapshot",
            "data": [{
                "asks": asks,
                "bids": [],
                "ts": "1",
                "checksum": 0,
            }]
        });
        store.process_message(msg.to_string().as_bytes()).unwrap();
        let (asks, _) = store.get_top_400("X").unwrap();
        assert_eq!(asks.len(), MAX_LEVELS_PER_SIDE);
    }

    #[test]
    fn checksum_matches_barter_style_interleave() {
        let bids = vec![PriceLevel {
            price: "100".into(),
            size: "1".into(),
            order_count: None,
        }];
        let asks = vec![PriceLevel {
            price: "101".into(),
            size: "2".into(),
            order_count: None,
        }];
        let expected = {
            let joined = "100:1:101:2";
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(joined.as_bytes());
            hasher.finalize() as i32
        };
        assert_eq!(compute_checksum(&bids, &asks), expected);
    }

    #[test]
    fn ticker_is_stored_and_retrievable() {
        let store = OrderBookStore::new();
        let msg = serde_json::json!({
            "arg": {"channel": "tickers", "instId": "BTC-USDT-SWAP"},
            "data": [{
                "instId": "BTC-USDT-SWAP",
                "last": "42000.1",
                "bidPx": "42000.0",
                "askPx": "42000.2",
                "open24h": "41000",
                "high24h": "43000",
                "low24h": "40500",
                "volCcy24h": "12345.6",
                "ts": "1700000000000",
            }]
        });
        store.process_message(msg.to_string().as_bytes()).unwrap();
        let ticker = store.get_ticker("BTC-USDT-SWAP").unwrap();
        assert_eq!(ticker.last_price, "42000.1");
    }

    #[test]
    fn protocol_error_event_is_surfaced() {
        let store = OrderBookStore::new();
        let msg = serde_json::json!({"event": "error", "code": "60012", "msg": "bad args"});
        let err = store.process_message(msg.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
