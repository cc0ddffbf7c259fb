// =============================================================================
// Analytics scheduler — 1Hz tick, bounded-concurrency worker pool
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};

use crate::analytics::{AnalyticsEngine, BookSides};
use crate::cache::CacheClient;
use crate::client::SubscriptionClient;
use crate::config::Config;
use crate::hub::Hub;
use crate::orderbook::OrderBookStore;

/// Drives per-instrument analytics at a fixed cadence, bounding how many
/// instruments are processed concurrently so a slow cache write never
/// starves the rest of the tick.
pub struct AnalyticsScheduler<C: SubscriptionClient, K: CacheClient> {
    store: Arc<OrderBookStore>,
    engine: Arc<AnalyticsEngine>,
    client: Arc<C>,
    cache: Arc<K>,
    hub: Arc<Hub>,
    semaphore: Arc<Semaphore>,
    spread_window_minutes: u32,
}

impl<C: SubscriptionClient + 'static, K: CacheClient + 'static> AnalyticsScheduler<C, K> {
    pub fn new(
        store: Arc<OrderBookStore>,
        engine: Arc<AnalyticsEngine>,
        client: Arc<C>,
        cache: Arc<K>,
        hub: Arc<Hub>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            engine,
            client,
            cache,
            hub,
            semaphore: Arc::new(Semaphore::new(config.worker_pool_size)),
            spread_window_minutes: config.analytics.spread_window_minutes,
        }
    }

    pub async fn run(self: Arc<Self>, config: Config, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(config.analytics_tick_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => self.clone().tick().await,
                _ = shutdown.recv() => {
                    info!("analytics scheduler shutting down");
                    return;
                }
            }
        }
    }

    async fn tick(self: Arc<Self>) {
        let instruments = self.client.get_subscribed().await;

        if let Err(e) = self
            .cache
            .hset_many(
                "system:monitoring",
                &[
                    ("websocket_connections", self.hub.client_count().to_string()),
                    ("active_pairs", instruments.len().to_string()),
                ],
            )
            .await
        {
            warn!(error = %e, "failed to write system:monitoring");
        }

        let mut handles = Vec::with_capacity(instruments.len());
        for inst_id in instruments {
            let this = self.clone();
            let permit = this
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.process_instrument(&inst_id).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn process_instrument(&self, inst_id: &str) {
        let Some((asks, bids)) = self.store.get_top_400(inst_id) else {
            return;
        };
        let book = BookSides { asks, bids };
        let now_ms = Utc::now().timestamp_millis();

        // Support/resistance must run before spread_zscore: it pushes the
        // sample spread_zscore reads from the same instrument's window.
        let support_resistance = self.engine.support_resistance(inst_id, now_ms, &book);
        if let Err(e) = &support_resistance {
            warn!(instrument_id = inst_id, error = %e, "support/resistance failed");
        }

        let ticker = self.store.get_ticker(inst_id);
        let order_book = self.store.get_order_book(inst_id);

        let persist_ticker = async {
            if let Some(ticker) = ticker {
                self.persist(&format!("ticker:{inst_id}"), &ticker).await;
            }
        };
        let persist_order_book = async {
            if let Some(order_book) = order_book {
                self.persist(&format!("orderbook:{inst_id}"), &order_book).await;
            }
        };
        let persist_support_resistance = async {
            if let Ok(result) = &support_resistance {
                self.persist(&format!("analysis:supp_resi:{inst_id}"), result).await;
                self.publish(inst_id, result);
            }
        };
        let run_spread_zscore = async {
            match self
                .engine
                .spread_zscore(inst_id, now_ms, self.spread_window_minutes)
            {
                Ok(result) => self.publish(inst_id, &result),
                Err(e) => warn!(instrument_id = inst_id, error = %e, "spread z-score failed"),
            }
        };
        let run_sentiment = async {
            match self.engine.sentiment(inst_id, now_ms, &book) {
                Ok(result) => {
                    self.persist(&format!("analysis:sentiment:{inst_id}"), &result).await;
                    self.publish(inst_id, &result);
                }
                Err(e) => warn!(instrument_id = inst_id, error = %e, "sentiment failed"),
            }
        };
        let run_depth_anomaly = async {
            match self.engine.depth_anomaly(inst_id, now_ms, &book) {
                Ok(result) => {
                    self.persist(&format!("analysis:dept_anom:{inst_id}"), &result).await;
                    self.publish(inst_id, &result);
                }
                Err(e) => warn!(instrument_id = inst_id, error = %e, "depth anomaly failed"),
            }
        };
        let run_liquidity_shrinkage = async {
            match self.engine.liquidity_shrinkage(inst_id, now_ms, &book) {
                Ok(result) => {
                    self.persist(&format!("analysis:liqu_shri:{inst_id}"), &result).await;
                    self.publish(inst_id, &result);
                }
                Err(e) => warn!(instrument_id = inst_id, error = %e, "liquidity shrinkage failed"),
            }
        };

        tokio::join!(
            persist_ticker,
            persist_order_book,
            persist_support_resistance,
            run_spread_zscore,
            run_sentiment,
            run_depth_anomaly,
            run_liquidity_shrinkage,
        );
    }

    async fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let fields = match flatten_fields(value) {
            Ok(f) => f,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize analytics result");
                return;
            }
        };
        let fields: Vec<(&str, String)> = fields.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        if let Err(e) = self.cache.hset_many(key, &fields).await {
            warn!(key, error = %e, "failed to persist to cache");
        }
    }

    fn publish<T: Serialize>(&self, inst_id: &str, value: &T) {
        if let Ok(payload) = serde_json::to_value(value) {
            self.hub.broadcast_analysis_update(inst_id, payload);
        }
    }
}

/// Flatten a struct into `(field, value)` pairs suitable for `hset_many`,
/// so each named field lands as its own hash field rather than a single
/// JSON blob.
fn flatten_fields<T: Serialize>(value: &T) -> std::result::Result<Vec<(String, String)>, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    let obj = match json {
        serde_json::Value::Object(map) => map,
        _ => return Ok(Vec::new()),
    };
    Ok(obj.into_iter().map(|(k, v)| (k, field_to_string(v))).collect())
}

fn field_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnalyticsEngine;
    use crate::cache::tests::FakeCache;
    use crate::config::AnalyticsParams;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        subscribed: HashSet<String>,
    }

    #[async_trait]
    impl SubscriptionClient for FakeClient {
        async fn subscribe(&self, _targets: Vec<String>) -> Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _targets: Vec<String>) -> Result<()> {
            Ok(())
        }
        async fn get_subscribed(&self) -> HashSet<String> {
            self.subscribed.clone()
        }
    }

    fn build_scheduler(subscribed: HashSet<String>) -> Arc<AnalyticsScheduler<FakeClient, FakeCache>> {
        let store = Arc::new(OrderBookStore::new());
        let engine = Arc::new(AnalyticsEngine::new(AnalyticsParams::default()));
        let client = Arc::new(FakeClient { subscribed });
        let cache = Arc::new(FakeCache::default());
        let hub = Hub::new();
        let config = Config::default();
        Arc::new(AnalyticsScheduler::new(store, engine, client, cache, hub, &config))
    }

    #[derive(Serialize)]
    struct Dummy {
        a: f64,
        b: String,
    }

    #[test]
    fn flatten_fields_produces_discrete_named_fields() {
        let value = Dummy { a: 1.5, b: "x".into() };
        let fields = flatten_fields(&value).unwrap();
        assert!(fields.contains(&("a".to_string(), "1.5".to_string())));
        assert!(fields.contains(&("b".to_string(), "x".to_string())));
    }

    #[tokio::test]
    async fn tick_with_no_instruments_writes_monitoring_fields() {
        let scheduler = build_scheduler(HashSet::new());
        scheduler.clone().tick().await;
        let fields = scheduler.cache.hgetall("system:monitoring").await.unwrap();
        assert_eq!(fields.get("active_pairs"), Some(&"0".to_string()));
    }

    #[tokio::test]
    async fn tick_skips_instruments_with_no_order_book() {
        let mut subscribed = HashSet::new();
        subscribed.insert("BTC-USDT-SWAP".to_string());
        let scheduler = build_scheduler(subscribed);
        scheduler.clone().tick().await;
        let fields = scheduler
            .cache
            .hgetall("analysis:supp_resi:BTC-USDT-SWAP")
            .await
            .unwrap();
        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn worker_pool_never_exceeds_configured_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(2));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let current = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            let _ = h.await;
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
