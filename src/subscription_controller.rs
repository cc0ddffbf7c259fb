// =============================================================================
// Subscription controller — reconcile desired instruments against the client
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cache::CacheClient;
use crate::client::SubscriptionClient;
use crate::config::Config;

const TRADING_PAIRS_KEY: &str = "config:trading_pairs";

/// Periodically pulls the desired-instrument set out of the cache and
/// brings the client's subscriptions in line with it. Holds no local state
/// between ticks — the cache is the single source of truth.
pub struct SubscriptionController<C: SubscriptionClient, K: CacheClient> {
    client: Arc<C>,
    cache: Arc<K>,
    max_instruments: usize,
}

impl<C: SubscriptionClient, K: CacheClient> SubscriptionController<C, K> {
    pub fn new(client: Arc<C>, cache: Arc<K>, config: &Config) -> Self {
        Self {
            client,
            cache,
            max_instruments: config.max_instruments,
        }
    }

    /// Run one reconciliation cycle. A cache read failure is logged and
    /// skipped, leaving subscriptions untouched.
    pub async fn tick(&self) {
        let desired = match self.cache.smembers(TRADING_PAIRS_KEY).await {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "failed to read desired instrument set, skipping cycle");
                return;
            }
        };

        let mut desired: Vec<String> = desired.into_iter().collect();
        if desired.len() > self.max_instruments {
            warn!(
                requested = desired.len(),
                cap = self.max_instruments,
                "desired instrument set exceeds cap, truncating"
            );
            desired.truncate(self.max_instruments);
        }
        let desired: HashSet<String> = desired.into_iter().collect();

        let current = self.client.get_subscribed().await;

        let to_remove: Vec<String> = current.difference(&desired).cloned().collect();
        let to_add: Vec<String> = desired.difference(&current).cloned().collect();

        if !to_remove.is_empty() {
            if let Err(e) = self.client.unsubscribe(to_remove.clone()).await {
                warn!(error = %e, instruments = ?to_remove, "unsubscribe failed");
            }
        }
        if !to_add.is_empty() {
            if let Err(e) = self.client.subscribe(to_add.clone()).await {
                warn!(error = %e, instruments = ?to_add, "subscribe failed");
            } else {
                info!(instruments = ?to_add, "subscribed to new instruments");
            }
        }
    }

    /// Run the reconciliation loop at `config.subscription_poll_secs` until
    /// `shutdown` fires.
    pub async fn run(self, config: Config, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(config.subscription_poll_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("subscription controller shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::FakeCache;
    use crate::error::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FakeClient {
        subscribed: Mutex<HashSet<String>>,
        subscribe_calls: Mutex<Vec<Vec<String>>>,
        unsubscribe_calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeClient {
        fn new(initial: Vec<&str>) -> Self {
            Self {
                subscribed: Mutex::new(initial.into_iter().map(String::from).collect()),
                subscribe_calls: Mutex::new(Vec::new()),
                unsubscribe_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SubscriptionClient for FakeClient {
        async fn subscribe(&self, targets: Vec<String>) -> Result<()> {
            self.subscribed.lock().extend(targets.iter().cloned());
            self.subscribe_calls.lock().push(targets);
            Ok(())
        }

        async fn unsubscribe(&self, targets: Vec<String>) -> Result<()> {
            let mut guard = self.subscribed.lock();
            for t in &targets {
                guard.remove(t);
            }
            self.unsubscribe_calls.lock().push(targets);
            Ok(())
        }

        async fn get_subscribed(&self) -> HashSet<String> {
            self.subscribed.lock().clone()
        }
    }

    #[tokio::test]
    async fn adds_new_and_removes_stale_instruments() {
        let client = Arc::new(FakeClient::new(vec!["BTC-USDT-SWAP"]));
        let cache = Arc::new(FakeCache::with_set(
            "config:trading_pairs",
            vec!["ETH-USDT-SWAP".to_string()],
        ));
        let controller = SubscriptionController::new(client.clone(), cache, &Config::default());

        controller.tick().await;

        let subscribed = client.get_subscribed().await;
        assert!(subscribed.contains("ETH-USDT-SWAP"));
        assert!(!subscribed.contains("BTC-USDT-SWAP"));
    }

    #[tokio::test]
    async fn truncates_to_max_instruments() {
        let many: Vec<String> = (0..15).map(|i| format!("INST-{i}")).collect();
        let client = Arc::new(FakeClient::new(vec![]));
        let cache = Arc::new(FakeCache::with_set("config:trading_pairs", many));
        let mut config = Config::default();
        config.max_instruments = 10;
        let controller = SubscriptionController::new(client.clone(), cache, &config);

        controller.tick().await;

        assert_eq!(client.get_subscribed().await.len(), 10);
    }
}
