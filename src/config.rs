// =============================================================================
// Process configuration — environment-driven, every field has a default
// =============================================================================
//
// Every tunable the market-data pipeline needs lives here so the process can
// start with zero configuration and be retuned purely through the
// environment (or a `.env` file loaded by `main`).
//
// =============================================================================

use std::env;
use std::time::Duration;

fn default_public_ws_url() -> String {
    "wss://ws.okx.com:8443/ws/v5/public".to_string()
}

fn default_business_ws_url() -> String {
    "wss://ws.okx.com:8443/ws/v5/business".to_string()
}

fn default_cache_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_hub_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_worker_pool_size() -> usize {
    10
}

fn default_subscription_poll_secs() -> u64 {
    20
}

fn default_max_instruments() -> usize {
    10
}

fn default_ping_interval_secs() -> u64 {
    25
}

fn default_reconnect_max_attempts() -> u32 {
    3
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_dial_timeout_secs() -> u64 {
    10
}

fn default_analytics_tick_secs() -> u64 {
    1
}

/// Analytics parameter defaults; see each `analytics::*` module for the
/// formulas that consume them.
#[derive(Debug, Clone)]
pub struct AnalyticsParams {
    pub bin_count: usize,
    pub significance_threshold: f64,
    pub top_n: usize,
    pub min_distance_percent: f64,

    pub spread_window_minutes: u32,

    pub percentile_alpha: f64,
    pub decay_lambda: f64,
    pub deadzone_threshold: f64,

    pub depth_price_range_percent: f64,
    pub depth_window_size: usize,
    pub depth_z_threshold: f64,

    pub liquidity_near_price_delta_percent: f64,
    pub liquidity_short_window_secs: u64,
    pub liquidity_long_window_secs: u64,
    pub liquidity_slope_threshold: f64,
}

impl Default for AnalyticsParams {
    fn default() -> Self {
        Self {
            bin_count: 50,
            significance_threshold: 1.5,
            top_n: 2,
            min_distance_percent: 0.5,
            spread_window_minutes: 5,
            percentile_alpha: 0.95,
            decay_lambda: 5.0,
            deadzone_threshold: 0.3,
            depth_price_range_percent: 0.5,
            depth_window_size: 30,
            depth_z_threshold: 2.0,
            liquidity_near_price_delta_percent: 0.5,
            liquidity_short_window_secs: 30,
            liquidity_long_window_secs: 1800,
            liquidity_slope_threshold: -0.01,
        }
    }
}

/// Process-scoped configuration; replaces the module-level globals and
/// singletons a quick-and-dirty port would otherwise reach for.
#[derive(Debug, Clone)]
pub struct Config {
    pub public_ws_url: String,
    pub business_ws_url: String,
    pub socks5_proxy: Option<String>,
    pub cache_url: String,
    pub hub_bind_addr: String,
    pub worker_pool_size: usize,
    pub subscription_poll_secs: u64,
    pub max_instruments: usize,
    pub ping_interval_secs: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_backoff_secs: u64,
    pub dial_timeout_secs: u64,
    pub analytics_tick_secs: u64,
    pub analytics: AnalyticsParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            public_ws_url: default_public_ws_url(),
            business_ws_url: default_business_ws_url(),
            socks5_proxy: None,
            cache_url: default_cache_url(),
            hub_bind_addr: default_hub_bind_addr(),
            worker_pool_size: default_worker_pool_size(),
            subscription_poll_secs: default_subscription_poll_secs(),
            max_instruments: default_max_instruments(),
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            dial_timeout_secs: default_dial_timeout_secs(),
            analytics_tick_secs: default_analytics_tick_secs(),
            analytics: AnalyticsParams::default(),
        }
    }
}

impl Config {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            public_ws_url: env::var("OKX_PUBLIC_WS_URL").unwrap_or(defaults.public_ws_url),
            business_ws_url: env::var("OKX_BUSINESS_WS_URL").unwrap_or(defaults.business_ws_url),
            socks5_proxy: env::var("OKX_SOCKS5_PROXY").ok(),
            cache_url: env::var("CACHE_URL").unwrap_or(defaults.cache_url),
            hub_bind_addr: env::var("HUB_BIND_ADDR").unwrap_or(defaults.hub_bind_addr),
            worker_pool_size: env_parsed("ANALYTICS_WORKER_POOL_SIZE", defaults.worker_pool_size),
            subscription_poll_secs: env_parsed(
                "SUBSCRIPTION_POLL_SECS",
                defaults.subscription_poll_secs,
            ),
            max_instruments: env_parsed("MAX_INSTRUMENTS", defaults.max_instruments),
            ping_interval_secs: env_parsed("WS_PING_INTERVAL_SECS", defaults.ping_interval_secs),
            reconnect_max_attempts: env_parsed(
                "WS_RECONNECT_MAX_ATTEMPTS",
                defaults.reconnect_max_attempts,
            ),
            reconnect_backoff_secs: env_parsed(
                "WS_RECONNECT_BACKOFF_SECS",
                defaults.reconnect_backoff_secs,
            ),
            dial_timeout_secs: env_parsed("WS_DIAL_TIMEOUT_SECS", defaults.dial_timeout_secs),
            analytics_tick_secs: env_parsed(
                "ANALYTICS_TICK_SECS",
                defaults.analytics_tick_secs,
            ),
            analytics: defaults.analytics,
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn subscription_poll_interval(&self) -> Duration {
        Duration::from_secs(self.subscription_poll_secs)
    }

    pub fn analytics_tick_interval(&self) -> Duration {
        Duration::from_secs(self.analytics_tick_secs)
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_instruments, 10);
        assert_eq!(cfg.worker_pool_size, 10);
        assert_eq!(cfg.reconnect_max_attempts, 3);
        assert_eq!(cfg.reconnect_backoff_secs, 5);
        assert!(cfg.socks5_proxy.is_none());
    }

    #[test]
    fn analytics_defaults_match_formulas() {
        let p = AnalyticsParams::default();
        assert_eq!(p.bin_count, 50);
        assert!((p.percentile_alpha - 0.95).abs() < f64::EPSILON);
        assert!((p.liquidity_slope_threshold - (-0.01)).abs() < f64::EPSILON);
    }

    #[test]
    fn env_parsed_falls_back_on_missing_or_invalid() {
        env::remove_var("TEST_ENV_PARSED_MISSING");
        assert_eq!(env_parsed("TEST_ENV_PARSED_MISSING", 7usize), 7);

        env::set_var("TEST_ENV_PARSED_MISSING", "not-a-number");
        assert_eq!(env_parsed("TEST_ENV_PARSED_MISSING", 7usize), 7);
        env::remove_var("TEST_ENV_PARSED_MISSING");
    }
}
