use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Refresh knobs served by the backend at startup (`/api/config`). The
/// rendering layer's timers read these; nothing in the core hardcodes
/// them at call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_minutes")]
    pub sentiment_refresh_minutes: u64,
    #[serde(default = "default_update_delay_seconds")]
    pub sentiment_update_delay_seconds: u64,
}

fn default_refresh_minutes() -> u64 {
    5
}

fn default_update_delay_seconds() -> u64 {
    15
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            sentiment_refresh_minutes: default_refresh_minutes(),
            sentiment_update_delay_seconds: default_update_delay_seconds(),
        }
    }
}

/// Orchestrator configuration, threaded in at construction rather than
/// read from ambient globals.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub base_url: String,
    /// Concurrently executing full-analysis fetches.
    pub max_concurrent: usize,
    /// Ceiling for batch fetches issued without a caller cancel handle.
    pub batch_timeout: Duration,
    pub analysis_fast_ttl: Duration,
    pub analysis_slow_ttl: Duration,
    pub market_fast_ttl: Duration,
    pub market_slow_ttl: Duration,
    pub refresh: RefreshConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            max_concurrent: 2,
            batch_timeout: Duration::from_secs(90),
            analysis_fast_ttl: Duration::from_secs(10 * 60),
            analysis_slow_ttl: Duration::from_secs(60 * 60),
            market_fast_ttl: Duration::from_secs(60),
            market_slow_ttl: Duration::from_secs(5 * 60),
            refresh: RefreshConfig::default(),
        }
    }
}
