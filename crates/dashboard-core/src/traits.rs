use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;

use crate::config::RefreshConfig;
use crate::error::FetchResult;
use crate::types::{
    AccountBalance, AccountSummary, AnalysisBundle, MarketIndices, MinuteBar, RequestKey,
    SentimentSummary, SupplyDemand, WatchlistPrice,
};

/// Injectable time source so cache expiry is deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Persistent key/value tier. Implementations are synchronous: the slow
/// tier is local storage, not a network hop.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> FetchResult<Option<String>>;
    fn save(&self, key: &str, value: &str) -> FetchResult<()>;
    fn remove(&self, key: &str);
}

/// In-memory store: test double and no-persistence fallback.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> FetchResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> FetchResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// Performs the batch full-analysis fetch. Implemented by the HTTP client
/// and by test fakes.
#[async_trait]
pub trait AnalysisFetcher: Send + Sync {
    async fn fetch(&self, key: &RequestKey, force_refresh: bool) -> FetchResult<AnalysisBundle>;
}

/// Raw bytes of an incremental analysis response.
pub type ByteStream = BoxStream<'static, FetchResult<Vec<u8>>>;

/// Opens the incremental (server-sent events) analysis connection.
/// Dropping the returned stream closes the transport.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, code: &str) -> FetchResult<ByteStream>;
}

/// The ancillary batch endpoints of the backend. One implementation is
/// the HTTP client; tests substitute fakes.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn account_summary(&self) -> FetchResult<AccountSummary>;
    async fn account_balance(&self) -> FetchResult<AccountBalance>;
    async fn market_indices(&self) -> FetchResult<MarketIndices>;
    async fn watchlist_prices(&self) -> FetchResult<Vec<WatchlistPrice>>;
    async fn sentiment(&self, code: &str) -> FetchResult<SentimentSummary>;
    async fn supply_demand(&self, code: &str) -> FetchResult<SupplyDemand>;
    async fn minute_chart(&self, code: &str) -> FetchResult<Vec<MinuteBar>>;
    async fn add_watchlist(&self, code: &str) -> FetchResult<()>;
    async fn remove_watchlist(&self, code: &str) -> FetchResult<()>;
    async fn refresh_config(&self) -> FetchResult<RefreshConfig>;
}
