use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures_util::stream;
use tokio::sync::{mpsc, Semaphore};

use dashboard_core::{
    AccountBalance, AccountSummary, AnalysisBundle, AnalysisFetcher, ByteStream, Clock,
    DashboardApi, FetchError, FetchResult, IndexQuote, MarketIndices, MinuteBar, RefreshConfig,
    RequestKey, SentimentSummary, StockInfo, StreamTransport, SupplyDemand, WatchlistPrice,
};

/// Deterministic clock for cache expiry tests.
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        })
    }

    /// Negative values move the clock backwards.
    pub fn advance_ms(&self, ms: i64) {
        *self.now.lock().unwrap() += ChronoDuration::milliseconds(ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Bundle tagged with the fetched code, for asserting identity.
pub(crate) fn bundle_for(code: &str) -> AnalysisBundle {
    AnalysisBundle {
        stock_info: Some(StockInfo {
            code: code.to_string(),
            name: None,
            current_price: Some(1000.0),
            change: None,
            change_rate: None,
        }),
        ..AnalysisBundle::default()
    }
}

/// Fetcher whose executions block until the test releases them, recording
/// execution-start order.
pub(crate) struct GatedFetcher {
    calls: AtomicUsize,
    started: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    failing: Mutex<HashSet<String>>,
}

impl GatedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Let one blocked fetch of this code proceed.
    pub fn release(&self, code: &str) {
        self.gate(code).add_permits(1);
    }

    /// Released fetches of this code fail instead of succeeding.
    pub fn fail(&self, code: &str) {
        self.failing.lock().unwrap().insert(code.to_string());
    }

    fn gate(&self, code: &str) -> Arc<Semaphore> {
        self.gates
            .lock()
            .unwrap()
            .entry(code.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }
}

#[async_trait]
impl AnalysisFetcher for GatedFetcher {
    async fn fetch(&self, key: &RequestKey, _force_refresh: bool) -> FetchResult<AnalysisBundle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(key.code.clone());

        let gate = self.gate(&key.code);
        let permit = gate
            .acquire()
            .await
            .map_err(|_| FetchError::Api("gate closed".to_string()))?;
        permit.forget();

        if self.failing.lock().unwrap().contains(&key.code) {
            return Err(FetchError::Api("simulated fetch failure".to_string()));
        }
        Ok(bundle_for(&key.code))
    }
}

/// Fetcher that responds immediately.
pub(crate) struct InstantFetcher {
    calls: AtomicUsize,
}

impl InstantFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisFetcher for InstantFetcher {
    async fn fetch(&self, key: &RequestKey, _force_refresh: bool) -> FetchResult<AnalysisBundle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(bundle_for(&key.code))
    }
}

/// Transport whose byte streams the test drives chunk by chunk.
pub(crate) struct ScriptedTransport {
    sources: Mutex<HashMap<String, mpsc::UnboundedReceiver<FetchResult<Vec<u8>>>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sources: Mutex::new(HashMap::new()),
        })
    }

    /// Register a feed for a code; the returned sender drives the stream.
    /// Dropping it ends the stream (transport EOF).
    pub fn feed(&self, code: &str) -> mpsc::UnboundedSender<FetchResult<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sources.lock().unwrap().insert(code.to_string(), rx);
        tx
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self, code: &str) -> FetchResult<ByteStream> {
        let rx = self
            .sources
            .lock()
            .unwrap()
            .remove(code)
            .ok_or_else(|| FetchError::Api(format!("no scripted stream for {code}")))?;
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

/// One complete SSE frame carrying the given JSON payload.
pub(crate) fn frame(json: &str) -> FetchResult<Vec<u8>> {
    Ok(format!("data: {json}\n\n").into_bytes())
}

/// Ancillary-endpoint fake with per-endpoint call counters.
#[derive(Default)]
pub(crate) struct FakeApi {
    pub summary_calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub indices_calls: AtomicUsize,
    pub watchlist_calls: AtomicUsize,
    pub sentiment_calls: AtomicUsize,
    pub supply_calls: AtomicUsize,
    pub chart_calls: AtomicUsize,
    pub config_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DashboardApi for FakeApi {
    async fn account_summary(&self) -> FetchResult<AccountSummary> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AccountSummary {
            total_purchase: 1_000_000,
            total_eval: 1_100_000,
            total_pl: 100_000,
            profit_rate: 10.0,
            holdings_count: 3,
        })
    }

    async fn account_balance(&self) -> FetchResult<AccountBalance> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AccountBalance {
            total_purchase_amount: 1_000_000.0,
            total_eval_amount: 1_100_000.0,
            total_profit_loss: 100_000.0,
            total_profit_rate: 10.0,
            holdings: Vec::new(),
        })
    }

    async fn market_indices(&self) -> FetchResult<MarketIndices> {
        self.indices_calls.fetch_add(1, Ordering::SeqCst);
        Ok(MarketIndices {
            kospi: Some(IndexQuote {
                name: Some("KOSPI".to_string()),
                value: 2600.0,
                change: 12.0,
                change_rate: 0.46,
            }),
            kosdaq: None,
        })
    }

    async fn watchlist_prices(&self) -> FetchResult<Vec<WatchlistPrice>> {
        self.watchlist_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![WatchlistPrice {
            code: "005930".to_string(),
            name: "Samsung Electronics".to_string(),
            price: 71000.0,
            change: -500.0,
            change_rate: -0.7,
        }])
    }

    async fn sentiment(&self, code: &str) -> FetchResult<SentimentSummary> {
        self.sentiment_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SentimentSummary {
            code: code.to_string(),
            sentiment: "neutral".to_string(),
            summary: None,
        })
    }

    async fn supply_demand(&self, code: &str) -> FetchResult<SupplyDemand> {
        self.supply_calls.fetch_add(1, Ordering::SeqCst);
        let _ = code;
        Ok(SupplyDemand {
            foreign_net: 1200,
            institution_net: -300,
            individual_net: None,
            trend: None,
        })
    }

    async fn minute_chart(&self, code: &str) -> FetchResult<Vec<MinuteBar>> {
        self.chart_calls.fetch_add(1, Ordering::SeqCst);
        let _ = code;
        Ok(vec![MinuteBar {
            time: "0900".to_string(),
            open: 70500.0,
            high: 71200.0,
            low: 70400.0,
            close: 71000.0,
            volume: 123456.0,
        }])
    }

    async fn add_watchlist(&self, _code: &str) -> FetchResult<()> {
        Ok(())
    }

    async fn remove_watchlist(&self, _code: &str) -> FetchResult<()> {
        Ok(())
    }

    async fn refresh_config(&self) -> FetchResult<RefreshConfig> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RefreshConfig {
            sentiment_refresh_minutes: 7,
            sentiment_update_delay_seconds: 30,
        })
    }
}
