pub mod cache;
pub mod inflight;
pub mod queue;
pub mod stream;

#[cfg(test)]
mod testutil;

pub use cache::{CachePolicy, TieredCache};
pub use inflight::{Admission, InflightMap, RunToken};
pub use queue::RequestQueue;
pub use stream::{StreamHandle, StreamManager, StreamUpdate};

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use dashboard_client::BackendClient;
use dashboard_core::{
    AccountBalance, AccountSummary, AnalysisBundle, AnalysisFetcher, CancelHandle, Clock,
    DashboardApi, DashboardConfig, FetchError, FetchResult, KeyValueStore, MarketIndices,
    MinuteBar, Priority, RefreshConfig, RequestKey, SentimentSummary, StreamTransport,
    SupplyDemand, SystemClock, Variant, WatchlistPrice,
};

/// Options for one batch analysis fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Skip the cache and ask the backend to rebuild its own caches too.
    pub force_refresh: bool,
    /// Ask for the cheap variant (no AI passes). Cached separately from
    /// full results.
    pub lightweight: bool,
    /// Jump the pending queue.
    pub high_priority: bool,
    /// Caller-owned cancellation. When set, the automatic batch timeout
    /// is disabled: the caller owns cancellation.
    pub cancel: Option<CancelHandle>,
}

/// Single entry point for everything the dashboard fetches: consults the
/// two-tier cache, admits misses through the bounded queue, runs
/// streaming sessions, and keeps the cache tiers written back.
///
/// Constructed once at application startup; clock and store are injected
/// so tests substitute a manual clock and an in-memory store.
pub struct FetchOrchestrator {
    api: Arc<dyn DashboardApi>,
    queue: Arc<RequestQueue>,
    streams: Arc<StreamManager>,
    config: DashboardConfig,

    analysis_cache: Arc<TieredCache<AnalysisBundle>>,

    summary_cache: TieredCache<AccountSummary>,
    summary_inflight: Arc<InflightMap<String, AccountSummary>>,
    balance_cache: TieredCache<AccountBalance>,
    balance_inflight: Arc<InflightMap<String, AccountBalance>>,
    indices_cache: TieredCache<MarketIndices>,
    indices_inflight: Arc<InflightMap<String, MarketIndices>>,
    watchlist_cache: TieredCache<Vec<WatchlistPrice>>,
    watchlist_inflight: Arc<InflightMap<String, Vec<WatchlistPrice>>>,
    sentiment_cache: TieredCache<SentimentSummary>,
    sentiment_inflight: Arc<InflightMap<String, SentimentSummary>>,
    supply_cache: TieredCache<SupplyDemand>,
    supply_inflight: Arc<InflightMap<String, SupplyDemand>>,
    chart_cache: TieredCache<Vec<MinuteBar>>,
    chart_inflight: Arc<InflightMap<String, Vec<MinuteBar>>>,
}

impl FetchOrchestrator {
    pub fn new(
        fetcher: Arc<dyn AnalysisFetcher>,
        transport: Arc<dyn StreamTransport>,
        api: Arc<dyn DashboardApi>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: DashboardConfig,
    ) -> Self {
        let analysis_policy = CachePolicy::new(
            "stock_analysis_",
            config.analysis_fast_ttl,
            config.analysis_slow_ttl,
        );
        let market_policy =
            |prefix| CachePolicy::new(prefix, config.market_fast_ttl, config.market_slow_ttl);

        Self {
            queue: RequestQueue::new(
                fetcher,
                Arc::clone(&clock),
                config.max_concurrent,
                config.batch_timeout,
            ),
            streams: StreamManager::new(transport, Arc::clone(&clock)),
            analysis_cache: Arc::new(TieredCache::new(
                analysis_policy,
                Arc::clone(&store),
                Arc::clone(&clock),
            )),
            summary_cache: TieredCache::new(
                market_policy("dash_"),
                Arc::clone(&store),
                Arc::clone(&clock),
            ),
            summary_inflight: InflightMap::new(),
            balance_cache: TieredCache::new(
                market_policy("dash_"),
                Arc::clone(&store),
                Arc::clone(&clock),
            ),
            balance_inflight: InflightMap::new(),
            indices_cache: TieredCache::new(
                market_policy("dash_"),
                Arc::clone(&store),
                Arc::clone(&clock),
            ),
            indices_inflight: InflightMap::new(),
            watchlist_cache: TieredCache::new(
                market_policy("dash_"),
                Arc::clone(&store),
                Arc::clone(&clock),
            ),
            watchlist_inflight: InflightMap::new(),
            sentiment_cache: TieredCache::new(
                market_policy("dash_"),
                Arc::clone(&store),
                Arc::clone(&clock),
            ),
            sentiment_inflight: InflightMap::new(),
            supply_cache: TieredCache::new(
                market_policy("dash_"),
                Arc::clone(&store),
                Arc::clone(&clock),
            ),
            supply_inflight: InflightMap::new(),
            chart_cache: TieredCache::new(market_policy("dash_"), Arc::clone(&store), clock),
            chart_inflight: InflightMap::new(),
            api,
            config,
        }
    }

    /// Wire everything to one HTTP client with the wall clock.
    pub fn with_client(
        client: Arc<BackendClient>,
        store: Arc<dyn KeyValueStore>,
        config: DashboardConfig,
    ) -> Self {
        Self::new(
            client.clone(),
            client.clone(),
            client,
            store,
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Batch analysis fetch: cache, then queue, then cache write-back.
    ///
    /// A full-variant lookup never accepts a lightweight hit (and vice
    /// versa); a cancellation (explicit or via the batch ceiling) comes
    /// back as `FetchError::Canceled`, distinguishable from hard errors.
    pub async fn fetch_analysis(
        &self,
        code: &str,
        opts: FetchOptions,
    ) -> FetchResult<AnalysisBundle> {
        let variant = if opts.lightweight {
            Variant::Lightweight
        } else {
            Variant::Full
        };
        let key = RequestKey::new(code, variant);

        if !opts.force_refresh {
            if let Some(bundle) = self.analysis_cache.get(&key.cache_key()) {
                tracing::debug!("analysis cache hit for {key}");
                return Ok(bundle);
            }
        }

        let priority = if opts.high_priority {
            Priority::High
        } else {
            Priority::Normal
        };
        let receiver = self
            .queue
            .submit(key.clone(), opts.force_refresh, priority, opts.cancel);

        let result = receiver.await.map_err(|_| FetchError::Canceled)?;
        let bundle = result?;

        self.analysis_cache.put(&key.cache_key(), bundle.clone());
        Ok(bundle)
    }

    /// Detail-view streaming entry point. The caller consumes incremental
    /// updates; the final bundle is written back to the full-variant
    /// cache slot as it passes through.
    pub fn stream_analysis(&self, code: &str, priority: Priority) -> StreamHandle {
        let mut inner = self.streams.start(code, priority);
        let cancel = inner.cancel_handle();
        let (tx, rx) = mpsc::unbounded_channel();

        let cache = Arc::clone(&self.analysis_cache);
        let cache_key = RequestKey::full(code).cache_key();
        tokio::spawn(async move {
            while let Some(update) = inner.updates.recv().await {
                if let StreamUpdate::Complete(bundle) = &update {
                    cache.put(&cache_key, bundle.clone());
                }
                if tx.send(update).is_err() {
                    // Caller dropped the handle; stop forwarding.
                    break;
                }
            }
        });

        StreamHandle::new(code.to_string(), rx, cancel)
    }

    pub fn active_streams(&self) -> usize {
        self.streams.active_sessions()
    }

    /// Cancel every active streaming session (application shutdown).
    pub fn cancel_streams(&self) {
        self.streams.cancel_all();
    }

    // -- Ancillary batch endpoints ------------------------------------------
    //
    // Same two-tier cache machinery under the market TTL policy, plus
    // in-flight coalescing. These are cheap single calls and do not
    // compete for analysis-queue slots.

    pub async fn account_summary(&self) -> FetchResult<AccountSummary> {
        cached_fetch(
            &self.summary_cache,
            &self.summary_inflight,
            "account_summary",
            self.api.account_summary(),
        )
        .await
    }

    pub async fn holdings(&self) -> FetchResult<AccountBalance> {
        cached_fetch(
            &self.balance_cache,
            &self.balance_inflight,
            "account_balance",
            self.api.account_balance(),
        )
        .await
    }

    pub async fn market_indices(&self) -> FetchResult<MarketIndices> {
        cached_fetch(
            &self.indices_cache,
            &self.indices_inflight,
            "market_indices",
            self.api.market_indices(),
        )
        .await
    }

    pub async fn watchlist_prices(&self) -> FetchResult<Vec<WatchlistPrice>> {
        cached_fetch(
            &self.watchlist_cache,
            &self.watchlist_inflight,
            "watchlist_prices",
            self.api.watchlist_prices(),
        )
        .await
    }

    pub async fn sentiment(&self, code: &str) -> FetchResult<SentimentSummary> {
        cached_fetch(
            &self.sentiment_cache,
            &self.sentiment_inflight,
            &format!("sentiment_{code}"),
            self.api.sentiment(code),
        )
        .await
    }

    pub async fn supply_demand(&self, code: &str) -> FetchResult<SupplyDemand> {
        cached_fetch(
            &self.supply_cache,
            &self.supply_inflight,
            &format!("supply_demand_{code}"),
            self.api.supply_demand(code),
        )
        .await
    }

    pub async fn minute_chart(&self, code: &str) -> FetchResult<Vec<MinuteBar>> {
        cached_fetch(
            &self.chart_cache,
            &self.chart_inflight,
            &format!("minute_chart_{code}"),
            self.api.minute_chart(code),
        )
        .await
    }

    /// Add to the watchlist and invalidate the cached price list.
    pub async fn add_to_watchlist(&self, code: &str) -> FetchResult<()> {
        self.api.add_watchlist(code).await?;
        self.watchlist_cache.remove("watchlist_prices");
        Ok(())
    }

    /// Remove from the watchlist and invalidate the cached price list.
    pub async fn remove_from_watchlist(&self, code: &str) -> FetchResult<()> {
        self.api.remove_watchlist(code).await?;
        self.watchlist_cache.remove("watchlist_prices");
        Ok(())
    }

    /// Fetch the backend-served refresh knobs and fold them into a config
    /// the rendering layer can schedule its timers from.
    pub async fn load_refresh_config(&self) -> FetchResult<DashboardConfig> {
        let refresh: RefreshConfig = self.api.refresh_config().await?;
        let mut config = self.config.clone();
        config.refresh = refresh;
        Ok(config)
    }
}

/// Cache-then-coalesce helper for the ancillary endpoints: serve a live
/// cache entry, otherwise let exactly one caller fetch while concurrent
/// callers wait for the same outcome.
async fn cached_fetch<T, Fut>(
    cache: &TieredCache<T>,
    inflight: &Arc<InflightMap<String, T>>,
    key: &str,
    fetch: Fut,
) -> FetchResult<T>
where
    T: Clone + Serialize + DeserializeOwned,
    Fut: Future<Output = FetchResult<T>>,
{
    if let Some(value) = cache.get(key) {
        return Ok(value);
    }

    match inflight.admit(key.to_string()) {
        Admission::Join(rx) => match rx.await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Canceled),
        },
        Admission::Run(token) => {
            let result = fetch.await;
            if let Ok(value) = &result {
                cache.put(key, value.clone());
            }
            token.complete(&result);
            result
        }
    }
}
