use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;

use dashboard_core::{
    AccountBalance, AccountSummary, AnalysisBundle, AnalysisFetcher, ApiResponse, ByteStream,
    DashboardApi, FetchError, FetchResult, MarketIndices, MinuteBar, RefreshConfig, RequestKey,
    SentimentSummary, StreamTransport, SupplyDemand, Variant, WatchlistPrice,
};

pub mod sse;
pub mod store;

pub use sse::SseFrameDecoder;
pub use store::DiskStore;

/// HTTP client for the dashboard backend.
///
/// No client-level timeout is set: the orchestrator owns the batch
/// ceiling (so a caller-supplied cancel handle can disable it) and
/// streaming responses stay open for the life of the session.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    client: Client,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> FetchResult<ApiResponse<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Api(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Api(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Api(e.to_string()))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> FetchResult<ApiResponse<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| FetchError::Api(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Api(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Api(e.to_string()))
    }

    /// Batch full-analysis fetch.
    pub async fn fetch_full_analysis(
        &self,
        key: &RequestKey,
        force_refresh: bool,
    ) -> FetchResult<AnalysisBundle> {
        let lightweight = matches!(key.variant, Variant::Lightweight);
        let query = [
            ("refresh", force_refresh.to_string()),
            ("lightweight", lightweight.to_string()),
        ];

        tracing::debug!("fetching analysis for {key} (refresh={force_refresh})");
        self.get_json(&format!("/analysis/{}", key.code), &query)
            .await?
            .into_result()
    }

    pub async fn fetch_account_summary(&self) -> FetchResult<AccountSummary> {
        self.get_json("/api/account/summary", &[]).await?.into_result()
    }

    pub async fn fetch_account_balance(&self) -> FetchResult<AccountBalance> {
        self.get_json("/api/account/balance", &[]).await?.into_result()
    }

    pub async fn fetch_market_indices(&self) -> FetchResult<MarketIndices> {
        self.get_json("/api/market/indices", &[]).await?.into_result()
    }

    pub async fn fetch_watchlist_prices(&self) -> FetchResult<Vec<WatchlistPrice>> {
        self.get_json("/api/watchlist/prices", &[]).await?.into_result()
    }

    pub async fn fetch_sentiment(&self, code: &str) -> FetchResult<SentimentSummary> {
        self.get_json(&format!("/api/analysis/sentiment/{code}"), &[])
            .await?
            .into_result()
    }

    pub async fn fetch_supply_demand(&self, code: &str) -> FetchResult<SupplyDemand> {
        self.get_json(&format!("/api/analysis/supply-demand/{code}"), &[])
            .await?
            .into_result()
    }

    pub async fn fetch_minute_chart(&self, code: &str) -> FetchResult<Vec<MinuteBar>> {
        self.get_json(&format!("/api/chart/minute/{code}"), &[])
            .await?
            .into_result()
    }

    pub async fn fetch_config(&self) -> FetchResult<RefreshConfig> {
        self.get_json("/api/config", &[]).await?.into_result()
    }

    pub async fn watchlist_add(&self, code: &str) -> FetchResult<()> {
        let body = serde_json::json!({ "code": code });
        self.post_json::<serde_json::Value>("/api/watchlist/add", &body)
            .await?
            .ok()
    }

    pub async fn watchlist_remove(&self, code: &str) -> FetchResult<()> {
        let body = serde_json::json!({ "code": code });
        self.post_json::<serde_json::Value>("/api/watchlist/remove", &body)
            .await?
            .ok()
    }
}

#[async_trait]
impl AnalysisFetcher for BackendClient {
    async fn fetch(&self, key: &RequestKey, force_refresh: bool) -> FetchResult<AnalysisBundle> {
        self.fetch_full_analysis(key, force_refresh).await
    }
}

#[async_trait]
impl StreamTransport for BackendClient {
    async fn open(&self, code: &str) -> FetchResult<ByteStream> {
        let url = format!("{}/analysis/stream/{}", self.base_url, code);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Api(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Api(format!(
                "stream HTTP {}",
                response.status()
            )));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| FetchError::Api(e.to_string()))
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl DashboardApi for BackendClient {
    async fn account_summary(&self) -> FetchResult<AccountSummary> {
        self.fetch_account_summary().await
    }

    async fn account_balance(&self) -> FetchResult<AccountBalance> {
        self.fetch_account_balance().await
    }

    async fn market_indices(&self) -> FetchResult<MarketIndices> {
        self.fetch_market_indices().await
    }

    async fn watchlist_prices(&self) -> FetchResult<Vec<WatchlistPrice>> {
        self.fetch_watchlist_prices().await
    }

    async fn sentiment(&self, code: &str) -> FetchResult<SentimentSummary> {
        self.fetch_sentiment(code).await
    }

    async fn supply_demand(&self, code: &str) -> FetchResult<SupplyDemand> {
        self.fetch_supply_demand(code).await
    }

    async fn minute_chart(&self, code: &str) -> FetchResult<Vec<MinuteBar>> {
        self.fetch_minute_chart(code).await
    }

    async fn add_watchlist(&self, code: &str) -> FetchResult<()> {
        self.watchlist_add(code).await
    }

    async fn remove_watchlist(&self, code: &str) -> FetchResult<()> {
        self.watchlist_remove(code).await
    }

    async fn refresh_config(&self) -> FetchResult<RefreshConfig> {
        self.fetch_config().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_normalized() {
        let client = BackendClient::new("http://localhost:5000/");
        assert_eq!(client.base_url, "http://localhost:5000");
    }
}
