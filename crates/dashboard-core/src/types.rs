use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchResult};

/// Which shape of analysis a request asks for. Lightweight fetches skip
/// the expensive AI passes server-side; the two variants never share a
/// cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Full,
    Lightweight,
}

/// Identity of one analysis request: stock code plus variant. Also the
/// cache slot and the de-duplication slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub code: String,
    pub variant: Variant,
}

impl RequestKey {
    pub fn new(code: impl Into<String>, variant: Variant) -> Self {
        Self {
            code: code.into(),
            variant,
        }
    }

    pub fn full(code: impl Into<String>) -> Self {
        Self::new(code, Variant::Full)
    }

    pub fn lightweight(code: impl Into<String>) -> Self {
        Self::new(code, Variant::Lightweight)
    }

    /// Cache-slot key. The lightweight suffix keeps the variants apart.
    pub fn cache_key(&self) -> String {
        match self.variant {
            Variant::Full => self.code.clone(),
            Variant::Lightweight => format!("{}_light", self.code),
        }
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.variant {
            Variant::Full => write!(f, "{}", self.code),
            Variant::Lightweight => write!(f, "{} (light)", self.code),
        }
    }
}

/// Queue priority. High-priority items go to the head of the pending
/// line; a sustained stream of them may starve normal items, which is the
/// intended most-recent-detail-view-wins behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

/// Standard backend envelope: `{ success, data?, message? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwrap a data-carrying response.
    pub fn into_result(self) -> FetchResult<T> {
        if self.success {
            self.data.ok_or_else(|| {
                FetchError::InvalidData("successful response missing data".to_string())
            })
        } else {
            Err(FetchError::Backend(
                self.message
                    .unwrap_or_else(|| "unknown backend error".to_string()),
            ))
        }
    }

    /// For mutation endpoints whose success responses carry no payload.
    pub fn ok(self) -> FetchResult<()> {
        if self.success {
            Ok(())
        } else {
            Err(FetchError::Backend(
                self.message
                    .unwrap_or_else(|| "unknown backend error".to_string()),
            ))
        }
    }
}

/// Aggregate analysis result for one stock. Every sub-record is optional:
/// a batch fetch fills them all at once, a streaming session fills them
/// progressively, and a field once set is never unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisBundle {
    #[serde(default)]
    pub stock_info: Option<StockInfo>,
    #[serde(default)]
    pub supply_demand: Option<SupplyDemand>,
    #[serde(default)]
    pub technical: Option<TechnicalSnapshot>,
    #[serde(default, alias = "fundamental_data")]
    pub fundamental: Option<FundamentalData>,
    #[serde(default)]
    pub news_analysis: Option<NewsAnalysis>,
    #[serde(default)]
    pub outlook: Option<Outlook>,
}

/// Current price snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockInfo {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub change_rate: Option<f64>,
}

/// Net investor flows (shares).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyDemand {
    #[serde(default)]
    pub foreign_net: i64,
    #[serde(default)]
    pub institution_net: i64,
    #[serde(default)]
    pub individual_net: Option<i64>,
    #[serde(default)]
    pub trend: Option<String>,
}

/// Indicator snapshot computed server-side from daily bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub rsi: f64,
    pub rsi_signal: String,
    pub macd: f64,
    pub macd_signal: String,
    pub ma5: f64,
    pub ma20: f64,
    pub ma60: f64,
    pub ma_signal: String,
    #[serde(default)]
    pub bollinger: Option<BollingerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BollingerSummary {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub bandwidth: f64,
    pub percent_b: f64,
    pub is_squeeze: bool,
}

/// Valuation figures; any of them may be missing for a given listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalData {
    #[serde(default)]
    pub per: Option<f64>,
    #[serde(default)]
    pub pbr: Option<f64>,
    #[serde(default)]
    pub roe: Option<f64>,
    #[serde(default)]
    pub eps: Option<f64>,
    #[serde(default)]
    pub bps: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub operating_profit: Option<f64>,
}

/// AI-written news digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsAnalysis {
    pub summary: String,
    pub sentiment: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// AI outlook and recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outlook {
    pub recommendation: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub trading_scenario: Option<String>,
    #[serde(default)]
    pub price_strategy: Option<PriceStrategy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceStrategy {
    #[serde(default)]
    pub buy_zone: Option<String>,
    #[serde(default)]
    pub sell_zone: Option<String>,
    #[serde(default)]
    pub stop_loss: Option<String>,
}

/// Account totals for the header card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub total_purchase: i64,
    pub total_eval: i64,
    pub total_pl: i64,
    pub profit_rate: f64,
    pub holdings_count: u32,
}

/// Full balance with one entry per held stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total_purchase_amount: f64,
    pub total_eval_amount: f64,
    pub total_profit_loss: f64,
    pub total_profit_rate: f64,
    #[serde(default)]
    pub holdings: Vec<Holding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub code: String,
    pub name: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub current_price: f64,
    pub eval_amount: f64,
    pub profit_loss: f64,
    pub profit_rate: f64,
}

/// KOSPI/KOSDAQ header quotes; either may be unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketIndices {
    #[serde(default)]
    pub kospi: Option<IndexQuote>,
    #[serde(default)]
    pub kosdaq: Option<IndexQuote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexQuote {
    #[serde(default)]
    pub name: Option<String>,
    pub value: f64,
    pub change: f64,
    pub change_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistPrice {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_rate: f64,
}

/// Card-sized sentiment extract of the full analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSummary {
    pub code: String,
    pub sentiment: String,
    #[serde(default)]
    pub summary: Option<String>,
}

/// One minute-chart bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinuteBar {
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}
