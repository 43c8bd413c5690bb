use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FetchError, FetchResult};
use crate::types::{
    AnalysisBundle, FundamentalData, NewsAnalysis, Outlook, StockInfo, SupplyDemand,
    TechnicalSnapshot,
};

/// One record of the incremental analysis stream, already typed.
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    Basic(StockInfo),
    SupplyDemand(SupplyDemand),
    Technical(TechnicalSnapshot),
    Fundamental(FundamentalData),
    News(NewsAnalysis),
    Outlook(Outlook),
    Complete,
    Error { message: String },
}

/// Raw wire frame: `{ "type": ..., "data"?: ..., "message"?: ... }`.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

fn frame_data<T: DeserializeOwned>(data: Option<Value>) -> FetchResult<T> {
    let data =
        data.ok_or_else(|| FetchError::InvalidData("stream frame missing data".to_string()))?;
    serde_json::from_value(data)
        .map_err(|e| FetchError::InvalidData(format!("bad frame payload: {e}")))
}

impl AnalysisEvent {
    /// Parse one complete frame payload. Unknown tags and shape mismatches
    /// are errors; the session layer logs and skips them without killing
    /// the stream.
    pub fn parse(payload: &str) -> FetchResult<Self> {
        let frame: RawFrame = serde_json::from_str(payload)
            .map_err(|e| FetchError::InvalidData(format!("bad stream frame: {e}")))?;

        match frame.kind.as_str() {
            "basic" => Ok(AnalysisEvent::Basic(frame_data(frame.data)?)),
            "supply_demand" => Ok(AnalysisEvent::SupplyDemand(frame_data(frame.data)?)),
            "technical" => Ok(AnalysisEvent::Technical(frame_data(frame.data)?)),
            "fundamental" => Ok(AnalysisEvent::Fundamental(frame_data(frame.data)?)),
            "news" => Ok(AnalysisEvent::News(frame_data(frame.data)?)),
            "outlook" => Ok(AnalysisEvent::Outlook(frame_data(frame.data)?)),
            "complete" => Ok(AnalysisEvent::Complete),
            "error" => Ok(AnalysisEvent::Error {
                message: frame
                    .message
                    .unwrap_or_else(|| "stream error".to_string()),
            }),
            other => Err(FetchError::InvalidData(format!(
                "unknown stream frame type: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisEvent::Complete | AnalysisEvent::Error { .. })
    }
}

/// Fold one partial record into the bundle. Pure: terminal records leave
/// the bundle untouched, and a sub-field, once set, is never unset.
pub fn merge_event(mut bundle: AnalysisBundle, event: &AnalysisEvent) -> AnalysisBundle {
    match event {
        AnalysisEvent::Basic(info) => bundle.stock_info = Some(info.clone()),
        AnalysisEvent::SupplyDemand(flows) => bundle.supply_demand = Some(flows.clone()),
        AnalysisEvent::Technical(snapshot) => bundle.technical = Some(snapshot.clone()),
        AnalysisEvent::Fundamental(figures) => bundle.fundamental = Some(figures.clone()),
        AnalysisEvent::News(news) => bundle.news_analysis = Some(news.clone()),
        AnalysisEvent::Outlook(outlook) => bundle.outlook = Some(outlook.clone()),
        AnalysisEvent::Complete | AnalysisEvent::Error { .. } => {}
    }
    bundle
}
