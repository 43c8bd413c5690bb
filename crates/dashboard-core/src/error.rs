use thiserror::Error;

/// Error payloads are plain strings so results stay `Clone`: a single
/// fetch outcome fans out to every coalesced waiter.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Request canceled")]
    Canceled,
}

impl FetchError {
    /// Soft outcome: the caller (or a superseding request) aborted.
    /// Callers use this to suppress error banners.
    pub fn is_canceled(&self) -> bool {
        matches!(self, FetchError::Canceled)
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
