use thiserror::Error;

/// Errors raised while fetching price or chart data.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout or an undecodable body.
    #[error("market data request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The upstream answered 418/429.
    #[error("rate limited by market data API (HTTP {0})")]
    RateLimited(u16),

    #[error("market data API returned HTTP {0}")]
    Status(u16),

    #[error("asset `{0}` missing from price response")]
    MissingAsset(String),

    #[error("malformed market data response: {0}")]
    Malformed(String),

    /// The fetch task panicked before producing a result.
    #[error("market data fetch aborted")]
    Aborted,
}

impl FetchError {
    /// Text shown in the error banner.
    pub fn user_message(&self) -> String {
        match self {
            FetchError::RateLimited(_) => {
                "Unable to fetch market data: the API rate limit has been reached.".to_string()
            }
            _ => "Unable to fetch market data. The API limit may have been reached.".to_string(),
        }
    }
}

/// Failures inside the analysis requester. These never leave the requester;
/// they are logged and replaced by the fallback analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no API key configured for the analysis endpoint")]
    MissingApiKey,

    #[error("insufficient data for analysis")]
    InsufficientData,

    #[error("analysis request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("analysis API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("empty response from analysis API")]
    EmptyResponse,

    #[error("could not parse analysis response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Rejections of user alert actions.
#[derive(Debug, Error, PartialEq)]
pub enum AlertError {
    #[error("please enter a valid target price (got `{0}`)")]
    InvalidTarget(String),
}
