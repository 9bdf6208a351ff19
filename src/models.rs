use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// --- Market Data ---

#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub price: f64,
    pub volume_24h: f64,
    pub change_24h_pct: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartPoint {
    pub timestamp_ms: i64,
    pub price: f64,
    pub volume: f64,
}

/// Time-ordered samples for one [`TimeRange`].
pub type ChartSeries = Vec<ChartPoint>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[default]
    #[serde(rename = "24h")]
    H24,
    #[serde(rename = "7d")]
    D7,
    #[serde(rename = "30d")]
    D30,
    #[serde(rename = "90d")]
    D90,
    #[serde(rename = "1y")]
    Y1,
    #[serde(rename = "10y")]
    Y10,
}

impl TimeRange {
    pub const ALL: [TimeRange; 6] = [
        TimeRange::H24,
        TimeRange::D7,
        TimeRange::D30,
        TimeRange::D90,
        TimeRange::Y1,
        TimeRange::Y10,
    ];

    /// Day count understood by the chart endpoint.
    pub fn days(self) -> &'static str {
        match self {
            TimeRange::H24 => "1",
            TimeRange::D7 => "7",
            TimeRange::D30 => "30",
            TimeRange::D90 => "90",
            TimeRange::Y1 => "365",
            TimeRange::Y10 => "3650",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeRange::H24 => "24h",
            TimeRange::D7 => "7d",
            TimeRange::D30 => "30d",
            TimeRange::D90 => "90d",
            TimeRange::Y1 => "1y",
            TimeRange::Y10 => "10y",
        }
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|r| *r == self).unwrap_or(0)
    }

    /// Range selected by the digit keys `1`..`6`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// --- Analysis ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
    Volatile,
}

impl Sentiment {
    pub const ALL: [Sentiment; 4] = [
        Sentiment::Bullish,
        Sentiment::Bearish,
        Sentiment::Neutral,
        Sentiment::Volatile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Bullish => "Bullish",
            Sentiment::Bearish => "Bearish",
            Sentiment::Neutral => "Neutral",
            Sentiment::Volatile => "Volatile",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ANALYSIS_UNAVAILABLE: &str =
    "AI analysis is temporarily unavailable due to a connection problem.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub sentiment: Sentiment,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resistance_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resistance_price: Option<f64>,
}

impl MarketAnalysis {
    /// Neutral placeholder used whenever an analysis could not be produced.
    pub fn unavailable() -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            summary: ANALYSIS_UNAVAILABLE.to_string(),
            support_level: Some("N/A".to_string()),
            resistance_level: Some("N/A".to_string()),
            support_price: None,
            resistance_price: None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.summary == ANALYSIS_UNAVAILABLE
    }
}

// --- Refresh bookkeeping ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshState {
    pub loading: bool,
    pub last_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}
