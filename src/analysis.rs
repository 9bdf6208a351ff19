//! AI market analysis backed by the Gemini `generateContent` endpoint.
//!
//! The requester never fails: any problem (missing key, transport error, a
//! response that does not match the schema) is logged and replaced by
//! [`MarketAnalysis::unavailable`].

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::AnalysisError;
use crate::indicators::{RSI_PERIOD, calculate_rsi};
use crate::models::{ChartPoint, MarketAnalysis, PriceSnapshot, Sentiment};
use crate::storage_utils::{AnalysisConfig, MarketConfig};

#[async_trait]
pub trait AnalysisRequester: Send + Sync {
    /// Always resolves; failures come back as the fallback analysis.
    async fn analyze(&self, snapshot: &PriceSnapshot, history: &[ChartPoint]) -> MarketAnalysis;
}

// --- Local statistics fed into the prompt ---

#[derive(Debug, Clone, PartialEq)]
pub struct TrendStats {
    pub start: f64,
    pub end: f64,
    pub high: f64,
    pub low: f64,
    pub volatility_pct: f64,
    pub rsi: Option<f64>,
}

impl TrendStats {
    pub fn from_series(points: &[ChartPoint]) -> Option<Self> {
        let first = points.first()?;
        let last = points.last()?;

        let (low, high) = points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.price), hi.max(p.price))
            });
        let volatility_pct = if low > 0.0 {
            (high - low) / low * 100.0
        } else {
            0.0
        };

        Some(Self {
            start: first.price,
            end: last.price,
            high,
            low,
            volatility_pct,
            rsi: calculate_rsi(points, RSI_PERIOD),
        })
    }
}

// --- Gemini client ---

pub struct GeminiAnalyst {
    client: Client,
    api_key: Option<SecretString>,
    endpoint: String,
    asset_name: String,
    symbol: String,
    language: String,
}

impl GeminiAnalyst {
    pub fn new(
        analysis: &AnalysisConfig,
        market: &MarketConfig,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            analysis.base_url.trim_end_matches('/'),
            analysis.model
        );

        Ok(Self {
            client,
            api_key,
            endpoint,
            asset_name: display_name(&market.asset_id),
            symbol: market.symbol.clone(),
            language: analysis.language.clone(),
        })
    }

    async fn try_analyze(
        &self,
        snapshot: &PriceSnapshot,
        history: &[ChartPoint],
    ) -> Result<MarketAnalysis, AnalysisError> {
        let api_key = self.api_key.as_ref().ok_or(AnalysisError::MissingApiKey)?;
        let stats = TrendStats::from_series(history).ok_or(AnalysisError::InsufficientData)?;

        let body = json!({
            "contents": [{ "parts": [{ "text": self.build_prompt(snapshot, &stats) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema(),
            }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateContentResponse = response.json().await?;
        let text = reply.first_text().ok_or(AnalysisError::EmptyResponse)?;
        parse_analysis(text)
    }

    fn build_prompt(&self, snapshot: &PriceSnapshot, stats: &TrendStats) -> String {
        let rsi_line = stats
            .rsi
            .map(|rsi| format!("    - RSI({}): {:.1}\n", RSI_PERIOD, rsi))
            .unwrap_or_default();

        format!(
            "Analyze the current {name} ({symbol}) market data provided below.\n\
             \n\
             Current Price: ${price}\n\
             24h Change: {change:.2}%\n\
             24h Volume: ${volume:.0}\n\
             \n\
             Trend over the loaded window:\n\
             \x20   - Start: ${start:.4}\n\
             \x20   - End: ${end:.4}\n\
             \x20   - High: ${high:.4}\n\
             \x20   - Low: ${low:.4}\n\
             \x20   - Volatility Range: {vol:.2}%\n\
             {rsi_line}\
             \n\
             Provide a structured analysis including sentiment, a concise summary of the volatility, \
             and potential support/resistance levels.\n\
             \n\
             IMPORTANT:\n\
             1. Write 'summary', 'supportLevel' and 'resistanceLevel' in {language}.\n\
             2. Provide 'supportPrice' and 'resistancePrice' as plain numbers (USD) for charting.\n\
             \n\
             Keep the tone professional but aware of the coin's meme culture (fun but insightful).\n",
            name = self.asset_name,
            symbol = self.symbol,
            price = snapshot.price,
            change = snapshot.change_24h_pct,
            volume = snapshot.volume_24h,
            start = stats.start,
            end = stats.end,
            high = stats.high,
            low = stats.low,
            vol = stats.volatility_pct,
            rsi_line = rsi_line,
            language = self.language,
        )
    }
}

#[async_trait]
impl AnalysisRequester for GeminiAnalyst {
    async fn analyze(&self, snapshot: &PriceSnapshot, history: &[ChartPoint]) -> MarketAnalysis {
        match self.try_analyze(snapshot, history).await {
            Ok(analysis) => {
                info!(sentiment = %analysis.sentiment, "market analysis received");
                analysis
            }
            Err(e) => {
                warn!(error = %e, "market analysis failed, using fallback");
                MarketAnalysis::unavailable()
            }
        }
    }
}

// --- Structured output ---

fn response_schema() -> Value {
    let sentiments: Vec<&str> = Sentiment::ALL.iter().map(|s| s.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "sentiment": {
                "type": "STRING",
                "enum": sentiments,
                "description": "The overall market sentiment."
            },
            "summary": {
                "type": "STRING",
                "description": "A short paragraph explaining the volatility and trend."
            },
            "supportLevel": {
                "type": "STRING",
                "description": "Text description of the support level."
            },
            "resistanceLevel": {
                "type": "STRING",
                "description": "Text description of the resistance level."
            },
            "supportPrice": {
                "type": "NUMBER",
                "description": "Estimated numeric support price in USD (e.g. 0.15)."
            },
            "resistancePrice": {
                "type": "NUMBER",
                "description": "Estimated numeric resistance price in USD (e.g. 0.18)."
            }
        },
        "required": ["sentiment", "summary"]
    })
}

#[derive(Deserialize, Debug, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize, Debug)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Debug)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn first_text(&self) -> Option<&str> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .find(|t| !t.trim().is_empty())
    }
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("valid fence regex")
});

fn parse_analysis(text: &str) -> Result<MarketAnalysis, AnalysisError> {
    let payload = CODE_FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str());

    if payload.trim().is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }
    let analysis = serde_json::from_str(payload)?;
    debug!("analysis payload parsed");
    Ok(analysis)
}

/// "dogecoin" -> "Dogecoin", "shiba-inu" -> "Shiba Inu"
fn display_name(asset_id: &str) -> String {
    asset_id
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
