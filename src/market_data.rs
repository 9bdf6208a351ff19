//! Price and chart fetchers for the CoinGecko public API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::FetchError;
use crate::models::{ChartPoint, ChartSeries, PriceSnapshot, TimeRange};
use crate::storage_utils::MarketConfig;

/// Source of the two market data feeds the dashboard polls.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_price(&self) -> Result<PriceSnapshot, FetchError>;
    async fn fetch_chart(&self, range: TimeRange) -> Result<ChartSeries, FetchError>;
}

// --- Wire format & lenient number parsing ---

/// A number that may arrive as a float, an integer, a numeric string or null.
#[derive(Deserialize, Debug, Clone, Copy, Default)]
struct Lenient(#[serde(deserialize_with = "deserialize_f64_lenient")] Option<f64>);

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

/// `/simple/price` body: `{ "<asset>": { "<cur>": .., "<cur>_24h_vol": .., ... } }`
type RawPrices = HashMap<String, HashMap<String, Lenient>>;

/// `/coins/<asset>/market_chart` body. Either list may be missing.
#[derive(Deserialize, Debug, Default)]
struct RawMarketChart {
    #[serde(default)]
    prices: Vec<(f64, Lenient)>,
    #[serde(default)]
    total_volumes: Vec<(f64, Lenient)>,
}

fn parse_price(
    raw: &RawPrices,
    asset_id: &str,
    vs_currency: &str,
) -> Result<PriceSnapshot, FetchError> {
    let fields = raw
        .get(asset_id)
        .ok_or_else(|| FetchError::MissingAsset(asset_id.to_string()))?;
    let field = |key: &str| fields.get(key).and_then(|v| v.0);

    let price = field(vs_currency)
        .ok_or_else(|| FetchError::Malformed(format!("no `{}` price for {}", vs_currency, asset_id)))?;
    let volume_24h = field(&format!("{}_24h_vol", vs_currency)).unwrap_or(0.0);
    let change_24h_pct = field(&format!("{}_24h_change", vs_currency)).unwrap_or(0.0);
    let observed_at = field("last_updated_at")
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .unwrap_or_else(Utc::now);

    Ok(PriceSnapshot {
        price,
        volume_24h,
        change_24h_pct,
        observed_at,
    })
}

/// Pairs each price sample with the volume sample at the same array index.
/// Timestamps of the volume list are ignored; a missing or null volume is 0.
fn pair_by_position(raw: RawMarketChart) -> ChartSeries {
    raw.prices
        .iter()
        .enumerate()
        .filter_map(|(index, (ts, price))| {
            let price = price.0?;
            let volume = raw
                .total_volumes
                .get(index)
                .and_then(|(_, vol)| vol.0)
                .unwrap_or(0.0);
            Some(ChartPoint {
                timestamp_ms: *ts as i64,
                price,
                volume,
            })
        })
        .collect()
}

// --- HTTP client ---

pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    asset_id: String,
    vs_currency: String,
}

impl CoinGeckoClient {
    pub fn new(config: &MarketConfig, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            asset_id: config.asset_id.clone(),
            vs_currency: config.vs_currency.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if status == 418 || status == 429 {
            return Err(FetchError::RateLimited(status.as_u16()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl MarketDataSource for CoinGeckoClient {
    async fn fetch_price(&self) -> Result<PriceSnapshot, FetchError> {
        let url = format!("{}/simple/price", self.base_url);
        let query = [
            ("ids", self.asset_id.as_str()),
            ("vs_currencies", self.vs_currency.as_str()),
            ("include_24hr_vol", "true"),
            ("include_24hr_change", "true"),
            ("include_last_updated_at", "true"),
        ];

        let raw: RawPrices = self.get_json(&url, &query).await?;
        let snapshot = parse_price(&raw, &self.asset_id, &self.vs_currency)?;
        debug!(price = snapshot.price, "price fetched");
        Ok(snapshot)
    }

    async fn fetch_chart(&self, range: TimeRange) -> Result<ChartSeries, FetchError> {
        let url = format!("{}/coins/{}/market_chart", self.base_url, self.asset_id);
        let query = [
            ("vs_currency", self.vs_currency.as_str()),
            ("days", range.days()),
        ];

        let raw: RawMarketChart = self.get_json(&url, &query).await?;
        let series = pair_by_position(raw);
        debug!(%range, points = series.len(), "chart fetched");
        Ok(series)
    }
}
