use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::models::TimeRange;

// CONFIGURATION STRUCTS
// Every field has a default so a partial (or missing) config.json still works.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MarketConfig {
    pub asset_id: String,    // CoinGecko id, e.g. "dogecoin"
    pub symbol: String,      // ticker shown in the UI, e.g. "DOGE"
    pub vs_currency: String, // e.g. "usd"
    pub base_url: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            asset_id: "dogecoin".to_string(),
            symbol: "DOGE".to_string(),
            vs_currency: "usd".to_string(),
            base_url: "https://api.coingecko.com/api/v3".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub base_url: String,
    pub model: String,
    pub language: String, // language of the generated summary
    pub reanalyze_on_range_change: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            language: "English".to_string(),
            reanalyze_on_range_change: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub analysis: AnalysisConfig,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub default_range: TimeRange,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            analysis: AnalysisConfig::default(),
            poll_interval_secs: 60,
            request_timeout_secs: 15,
            default_range: TimeRange::H24,
            log_level: "info".to_string(),
        }
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g. ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted next to the running executable and makes sure
    /// the directory exists.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    pub async fn new(base_dir: PathBuf) -> anyhow::Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    /// Reads `<filename>.json` and deserializes it into `T`.
    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));

        // serde_json validates the bytes itself, no need for read_to_string.
        let content = fs::read(path).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Like [`load`](Self::load), but a missing file yields `T::default()`.
    /// A file that exists and fails to parse is still an error.
    pub async fn load_or_default<T: DeserializeOwned + Default>(
        &self,
        filename: &str,
    ) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));
        if !fs::try_exists(&path).await? {
            return Ok(T::default());
        }
        self.load(filename).await
    }
}
