mod alert;
mod analysis;
mod coordinator;
mod error;
mod format;
mod indicators;
mod market_data;
mod models;
mod report;
mod storage_utils;
mod tui;

use secrecy::SecretString;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::analysis::GeminiAnalyst;
use crate::coordinator::{Coordinator, CoordinatorOptions};
use crate::market_data::CoinGeckoClient;
use crate::storage_utils::{AppConfig, AsyncStorageManager};

fn api_key_from_env() -> Option<SecretString> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .find_map(|name| std::env::var(name).ok())
        .filter(|key| !key.trim().is_empty())
        .map(|key| SecretString::new(key.into()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Step 1: Configuration
    let storage = AsyncStorageManager::new_relative("storage").await?;
    let config: AppConfig = storage.load_or_default("config").await?;

    // Step 2: Logging goes to a file, the terminal belongs to the dashboard
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(storage.path_for("dogevol.log"))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("dogevol={}", config.log_level).into()),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    info!(asset = %config.market.asset_id, range = %config.default_range, "DogeVol starting");

    // Step 3: Clients
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let market = CoinGeckoClient::new(&config.market, timeout)?;

    let api_key = api_key_from_env();
    if api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; AI analysis will be unavailable");
    }
    let analyst = GeminiAnalyst::new(&config.analysis, &config.market, api_key, timeout)?;

    let coordinator = Coordinator::new(
        Arc::new(market),
        Arc::new(analyst),
        config.default_range,
        CoordinatorOptions {
            reanalyze_on_range_change: config.analysis.reanalyze_on_range_change,
        },
    );

    // Step 4: Dashboard
    let poll_period = Duration::from_secs(config.poll_interval_secs.max(1));
    let final_state = tui::run_tui(coordinator, config.market.symbol.clone(), poll_period).await?;

    // Step 5: Session summary
    report::print_summary(&final_state, &config.market.symbol);
    info!("DogeVol stopped");

    Ok(())
}
