//! Price Feed Adapter: latest spot price from the CoinGecko simple price API.
//!
//! Fetch failures never propagate: a missing price just skips that cycle.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use zapline_core::config::PriceFeedConfig;
use zapline_core::error::Result;
use zapline_core::types::PriceSample;

/// Source of spot prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest price for `symbol`, or `None` when the feed is unavailable.
    async fn latest(&self, symbol: &str) -> Option<PriceSample>;
}

/// Map a ticker symbol to a CoinGecko asset id.
pub fn asset_id(symbol: &str) -> String {
    match symbol.to_ascii_uppercase().as_str() {
        "BTC" => "bitcoin".into(),
        "ETH" => "ethereum".into(),
        "SOL" => "solana".into(),
        "MATIC" => "matic-network".into(),
        "AVAX" => "avalanche-2".into(),
        "DOT" => "polkadot".into(),
        "LINK" => "chainlink".into(),
        _ => symbol.to_lowercase(),
    }
}

/// Pull `body[id][vs]` out of a simple price response.
pub fn extract_price(body: &Value, id: &str, vs_currency: &str) -> Option<f64> {
    body.get(id)?
        .get(vs_currency)?
        .as_f64()
        .filter(|p| p.is_finite())
}

pub struct CoinGeckoFeed {
    client: reqwest::Client,
    api_base: String,
    vs_currency: String,
}

impl CoinGeckoFeed {
    pub fn new(config: &PriceFeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            vs_currency: config.vs_currency.to_lowercase(),
        })
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn latest(&self, symbol: &str) -> Option<PriceSample> {
        let id = asset_id(symbol);
        let resp = match self
            .client
            .get(format!("{}/simple/price", self.api_base))
            .query(&[("ids", id.as_str()), ("vs_currencies", self.vs_currency.as_str())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("💱 Price fetch for {symbol} failed: {e}");
                return None;
            }
        };

        if !resp.status().is_success() {
            tracing::warn!("💱 Price feed returned {} for {symbol}", resp.status());
            return None;
        }

        let body: Value = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("💱 Invalid price response for {symbol}: {e}");
                return None;
            }
        };

        let Some(price) = extract_price(&body, &id, &self.vs_currency) else {
            tracing::warn!("💱 No {} price for {symbol} ({id})", self.vs_currency);
            return None;
        };

        Some(PriceSample {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
        })
    }
}
