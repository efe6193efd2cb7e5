// =============================================================================
// CoinGecko Client — live price oracle and market-context summary
// =============================================================================
//
// Both traits are served from the same public endpoint:
//   GET /simple/price?ids=<id>&vs_currencies=usd
//       &include_market_cap=true&include_24hr_vol=true&include_24hr_change=true
//
// A missing asset entry or USD quote yields `Ok(None)` from the oracle and
// an error from the context provider; the pipeline maps both to its
// fallbacks (signal price, "unavailable").
// =============================================================================

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::{debug, instrument};

use super::{MarketContextProvider, PriceOracle};
use crate::asset_registry::Asset;

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// One asset's quote as returned by `/simple/price`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub change_24h_pct: Option<f64>,
}

impl MarketSnapshot {
    /// Extract `external_id`'s entry from a `/simple/price` body.
    pub fn from_body(body: &serde_json::Value, external_id: &str) -> Option<Self> {
        let entry = body.get(external_id)?;
        let price = entry.get("usd")?.as_f64().filter(|p| p.is_finite() && *p > 0.0)?;
        Some(Self {
            price,
            market_cap: entry.get("usd_market_cap").and_then(|v| v.as_f64()),
            volume_24h: entry.get("usd_24h_vol").and_then(|v| v.as_f64()),
            change_24h_pct: entry.get("usd_24h_change").and_then(|v| v.as_f64()),
        })
    }

    /// One-paragraph summary handed to the synthesizer and the notification.
    pub fn describe(&self, asset: &Asset) -> String {
        let mut parts = vec![format!("{} ${:.2}", asset.display_name, self.price)];
        if let Some(change) = self.change_24h_pct {
            parts.push(format!("24h change {change:+.2}%"));
        }
        if let Some(vol) = self.volume_24h {
            parts.push(format!("24h volume {}", compact_usd(vol)));
        }
        if let Some(cap) = self.market_cap {
            parts.push(format!("market cap {}", compact_usd(cap)));
        }
        parts.join(" | ")
    }
}

/// `$1.23B`, `$456.70M`, `$12.00K`, or plain dollars below a thousand.
fn compact_usd(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e12 {
        format!("${:.2}T", value / 1e12)
    } else if abs >= 1e9 {
        format!("${:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("${:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("${:.2}K", value / 1e3)
    } else {
        format!("${value:.2}")
    }
}

#[derive(Clone)]
pub struct CoinGeckoClient {
    base_url: String,
    client: reqwest::Client,
}

impl CoinGeckoClient {
    /// `api_key` is the optional demo-plan key; the public tier works without it.
    pub fn new(api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key).context("invalid CoinGecko API key")?;
            headers.insert("x-cg-demo-api-key", value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build CoinGecko http client")?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    /// GET /simple/price for a single asset.
    #[instrument(skip(self), name = "coingecko::snapshot", fields(id = asset.external_id))]
    pub async fn snapshot(&self, asset: &Asset) -> Result<Option<MarketSnapshot>> {
        let url = format!("{}/simple/price", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("ids", asset.external_id),
                ("vs_currencies", "usd"),
                ("include_market_cap", "true"),
                ("include_24hr_vol", "true"),
                ("include_24hr_change", "true"),
            ])
            .send()
            .await
            .context("GET /simple/price request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse /simple/price response")?;

        if !status.is_success() {
            bail!("CoinGecko /simple/price returned {}: {}", status, body);
        }

        let snapshot = MarketSnapshot::from_body(&body, asset.external_id);
        debug!(found = snapshot.is_some(), "market snapshot retrieved");
        Ok(snapshot)
    }
}

impl std::fmt::Debug for CoinGeckoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinGeckoClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoClient {
    async fn price(&self, asset: &Asset) -> Result<Option<f64>> {
        Ok(self.snapshot(asset).await?.map(|s| s.price))
    }
}

#[async_trait]
impl MarketContextProvider for CoinGeckoClient {
    async fn context(&self, asset: &Asset) -> Result<String> {
        match self.snapshot(asset).await? {
            Some(snapshot) => Ok(snapshot.describe(asset)),
            None => bail!("no CoinGecko quote for {}", asset.external_id),
        }
    }
}
