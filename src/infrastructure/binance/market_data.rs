//! Binance historical market data (klines).

use crate::domain::candle::{Candle, Venue, sort_and_dedup, truncate_to_minute};
use crate::domain::errors::MarketDataError;
use crate::domain::ports::VenueDataService;
use crate::infrastructure::http_client_factory::{HttpClientFactory, build_url_with_query};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest_middleware::ClientWithMiddleware;
use tracing::debug;

const PAGE_MINUTES: i64 = 1000;
const MIN_REQUEST_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

pub struct BinanceMarketDataService {
    client: ClientWithMiddleware,
    base_url: String,
}

impl BinanceMarketDataService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
        }
    }
}

/// Swap instrument id to Binance spot/perp symbol: "DOGE-USDT-SWAP" -> "DOGEUSDT".
fn to_binance_symbol(instrument: &str) -> String {
    instrument.trim_end_matches("-SWAP").replace('-', "")
}

#[async_trait]
impl VenueDataService for BinanceMarketDataService {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn min_request_interval(&self) -> std::time::Duration {
        MIN_REQUEST_INTERVAL
    }

    async fn fetch_range(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let start = truncate_to_minute(start);
        let end = truncate_to_minute(end);
        let symbol = to_binance_symbol(instrument);
        let url = format!("{}/api/v3/klines", self.base_url);

        let mut out = Vec::new();
        let mut not_before = tokio::time::Instant::now();
        let mut page_start = start;

        while page_start <= end {
            let page_end = (page_start + Duration::minutes(PAGE_MINUTES - 1)).min(end);

            tokio::time::sleep_until(not_before).await;
            not_before = tokio::time::Instant::now() + MIN_REQUEST_INTERVAL;

            let start_ms = page_start.timestamp_millis().to_string();
            let end_ms = (page_end + Duration::seconds(59)).timestamp_millis().to_string();
            let url_with_query = build_url_with_query(
                &url,
                &[
                    ("symbol", symbol.as_str()),
                    ("interval", "1m"),
                    ("startTime", &start_ms),
                    ("endTime", &end_ms),
                    ("limit", "1000"),
                ],
            );

            let response = self
                .client
                .get(&url_with_query)
                .send()
                .await
                .context("Failed to fetch klines from Binance")?;

            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(MarketDataError::VenueApi {
                    code: "http".to_string(),
                    msg: error_text,
                }
                .into());
            }

            // Klines format: [timestamp, open, high, low, close, volume, ...]
            let klines: Vec<serde_json::Value> = response
                .json()
                .await
                .context("Failed to parse Binance klines response")?;

            let mut page: Vec<Candle> = klines
                .iter()
                .filter_map(|k| {
                    let arr = k.as_array()?;
                    if arr.len() < 6 {
                        return None;
                    }
                    let millis = arr[0].as_i64()?;
                    let timestamp = Utc.timestamp_millis_opt(millis).single()?;
                    Some(Candle {
                        timestamp: truncate_to_minute(timestamp),
                        instrument: instrument.to_string(),
                        venue: Venue::Binance,
                        open: arr[1].as_str()?.parse().ok()?,
                        high: arr[2].as_str()?.parse().ok()?,
                        low: arr[3].as_str()?.parse().ok()?,
                        close: arr[4].as_str()?.parse().ok()?,
                        volume: arr[5].as_str()?.parse().ok()?,
                    })
                })
                .collect();

            debug!(
                "BinanceMarketDataService: fetched {} candles for {} [{} - {}]",
                page.len(),
                symbol,
                page_start,
                page_end
            );
            out.append(&mut page);

            page_start = page_end + Duration::minutes(1);
        }

        out.retain(|c| c.timestamp >= start && c.timestamp <= end);
        sort_and_dedup(&mut out);
        Ok(out)
    }
}
