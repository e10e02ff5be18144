//! OKX historical market data.
//!
//! The history-candles endpoint pages backward in fixed 100-candle
//! chunks and enforces a minimum spacing between calls; a non-zero
//! envelope code is a hard error that aborts the whole fetch.

use crate::domain::candle::{Candle, Venue, sort_and_dedup, truncate_to_minute};
use crate::domain::errors::MarketDataError;
use crate::domain::ports::VenueDataService;
use crate::infrastructure::http_client_factory::{HttpClientFactory, build_url_with_query};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::debug;

const PAGE_MINUTES: i64 = 100;
const MIN_REQUEST_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

pub struct OkxMarketDataService {
    client: ClientWithMiddleware,
    base_url: String,
}

impl OkxMarketDataService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
        }
    }

    async fn fetch_page(
        &self,
        instrument: &str,
        page_start: DateTime<Utc>,
        page_end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v5/market/history-candles", self.base_url);

        // The endpoint returns candles strictly between `before` and
        // `after`, newest first; one-second margins make the page
        // boundaries inclusive.
        let after = (page_end + Duration::seconds(1)).timestamp_millis().to_string();
        let before = (page_start - Duration::seconds(1)).timestamp_millis().to_string();

        let url_with_query = build_url_with_query(
            &url,
            &[
                ("instId", instrument),
                ("bar", "1m"),
                ("limit", "100"),
                ("after", &after),
                ("before", &before),
            ],
        );

        let response = self
            .client
            .get(&url_with_query)
            .send()
            .await
            .context("Failed to fetch history-candles from OKX")?;

        #[derive(Debug, Deserialize)]
        struct HistoryCandles {
            code: String,
            msg: String,
            data: Vec<Vec<String>>,
        }

        let payload: HistoryCandles = response
            .json()
            .await
            .context("Failed to parse OKX history-candles response")?;

        if payload.code != "0" {
            return Err(MarketDataError::VenueApi {
                code: payload.code,
                msg: payload.msg,
            }
            .into());
        }

        let mut candles = Vec::with_capacity(payload.data.len());
        for row in payload.data {
            candles.push(candle_from_row(instrument, &row)?);
        }
        Ok(candles)
    }
}

#[async_trait]
impl VenueDataService for OkxMarketDataService {
    fn venue(&self) -> Venue {
        Venue::Okx
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

        let mut out = Vec::new();
        let mut not_before = tokio::time::Instant::now();
        let mut page_start = start;

        while page_start <= end {
            let page_end = (page_start + Duration::minutes(PAGE_MINUTES - 1)).min(end);

            tokio::time::sleep_until(not_before).await;
            not_before = tokio::time::Instant::now() + MIN_REQUEST_INTERVAL;

            let mut page = self.fetch_page(instrument, page_start, page_end).await?;
            debug!(
                "OkxMarketDataService: fetched {} candles for {} [{} - {}]",
                page.len(),
                instrument,
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

/// Parse one `[ts, o, h, l, c, vol, ...]` row of string fields.
fn candle_from_row(instrument: &str, row: &[String]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(MarketDataError::InvalidPayload {
            reason: format!("candle row has {} fields, expected at least 6", row.len()),
        }
        .into());
    }

    let millis: i64 = row[0].parse().map_err(|_| MarketDataError::InvalidPayload {
        reason: format!("bad timestamp: {}", row[0]),
    })?;
    let timestamp = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| MarketDataError::InvalidPayload {
            reason: format!("out-of-range timestamp: {}", millis),
        })?;

    let field = |i: usize| -> Result<f64, MarketDataError> {
        row[i].parse().map_err(|_| MarketDataError::InvalidPayload {
            reason: format!("bad numeric field: {}", row[i]),
        })
    };

    Ok(Candle {
        timestamp: truncate_to_minute(timestamp),
        instrument: instrument.to_string(),
        venue: Venue::Okx,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}
