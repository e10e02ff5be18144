//! Service abstractions at the infrastructure boundary.

use crate::domain::candle::{Candle, Venue};
use crate::domain::trade::{OrderDetails, OrderRequest, Position, PositionSide};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Historical market data source for one venue.
///
/// Implementations own their pagination and honor the venue's rate
/// limit between pages; the candle store additionally serializes jobs
/// per venue through a single worker.
#[async_trait]
pub trait VenueDataService: Send + Sync {
    fn venue(&self) -> Venue;

    /// Minimum spacing between outbound calls for this venue.
    fn min_request_interval(&self) -> Duration;

    /// Fetch 1-minute candles covering `[start, end]` inclusive, sorted
    /// and deduplicated. A non-zero venue response code is a hard error.
    async fn fetch_range(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

/// Order placement and account state on the live venue.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn current_price(&self, instrument: &str) -> Result<f64>;

    /// USDT equity of the trading account.
    async fn equity(&self) -> Result<f64>;

    async fn positions(&self, instrument: &str) -> Result<Vec<Position>>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderDetails>;

    async fn close_position(
        &self,
        instrument: &str,
        margin_mode: &str,
        side: PositionSide,
    ) -> Result<()>;
}
