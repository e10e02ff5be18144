//! Repository abstractions for the candle cache.
//!
//! The cache is a permanent key-value mapping `(instrument, venue,
//! minute) -> candle` with idempotent inserts. The SQLite implementation
//! backs production; the in-memory one backs tests.

use crate::domain::candle::{Candle, Venue};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Candles for `[start, end]` inclusive, ordered by timestamp.
    async fn get_range(
        &self,
        instrument: &str,
        venue: Venue,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Insert candles, ignoring keys that are already present.
    async fn insert_batch(&self, candles: &[Candle]) -> Result<()>;
}
