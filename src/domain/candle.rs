use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange a candle was sourced from. Each venue gets its own serial
/// fetch worker so one slow venue cannot stall the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Okx,
    Binance,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Okx => write!(f, "okx"),
            Venue::Binance => write!(f, "binance"),
        }
    }
}

impl FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "okx" => Ok(Venue::Okx),
            "binance" => Ok(Venue::Binance),
            _ => anyhow::bail!("Invalid venue: {}. Must be 'okx' or 'binance'", s),
        }
    }
}

/// One minute of OHLCV data for a single instrument on a single venue.
///
/// Unique key: `(instrument, venue, timestamp)`. Timestamps are
/// minute-aligned UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    pub venue: Venue,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Drop sub-minute precision. Candle math assumes whole minutes.
pub fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::minutes(1)).unwrap_or(t)
}

/// Sort by timestamp and collapse duplicate minutes. Fetch pages overlap
/// at their edges, so this runs after every merge of cached + fetched data.
pub fn sort_and_dedup(candles: &mut Vec<Candle>) {
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
}
