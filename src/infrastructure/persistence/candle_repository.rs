use crate::domain::candle::{Candle, Venue};
use crate::domain::repositories::CandleRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// SQLite-backed candle cache.
pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn get_range(
        &self,
        instrument: &str,
        venue: Venue,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, open, high, low, close, volume
            FROM candles
            WHERE instrument = ? AND venue = ? AND timestamp BETWEEN ? AND ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(instrument)
        .bind(venue.to_string())
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query cached candles")?;

        let candles = rows
            .into_iter()
            .filter_map(|row| {
                let secs: i64 = row.get("timestamp");
                let timestamp = Utc.timestamp_opt(secs, 0).single()?;
                Some(Candle {
                    timestamp,
                    instrument: instrument.to_string(),
                    venue,
                    open: row.get("open"),
                    high: row.get("high"),
                    low: row.get("low"),
                    close: row.get("close"),
                    volume: row.get("volume"),
                })
            })
            .collect();

        Ok(candles)
    }

    async fn insert_batch(&self, candles: &[Candle]) -> Result<()> {
        if candles.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin candle insert transaction")?;

        for candle in candles {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO candles
                    (instrument, venue, timestamp, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&candle.instrument)
            .bind(candle.venue.to_string())
            .bind(candle.timestamp.timestamp())
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .execute(&mut *tx)
            .await
            .context("Failed to store candle")?;
        }

        tx.commit()
            .await
            .context("Failed to commit candle insert transaction")?;

        Ok(())
    }
}

/// Thread-safe in-memory candle cache for tests and dry runs.
#[derive(Default)]
pub struct InMemoryCandleRepository {
    candles: Arc<RwLock<BTreeMap<(String, String, i64), Candle>>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.candles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.candles.read().await.is_empty()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn get_range(
        &self,
        instrument: &str,
        venue: Venue,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let lower = (instrument.to_string(), venue.to_string(), start.timestamp());
        let upper = (instrument.to_string(), venue.to_string(), end.timestamp());

        let candles = self
            .candles
            .read()
            .await
            .range(lower..=upper)
            .map(|(_, candle)| candle.clone())
            .collect();

        Ok(candles)
    }

    async fn insert_batch(&self, candles: &[Candle]) -> Result<()> {
        let mut map = self.candles.write().await;
        for candle in candles {
            let key = (
                candle.instrument.clone(),
                candle.venue.to_string(),
                candle.timestamp.timestamp(),
            );
            map.entry(key).or_insert_with(|| candle.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle_at(minute: i64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(minute * 60, 0).unwrap(),
            instrument: "DOGE-USDT-SWAP".to_string(),
            venue: Venue::Okx,
            open: 1.0,
            high: 1.1,
            low: 0.9,
            close: 1.05,
            volume: 10.0,
        }
    }

    #[tokio::test]
    async fn test_in_memory_round_trip_and_idempotence() {
        let repo = InMemoryCandleRepository::new();
        let candles: Vec<Candle> = (0..5).map(candle_at).collect();

        repo.insert_batch(&candles).await.unwrap();
        repo.insert_batch(&candles).await.unwrap();
        assert_eq!(repo.len().await, 5);

        let fetched = repo
            .get_range(
                "DOGE-USDT-SWAP",
                Venue::Okx,
                Utc.timestamp_opt(60, 0).unwrap(),
                Utc.timestamp_opt(180, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(fetched.len(), 3);
        assert!(fetched.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_sqlite_round_trip_and_idempotence() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE candles (
                instrument TEXT NOT NULL,
                venue TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (instrument, venue, timestamp)
            );
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let repo = SqliteCandleRepository::new(pool);
        let candles: Vec<Candle> = (0..10).map(candle_at).collect();

        repo.insert_batch(&candles).await.unwrap();
        // Idempotent re-insert of an overlapping batch
        repo.insert_batch(&candles[5..]).await.unwrap();

        let fetched = repo
            .get_range(
                "DOGE-USDT-SWAP",
                Venue::Okx,
                Utc.timestamp_opt(0, 0).unwrap(),
                Utc.timestamp_opt(600, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(fetched.len(), 10);
        assert_eq!(fetched[3].close, 1.05);
    }
}
