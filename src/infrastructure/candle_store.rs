//! Persistent candle cache with gap-filling fetch pipeline.
//!
//! Reads go to the repository first; any missing minute ranges are
//! dispatched to the owning venue's single serial worker, so each venue's
//! rate limit is respected while venues proceed concurrently. Fetched
//! candles are written through the repository before they are returned.

use crate::domain::candle::{Candle, Venue, sort_and_dedup, truncate_to_minute};
use crate::domain::errors::MarketDataError;
use crate::domain::ports::VenueDataService;
use crate::domain::repositories::CandleRepository;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

const FETCH_QUEUE_DEPTH: usize = 100;

struct FetchJob {
    instrument: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    /// Shared flag for the whole `get_candles` call; set on first failure
    /// so queued sibling jobs are skipped instead of fetched.
    cancelled: Arc<AtomicBool>,
    reply: oneshot::Sender<Result<Vec<Candle>>>,
}

pub struct CandleStore {
    repository: Arc<dyn CandleRepository>,
    workers: HashMap<Venue, mpsc::Sender<FetchJob>>,
}

impl CandleStore {
    /// Spawns one long-lived fetch worker per registered venue.
    pub fn new(
        repository: Arc<dyn CandleRepository>,
        venues: Vec<Arc<dyn VenueDataService>>,
    ) -> Self {
        let mut workers = HashMap::new();
        for service in venues {
            let (tx, rx) = mpsc::channel(FETCH_QUEUE_DEPTH);
            workers.insert(service.venue(), tx);
            tokio::spawn(venue_worker(service, repository.clone(), rx));
        }

        Self { repository, workers }
    }

    /// Ordered, deduplicated candles covering `[start, end]` inclusive,
    /// one per whole minute, fetching only the minutes the cache lacks.
    ///
    /// A fully-cached range performs zero venue calls. The first fetch or
    /// cache-write failure aborts this call and propagates; candles cached
    /// by earlier jobs remain valid.
    pub async fn get_candles(
        &self,
        instrument: &str,
        venue: Venue,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let start = truncate_to_minute(start);
        let end = truncate_to_minute(end);
        if start > end {
            return Ok(Vec::new());
        }

        let mut candles = self
            .repository
            .get_range(instrument, venue, start, end)
            .await
            .context("Failed to read candle cache")?;
        sort_and_dedup(&mut candles);

        let gaps = missing_intervals(&candles, start, end);
        if gaps.is_empty() {
            return Ok(candles);
        }

        debug!(
            "CandleStore: {} missing interval(s) for {} on {} in [{}, {}]",
            gaps.len(),
            instrument,
            venue,
            start,
            end
        );

        let worker = self.workers.get(&venue).ok_or_else(|| {
            MarketDataError::WorkerUnavailable {
                venue: venue.to_string(),
            }
        })?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut replies = Vec::with_capacity(gaps.len());
        for (gap_start, gap_end) in gaps {
            let (tx, rx) = oneshot::channel();
            worker
                .send(FetchJob {
                    instrument: instrument.to_string(),
                    start: gap_start,
                    end: gap_end,
                    cancelled: cancelled.clone(),
                    reply: tx,
                })
                .await
                .map_err(|_| MarketDataError::WorkerUnavailable {
                    venue: venue.to_string(),
                })?;
            replies.push(rx);
        }

        for reply in replies {
            match reply.await {
                Ok(Ok(mut fetched)) => candles.append(&mut fetched),
                Ok(Err(e)) => {
                    cancelled.store(true, Ordering::Relaxed);
                    return Err(e);
                }
                Err(_) => {
                    cancelled.store(true, Ordering::Relaxed);
                    return Err(MarketDataError::Cancelled.into());
                }
            }
        }

        candles.retain(|c| c.timestamp >= start && c.timestamp <= end);
        sort_and_dedup(&mut candles);
        Ok(candles)
    }
}

/// Serial fetch loop for one venue. Spaces job starts by the venue's
/// minimum request interval and writes fetched candles through the
/// repository before replying.
async fn venue_worker(
    service: Arc<dyn VenueDataService>,
    repository: Arc<dyn CandleRepository>,
    mut rx: mpsc::Receiver<FetchJob>,
) {
    let venue = service.venue();
    let spacing = service.min_request_interval();
    let mut not_before = Instant::now();

    while let Some(job) = rx.recv().await {
        if job.cancelled.load(Ordering::Relaxed) {
            let _ = job.reply.send(Err(MarketDataError::Cancelled.into()));
            continue;
        }

        tokio::time::sleep_until(not_before).await;
        not_before = Instant::now() + spacing;

        let result = fetch_and_cache(&*service, &*repository, &job).await;
        if let Err(e) = &result {
            warn!("{} fetch worker: {:#}", venue, e);
        }
        let _ = job.reply.send(result);
    }
}

async fn fetch_and_cache(
    service: &dyn VenueDataService,
    repository: &dyn CandleRepository,
    job: &FetchJob,
) -> Result<Vec<Candle>> {
    let candles = service
        .fetch_range(&job.instrument, job.start, job.end)
        .await?;

    repository
        .insert_batch(&candles)
        .await
        .context("Failed to cache fetched candles")?;

    Ok(candles)
}

/// Whole-minute sub-intervals of `[start, end]` not covered by `cached`.
///
/// `cached` must be sorted and deduplicated. Walks consecutive 1-minute
/// deltas; any gap or boundary shortfall opens a missing-interval record
/// with inclusive bounds.
pub fn missing_intervals(
    cached: &[Candle],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let minute = Duration::minutes(1);
    let mut intervals = Vec::new();
    let mut previous = start - minute;

    for candle in cached {
        if candle.timestamp == previous + minute {
            previous = candle.timestamp;
        } else if candle.timestamp > end {
            break;
        } else if candle.timestamp > previous {
            intervals.push((previous + minute, candle.timestamp - minute));
            previous = candle.timestamp;
        }
    }

    if previous < end {
        intervals.push((previous + minute, end));
    }

    intervals
}
