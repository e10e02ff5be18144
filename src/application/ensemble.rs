//! Rotating ensemble of staggered-timestamp models.
//!
//! A fixed-capacity ring of `{model, timestamp}` entries spaced
//! `frequency` apart. The oldest generation trains synchronously before
//! the ensemble starts serving; the rest backfill in a background task
//! that then retrains one model per period forever, appending the new
//! model and evicting the single oldest. Prediction takes a snapshot of
//! the ring under the mutex, releases it, and runs a weighted vote over
//! one shared feature vector.

use crate::application::model::Model;
use crate::domain::candle::{Venue, truncate_to_minute};
use crate::domain::signal::{Signal, SignalVotes};
use crate::domain::strategy::StrategyParams;
use crate::infrastructure::candle_store::CandleStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

struct EnsembleEntry {
    model: Arc<Model>,
    timestamp: DateTime<Utc>,
}

pub struct Ensemble {
    store: Arc<CandleStore>,
    venue: Venue,
    params: StrategyParams,
    frequency: Duration,
    capacity: usize,
    entries: Mutex<VecDeque<EnsembleEntry>>,
}

/// Vote weight of one member, from its mean backtest risk ratios.
pub fn model_weight(model: &Model) -> f64 {
    let sharpe = model.metrics.backtest.mean.sharpe_ratio;
    let sortino = model.metrics.backtest.mean.sortino_ratio;
    6.0 * ((sharpe / 3.0).tanh() + 1.0) + 12.0 * ((sortino / 3.0).tanh() + 1.0)
}

impl Ensemble {
    /// An empty ensemble. Use [`Ensemble::spawn`] in production; this
    /// constructor exists so tooling and tests can drive the ring
    /// directly with pre-built models.
    pub fn new(
        store: Arc<CandleStore>,
        venue: Venue,
        params: StrategyParams,
        frequency: Duration,
        capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            venue,
            params,
            frequency,
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        })
    }

    /// Build an ensemble of `capacity` generations ending at "now".
    ///
    /// The oldest generation trains synchronously so at least one model
    /// exists before serving; remaining generations and the perpetual
    /// retrain loop run in a background task.
    pub async fn spawn(
        store: Arc<CandleStore>,
        venue: Venue,
        params: StrategyParams,
        frequency: Duration,
        capacity: usize,
    ) -> Result<Arc<Self>> {
        let ensemble = Self::new(store, venue, params, frequency, capacity);
        let now = truncate_to_minute(Utc::now());
        let capacity = ensemble.capacity;

        info!(
            "creating ensemble with {} active generations spaced {}m apart",
            capacity,
            frequency.num_minutes()
        );

        let oldest = now - ensemble.frequency * (capacity as i32 - 1);
        info!("training model: generation 1/{}", capacity);
        let model = ensemble
            .train_member(oldest)
            .await
            .context("Failed to train the seed ensemble model")?;
        ensemble.push(Arc::new(model), oldest);

        let background = ensemble.clone();
        tokio::spawn(async move {
            background.backfill_and_retrain(now).await;
        });

        Ok(ensemble)
    }

    async fn train_member(&self, timestamp: DateTime<Utc>) -> Result<Model> {
        let from = timestamp - Duration::days(self.params.train_days);
        let mut model =
            Model::train(&self.store, self.venue, self.params.clone(), from, timestamp).await?;
        model.deep_backtest(&self.store, timestamp).await?;
        Ok(model)
    }

    /// Backfill the remaining historical generations, then retrain one
    /// model per period forever.
    async fn backfill_and_retrain(self: Arc<Self>, start: DateTime<Utc>) {
        for generation in 1..self.capacity {
            let timestamp = start - self.frequency * (self.capacity as i32 - 1 - generation as i32);
            info!("training model: generation {}/{}", generation + 1, self.capacity);
            match self.train_member(timestamp).await {
                Ok(model) => self.push(Arc::new(model), timestamp),
                Err(e) => warn!("ensemble backfill generation failed: {:#}", e),
            }
        }

        let mut generation = self.capacity;
        let mut next = start;
        loop {
            next += self.frequency;
            let wait = next - Utc::now();
            if wait > Duration::zero() {
                tokio::time::sleep(wait.to_std().unwrap_or_default()).await;
            }

            generation += 1;
            info!("training model: generation {}", generation);
            match self.train_member(next).await {
                Ok(model) => self.push(Arc::new(model), next),
                Err(e) => warn!("ensemble retrain failed: {:#}", e),
            }
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, VecDeque<EnsembleEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a model and evict the oldest entries beyond capacity.
    pub fn push(&self, model: Arc<Model>, timestamp: DateTime<Utc>) {
        let mut entries = self.lock_entries();
        entries.push_back(EnsembleEntry { model, timestamp });
        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                info!(
                    "evicted model with timestamp {}, {} generations running",
                    evicted.timestamp,
                    entries.len()
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.lock_entries().front().map(|e| e.timestamp)
    }

    fn snapshot(&self) -> Vec<Arc<Model>> {
        self.lock_entries().iter().map(|e| e.model.clone()).collect()
    }

    /// Weighted-majority prediction for `now`.
    ///
    /// Every member scores the same feature vector; votes are weighted by
    /// [`model_weight`] and resolved against `min_trade_probability`.
    pub async fn predict(&self, now: DateTime<Utc>) -> Result<(Signal, SignalVotes)> {
        let models = self.snapshot();
        anyhow::ensure!(!models.is_empty(), "ensemble has no trained models");

        let feature = models[0].latest_feature(&self.store, now).await?;

        let mut votes = SignalVotes::new();
        for model in &models {
            let probabilities = model.predict(&feature)?;
            let weight = model_weight(model);
            for class in 0..Signal::COUNT {
                votes.vote(Signal::from_index(class), probabilities[class] * weight);
            }
        }

        Ok((votes.decide(self.params.min_trade_probability), votes))
    }
}
