//! Ensemble ring-buffer invariants and weighted-vote prediction.

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use tradewind::application::ensemble::{Ensemble, model_weight};
use tradewind::application::model::Model;
use tradewind::application::predictor::SignalClassifier;
use tradewind::domain::candle::{Candle, Venue};
use tradewind::domain::errors::ModelError;
use tradewind::domain::metrics::{BacktestMetrics, DeepBacktestMetrics, ModelMetrics};
use tradewind::domain::repositories::CandleRepository;
use tradewind::domain::signal::Signal;
use tradewind::domain::strategy::{Genome, Param, StrategyParams, TradeSettings};
use tradewind::infrastructure::candle_store::CandleStore;
use tradewind::infrastructure::persistence::InMemoryCandleRepository;

const INSTRUMENT: &str = "DOGE-USDT-SWAP";

/// Classifier that always returns a fixed probability vector.
struct FixedClassifier([f64; Signal::COUNT]);

impl SignalClassifier for FixedClassifier {
    fn predict(&self, _feature: &[f64]) -> Result<[f64; Signal::COUNT], ModelError> {
        Ok(self.0)
    }
}

fn minute(m: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(m * 60, 0).unwrap()
}

fn small_params() -> StrategyParams {
    let mut genome = Genome::new(INSTRUMENT);
    genome.set(Param::WindowSize, 50.0);
    genome.set(Param::MinTradeProbability, 0.5);
    genome.params(&TradeSettings::default())
}

fn metrics_with_ratios(sharpe: f64, sortino: f64) -> ModelMetrics {
    ModelMetrics {
        backtest: DeepBacktestMetrics {
            mean: BacktestMetrics {
                sharpe_ratio: sharpe,
                sortino_ratio: sortino,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

fn fixed_model(probabilities: [f64; 3], sharpe: f64, sortino: f64) -> Arc<Model> {
    Arc::new(Model::from_parts(
        Box::new(FixedClassifier(probabilities)),
        Venue::Okx,
        small_params(),
        metrics_with_ratios(sharpe, sortino),
    ))
}

async fn preloaded_store(last_minute: i64) -> Arc<CandleStore> {
    let repository = Arc::new(InMemoryCandleRepository::new());
    let candles: Vec<Candle> = (0..=last_minute)
        .map(|m| {
            let price = 1.0 + 0.01 * ((m as f64) / 20.0).sin();
            Candle {
                timestamp: minute(m),
                instrument: INSTRUMENT.to_string(),
                venue: Venue::Okx,
                open: price,
                high: price * 1.002,
                low: price * 0.998,
                close: price,
                volume: 100.0,
            }
        })
        .collect();
    repository.insert_batch(&candles).await.unwrap();
    Arc::new(CandleStore::new(repository, vec![]))
}

#[tokio::test]
async fn test_ring_buffer_capacity_and_eviction_order() {
    let store = preloaded_store(200).await;
    let ensemble = Ensemble::new(store, Venue::Okx, small_params(), Duration::hours(1), 3);

    let mut previous_oldest = None;
    for i in 0..5 {
        ensemble.push(fixed_model([1.0, 0.0, 0.0], 0.0, 0.0), minute(i * 60));

        assert!(ensemble.len() <= ensemble.capacity());

        // Oldest remaining timestamp never moves backwards.
        let oldest = ensemble.oldest_timestamp().unwrap();
        if let Some(previous) = previous_oldest {
            assert!(oldest >= previous);
        }
        previous_oldest = Some(oldest);
    }

    assert_eq!(ensemble.len(), 3);
    assert_eq!(ensemble.oldest_timestamp().unwrap(), minute(2 * 60));
}

#[tokio::test]
async fn test_weighted_vote_prefers_stronger_model() {
    let store = preloaded_store(400).await;
    let ensemble = Ensemble::new(store, Venue::Okx, small_params(), Duration::hours(1), 4);

    // A confident long voter with strong risk ratios outweighs a short
    // voter with neutral ratios.
    let long_model = fixed_model([0.0, 1.0, 0.0], 3.0, 3.0);
    let short_model = fixed_model([0.0, 0.0, 1.0], 0.0, 0.0);
    assert!(model_weight(&long_model) > model_weight(&short_model));

    ensemble.push(long_model, minute(100));
    ensemble.push(short_model, minute(160));

    let (signal, votes) = ensemble.predict(minute(400)).await.unwrap();
    assert_eq!(signal, Signal::Long);
    assert!(votes.get(Signal::Long) > votes.get(Signal::Short));
}

#[tokio::test]
async fn test_split_vote_holds() {
    let store = preloaded_store(400).await;
    let ensemble = Ensemble::new(store, Venue::Okx, small_params(), Duration::hours(1), 4);

    // Two equally weighted, opposing voters: neither clears the
    // threshold alone, so the ensemble holds.
    ensemble.push(fixed_model([0.0, 1.0, 0.0], 1.0, 1.0), minute(100));
    ensemble.push(fixed_model([0.0, 0.0, 1.0], 1.0, 1.0), minute(160));

    let (signal, _votes) = ensemble.predict(minute(400)).await.unwrap();
    assert_eq!(signal, Signal::Hold);
}

#[tokio::test]
async fn test_empty_ensemble_prediction_is_an_error() {
    let store = preloaded_store(200).await;
    let ensemble = Ensemble::new(store, Venue::Okx, small_params(), Duration::hours(1), 3);

    let err = ensemble.predict(minute(200)).await.unwrap_err();
    assert!(err.to_string().contains("no trained models"));
}
