//! A trained model: classifier + the strategy params it was trained
//! under, with confusion-matrix metrics from a held-out split and deep
//! backtest metrics filled in by the evaluator.

use crate::application::backtest::{BacktestWindow, run_backtest, sample_backtest_windows};
use crate::application::features::FeaturePipeline;
use crate::application::predictor::{ForestClassifier, SignalClassifier, argmax};
use crate::domain::candle::{Venue, truncate_to_minute};
use crate::domain::errors::ModelError;
use crate::domain::metrics::{BacktestMetrics, DeepBacktestMetrics, ModelMetrics};
use crate::domain::signal::Signal;
use crate::domain::strategy::StrategyParams;
use crate::infrastructure::candle_store::CandleStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Extra warm-up minutes fetched beyond the feature window when building
/// a single prediction feature.
const PREDICTION_WARMUP_MINUTES: i64 = 90;

/// Probability vector -> decision: a direction wins only when its
/// probability clears `min_trade_probability` while the opposing
/// direction stays below it.
pub fn threshold_signal(probabilities: &[f64; Signal::COUNT], min_trade_probability: f64) -> Signal {
    let long = probabilities[Signal::Long.index()];
    let short = probabilities[Signal::Short.index()];

    if long >= min_trade_probability && short < min_trade_probability {
        Signal::Long
    } else if short >= min_trade_probability && long < min_trade_probability {
        Signal::Short
    } else {
        Signal::Hold
    }
}

pub struct Model {
    classifier: Box<dyn SignalClassifier>,
    pipeline: FeaturePipeline,
    pub instrument: String,
    pub venue: Venue,
    pub metrics: ModelMetrics,
}

impl Model {
    /// Train a classifier on `[from, to]`: fetch candles, build the
    /// balanced training set, fit on the first 80%, and measure the
    /// confusion matrix on the held-out 20%.
    pub async fn train(
        store: &CandleStore,
        venue: Venue,
        params: StrategyParams,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Model> {
        let from = truncate_to_minute(from);
        let to = truncate_to_minute(to);
        let instrument = params.instrument.clone();

        let candles = store
            .get_candles(&instrument, venue, from, to)
            .await
            .context("Failed to fetch training candles")?;

        if candles.is_empty() {
            return Err(ModelError::NoData.into());
        }
        let required = params.required_candles();
        if candles.len() < required {
            return Err(ModelError::InsufficientData {
                required,
                got: candles.len(),
            }
            .into());
        }

        let pipeline = FeaturePipeline::new(params);
        let mut rng = rand::rng();
        let (features, labels) = pipeline.training_set(&candles, &mut rng)?;

        let count_training = (features.len() as f64 * 0.8) as usize;
        if count_training == 0 || count_training == features.len() {
            return Err(ModelError::InsufficientData {
                required,
                got: candles.len(),
            }
            .into());
        }

        let classifier = ForestClassifier::train(
            &features[..count_training],
            &labels[..count_training],
            pipeline.params(),
        )?;

        let testing_features = &features[count_training..];
        let testing_labels = &labels[count_training..];

        let mut confusion = [[0usize; Signal::COUNT]; Signal::COUNT];
        for (feature, actual) in testing_features.iter().zip(testing_labels.iter()) {
            match classifier.predict(feature) {
                Ok(probabilities) => {
                    let predicted = argmax(&probabilities);
                    confusion[actual.index()][predicted] += 1;
                }
                Err(e) => {
                    warn!("prediction error while testing: {}", e);
                }
            }
        }
        let metrics = ModelMetrics::from_confusion(confusion, testing_features.len());

        debug!(
            "trained model for {} on {} candles, accuracy {:.2}%",
            instrument,
            candles.len(),
            metrics.accuracy
        );

        Ok(Model {
            classifier: Box::new(classifier),
            pipeline,
            instrument,
            venue,
            metrics,
        })
    }

    /// Assemble a model from pre-built parts. Lets tests and tooling
    /// drive the ensemble and backtester with scripted classifiers.
    pub fn from_parts(
        classifier: Box<dyn SignalClassifier>,
        venue: Venue,
        params: StrategyParams,
        metrics: ModelMetrics,
    ) -> Model {
        let instrument = params.instrument.clone();
        Model {
            classifier,
            pipeline: FeaturePipeline::new(params),
            instrument,
            venue,
            metrics,
        }
    }

    pub fn params(&self) -> &StrategyParams {
        self.pipeline.params()
    }

    pub fn predict(&self, feature: &[f64]) -> Result<[f64; Signal::COUNT], ModelError> {
        self.classifier.predict(feature)
    }

    /// Run one paper-trading window against this model's predictions.
    pub async fn backtest(
        &self,
        store: &CandleStore,
        window: &BacktestWindow,
    ) -> Result<BacktestMetrics> {
        let params = self.pipeline.params();
        let warmup_start = window.start - Duration::minutes(params.window_size as i64);

        let candles = store
            .get_candles(&self.instrument, self.venue, warmup_start, window.end)
            .await
            .context("Failed to fetch backtest candles")?;

        let features = self.pipeline.prediction_features(&candles)?;
        let min_trade_probability = params.min_trade_probability;
        let window_size = params.window_size;

        let metrics = run_backtest(&candles, params, window.days(), |i, _| {
            match self.predict(&features[i - window_size]) {
                Ok(probabilities) => threshold_signal(&probabilities, min_trade_probability),
                Err(e) => {
                    warn!("prediction error: {}", e);
                    Signal::Hold
                }
            }
        });

        Ok(metrics)
    }

    /// Backtest across the stratified historical windows and attach the
    /// aggregate to this model's metrics.
    pub async fn deep_backtest(
        &mut self,
        store: &CandleStore,
        now: DateTime<Utc>,
    ) -> Result<DeepBacktestMetrics> {
        let now = truncate_to_minute(now);
        let windows = {
            let mut rng = rand::rng();
            sample_backtest_windows(now, &mut rng)
        };

        let mut results = Vec::with_capacity(windows.len());
        for window in &windows {
            results.push(self.backtest(store, window).await?);
        }

        let deep = DeepBacktestMetrics::aggregate(&results);
        self.metrics.backtest = deep;
        Ok(deep)
    }

    /// Feature vector for "now", shared across ensemble members.
    pub async fn latest_feature(
        &self,
        store: &CandleStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        let params = self.pipeline.params();
        let now = truncate_to_minute(now);
        let from = now - Duration::minutes(params.window_size as i64 + PREDICTION_WARMUP_MINUTES);

        let candles = store
            .get_candles(&self.instrument, self.venue, from, now)
            .await
            .context("Failed to fetch prediction candles")?;

        let mut features = self.pipeline.prediction_features(&candles)?;
        features
            .pop()
            .ok_or_else(|| ModelError::NoData.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_signal() {
        assert_eq!(threshold_signal(&[0.1, 0.7, 0.2], 0.5), Signal::Long);
        assert_eq!(threshold_signal(&[0.1, 0.2, 0.7], 0.5), Signal::Short);
        assert_eq!(threshold_signal(&[0.8, 0.1, 0.1], 0.5), Signal::Hold);
        // Both directions confident -> Hold
        assert_eq!(threshold_signal(&[0.0, 0.5, 0.5], 0.5), Signal::Hold);
    }
}
