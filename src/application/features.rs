//! Candle window -> normalized feature vectors, plus look-ahead labels
//! for training.
//!
//! Indicator series are computed with streaming `ta` indicators over the
//! whole candle slice, then each value is min-max normalized against its
//! trailing `window_size` slice so every feature lands in [0, 1].

use crate::domain::candle::Candle;
use crate::domain::errors::ModelError;
use crate::domain::signal::Signal;
use crate::domain::strategy::StrategyParams;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use ta::indicators::{
    AverageTrueRange, ExponentialMovingAverage, FastStochastic, MeanAbsoluteDeviation,
    MoneyFlowIndex, MovingAverageConvergenceDivergence, OnBalanceVolume, RateOfChange,
    RelativeStrengthIndex, SimpleMovingAverage, SlowStochastic,
};
use ta::{DataItem, Next};

pub struct FeaturePipeline {
    params: StrategyParams,
}

/// Pre-computed indicator values, one entry per candle.
struct IndicatorSeries {
    closes: Vec<f64>,
    volumes: Vec<f64>,
    short_ma: Vec<f64>,
    long_ma: Vec<f64>,
    volume_ma: Vec<f64>,
    rsi_long: Vec<f64>,
    rsi_short: Vec<f64>,
    macd_line: Vec<f64>,
    macd_signal: Vec<f64>,
    fast_macd_line: Vec<f64>,
    fast_macd_signal: Vec<f64>,
    bb_middle: Vec<f64>,
    bb_upper: Vec<f64>,
    bb_lower: Vec<f64>,
    stoch_k: Vec<f64>,
    stoch_d: Vec<f64>,
    atr_slow: Vec<f64>,
    atr_fast: Vec<f64>,
    obv: Vec<f64>,
    obv_ema: Vec<f64>,
    mfi: Vec<f64>,
    roc: Vec<f64>,
    cci: Vec<f64>,
    williams_r: Vec<f64>,
    price_change_fast: Vec<f64>,
    price_change_medium: Vec<f64>,
    price_change_slow: Vec<f64>,
}

/// Min-max normalize `value` against a trailing window, clamped to [0, 1].
/// Degenerate windows (all equal) map to the midpoint.
pub fn normalize_value(value: f64, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut min = values[0];
    let mut max = values[0];
    for v in values {
        min = min.min(*v);
        max = max.max(*v);
    }

    if max > min {
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Normalize against an explicit [min, max] range.
fn normalize_range(value: f64, min: f64, max: f64) -> f64 {
    if max > min {
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Fractional change from the first to the last element.
fn momentum(closes: &[f64]) -> f64 {
    match (closes.first(), closes.last()) {
        (Some(first), Some(last)) if *first != 0.0 => (last - first) / first,
        _ => 0.0,
    }
}

fn indicator_err(e: ta::errors::TaError) -> ModelError {
    ModelError::Indicator(e.to_string())
}

impl FeaturePipeline {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    fn series(&self, candles: &[Candle]) -> Result<IndicatorSeries, ModelError> {
        let p = &self.params;
        let n = candles.len();

        let mut short_ma = SimpleMovingAverage::new(p.short_ma_length).map_err(indicator_err)?;
        let mut long_ma = SimpleMovingAverage::new(p.long_ma_length).map_err(indicator_err)?;
        let mut volume_ma = SimpleMovingAverage::new(p.volume_ma_length).map_err(indicator_err)?;
        let mut rsi_long =
            RelativeStrengthIndex::new(p.long_rsi_length).map_err(indicator_err)?;
        let mut rsi_short =
            RelativeStrengthIndex::new(p.short_rsi_length).map_err(indicator_err)?;
        let mut macd = MovingAverageConvergenceDivergence::new(
            p.macd_fast_length,
            p.macd_slow_length,
            p.macd_signal_window,
        )
        .map_err(indicator_err)?;
        let mut fast_macd = MovingAverageConvergenceDivergence::new(
            p.fast_macd_fast_length,
            p.fast_macd_slow_length,
            p.fast_macd_signal_window,
        )
        .map_err(indicator_err)?;
        let mut bollinger =
            ta::indicators::BollingerBands::new(p.bollinger_window, p.bollinger_multiplier)
                .map_err(indicator_err)?;
        let mut stoch_k = FastStochastic::new(p.stochastic_window).map_err(indicator_err)?;
        let mut stoch_d = SlowStochastic::new(p.stochastic_window, 3).map_err(indicator_err)?;
        let mut atr_slow = AverageTrueRange::new(p.slow_atr_period).map_err(indicator_err)?;
        let mut atr_fast = AverageTrueRange::new(p.fast_atr_period).map_err(indicator_err)?;
        let mut obv = OnBalanceVolume::new();
        let mut obv_ema = ExponentialMovingAverage::new(p.obv_ma_length).map_err(indicator_err)?;
        let mut mfi = MoneyFlowIndex::new(p.money_flow_index_period).map_err(indicator_err)?;
        let mut roc = RateOfChange::new(p.rate_of_change_period).map_err(indicator_err)?;
        let mut cci_ma = SimpleMovingAverage::new(p.cci_period).map_err(indicator_err)?;
        let mut cci_mad = MeanAbsoluteDeviation::new(p.cci_period).map_err(indicator_err)?;
        let mut williams = FastStochastic::new(p.williams_r_period).map_err(indicator_err)?;
        let mut pc_fast = RateOfChange::new(p.price_change_fast_period).map_err(indicator_err)?;
        let mut pc_medium =
            RateOfChange::new(p.price_change_medium_period).map_err(indicator_err)?;
        let mut pc_slow = RateOfChange::new(p.price_change_slow_period).map_err(indicator_err)?;

        let mut series = IndicatorSeries {
            closes: Vec::with_capacity(n),
            volumes: Vec::with_capacity(n),
            short_ma: Vec::with_capacity(n),
            long_ma: Vec::with_capacity(n),
            volume_ma: Vec::with_capacity(n),
            rsi_long: Vec::with_capacity(n),
            rsi_short: Vec::with_capacity(n),
            macd_line: Vec::with_capacity(n),
            macd_signal: Vec::with_capacity(n),
            fast_macd_line: Vec::with_capacity(n),
            fast_macd_signal: Vec::with_capacity(n),
            bb_middle: Vec::with_capacity(n),
            bb_upper: Vec::with_capacity(n),
            bb_lower: Vec::with_capacity(n),
            stoch_k: Vec::with_capacity(n),
            stoch_d: Vec::with_capacity(n),
            atr_slow: Vec::with_capacity(n),
            atr_fast: Vec::with_capacity(n),
            obv: Vec::with_capacity(n),
            obv_ema: Vec::with_capacity(n),
            mfi: Vec::with_capacity(n),
            roc: Vec::with_capacity(n),
            cci: Vec::with_capacity(n),
            williams_r: Vec::with_capacity(n),
            price_change_fast: Vec::with_capacity(n),
            price_change_medium: Vec::with_capacity(n),
            price_change_slow: Vec::with_capacity(n),
        };

        for candle in candles {
            let item = DataItem::builder()
                .open(candle.open)
                .high(candle.high)
                .low(candle.low)
                .close(candle.close)
                .volume(candle.volume)
                .build()
                .map_err(indicator_err)?;

            let close = candle.close;
            series.closes.push(close);
            series.volumes.push(candle.volume);
            series.short_ma.push(short_ma.next(close));
            series.long_ma.push(long_ma.next(close));
            series.volume_ma.push(volume_ma.next(candle.volume));
            series.rsi_long.push(rsi_long.next(close));
            series.rsi_short.push(rsi_short.next(close));

            let macd_out = macd.next(close);
            series.macd_line.push(macd_out.macd);
            series.macd_signal.push(macd_out.signal);
            let fast_out = fast_macd.next(close);
            series.fast_macd_line.push(fast_out.macd);
            series.fast_macd_signal.push(fast_out.signal);

            let bb = bollinger.next(close);
            series.bb_middle.push(bb.average);
            series.bb_upper.push(bb.upper);
            series.bb_lower.push(bb.lower);

            series.stoch_k.push(stoch_k.next(&item));
            series.stoch_d.push(stoch_d.next(&item));
            series.atr_slow.push(atr_slow.next(&item));
            series.atr_fast.push(atr_fast.next(&item));

            let obv_value = obv.next(&item);
            series.obv.push(obv_value);
            series.obv_ema.push(obv_ema.next(obv_value));
            series.mfi.push(mfi.next(&item));
            series.roc.push(roc.next(close));

            // CCI from typical price using SMA + mean absolute deviation
            let typical = (candle.high + candle.low + candle.close) / 3.0;
            let tp_ma = cci_ma.next(typical);
            let tp_mad = cci_mad.next(typical);
            let cci = if tp_mad > 1e-12 {
                (typical - tp_ma) / (0.015 * tp_mad)
            } else {
                0.0
            };
            series.cci.push(cci);

            // Williams %R is the fast %K shifted to [-100, 0]
            series.williams_r.push(williams.next(&item) - 100.0);

            series.price_change_fast.push(pc_fast.next(close));
            series.price_change_medium.push(pc_medium.next(close));
            series.price_change_slow.push(pc_slow.next(close));
        }

        Ok(series)
    }

    fn feature_row(&self, series: &IndicatorSeries, i: usize) -> Vec<f64> {
        let window = self.params.window_size;
        let slope_len = self.params.rsi_slope;
        let norm = |values: &Vec<f64>| normalize_value(values[i], &values[i - window..=i]);

        let rsi_slope = if i >= slope_len {
            (series.rsi_long[i] - series.rsi_long[i - slope_len]) / slope_len as f64
        } else {
            0.0
        };

        let bb_range = series.bb_upper[i] - series.bb_lower[i];
        let bb_position = if bb_range.abs() > 1e-12 {
            (series.closes[i] - series.bb_lower[i]) / bb_range
        } else {
            0.5
        };

        let velocity = momentum(&series.closes[i - 5..=i]);
        let acceleration = momentum(&series.closes[i - 5..=i]) - momentum(&series.closes[i - 10..=i - 5]);

        vec![
            norm(&series.closes),
            norm(&series.short_ma),
            norm(&series.long_ma),
            series.rsi_long[i] / 100.0,
            series.rsi_short[i] / 100.0,
            rsi_slope / 100.0,
            norm(&series.macd_line),
            norm(&series.macd_signal),
            norm(&series.fast_macd_line),
            norm(&series.fast_macd_signal),
            norm(&series.bb_middle),
            norm(&series.bb_upper),
            norm(&series.bb_lower),
            series.stoch_k[i] / 100.0,
            series.stoch_d[i] / 100.0,
            norm(&series.volumes),
            norm(&series.volume_ma),
            norm(&series.obv),
            norm(&series.obv_ema),
            norm(&series.mfi),
            norm(&series.roc),
            norm(&series.cci),
            norm(&series.williams_r),
            norm(&series.atr_slow),
            norm(&series.atr_fast),
            norm(&series.price_change_fast),
            norm(&series.price_change_medium),
            norm(&series.price_change_slow),
            bb_position.clamp(0.0, 1.0),
            normalize_range(velocity, -0.05, 0.05),
            normalize_range(acceleration, -0.01, 0.01),
        ]
    }

    /// One feature vector per candle index in `window_size..len`, for
    /// prediction-time use. Index `k` of the result corresponds to candle
    /// `window_size + k`.
    pub fn prediction_features(&self, candles: &[Candle]) -> Result<Vec<Vec<f64>>, ModelError> {
        let window = self.params.window_size;
        if candles.len() <= window {
            return Err(ModelError::InsufficientData {
                required: window + 1,
                got: candles.len(),
            });
        }

        let series = self.series(candles)?;
        Ok((window..candles.len())
            .map(|i| self.feature_row(&series, i))
            .collect())
    }

    /// Feature vectors plus look-ahead labels, class-balanced and
    /// shuffled, ready for the classifier.
    pub fn training_set<R: Rng + ?Sized>(
        &self,
        candles: &[Candle],
        rng: &mut R,
    ) -> Result<(Vec<Vec<f64>>, Vec<Signal>), ModelError> {
        let window = self.params.window_size;
        let lookahead = self.params.lookahead;
        if candles.len() <= window + lookahead {
            return Err(ModelError::InsufficientData {
                required: window + lookahead + 1,
                got: candles.len(),
            });
        }

        let series = self.series(candles)?;

        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in window..candles.len() - lookahead {
            features.push(self.feature_row(&series, i));
            labels.push(self.label(&series, candles, i));
        }

        let (features, labels) = balance_classes(features, labels, rng);
        Ok(shuffle_in_unison(features, labels, rng))
    }

    /// Look-ahead label: a move of at least `take_profit` in the next
    /// `lookahead` candles, confirmed by close drift, RSI position, RSI
    /// slope and MACD direction.
    fn label(&self, series: &IndicatorSeries, candles: &[Candle], i: usize) -> Signal {
        let p = &self.params;
        let base_price = candles[i].close;
        if base_price == 0.0 {
            return Signal::Hold;
        }

        let mut highest_high = base_price;
        let mut lowest_low = base_price;
        for j in 1..=p.lookahead {
            highest_high = highest_high.max(candles[i + j].high);
            lowest_low = lowest_low.min(candles[i + j].low);
        }

        let potential_gain = (highest_high - base_price) / base_price;
        let potential_loss = (base_price - lowest_low) / base_price;
        let actual_change = (candles[i + p.lookahead].close - base_price) / base_price;

        let rsi_slope = if i >= p.rsi_slope {
            (series.rsi_long[i] - series.rsi_long[i - p.rsi_slope]) / p.rsi_slope as f64
        } else {
            0.0
        };

        if potential_gain >= p.take_profit
            && actual_change > 0.0
            && series.rsi_long[i] > p.rsi_upper_bound
            && rsi_slope > 0.0
            && series.macd_line[i] > series.macd_signal[i]
        {
            Signal::Long
        } else if potential_loss >= p.take_profit
            && actual_change < 0.0
            && series.rsi_long[i] < p.rsi_lower_bound
            && rsi_slope < 0.0
            && series.macd_line[i] < series.macd_signal[i]
        {
            Signal::Short
        } else {
            Signal::Hold
        }
    }
}

/// Upsample minority classes to the majority size by duplicating random
/// samples with 1% multiplicative noise.
fn balance_classes<R: Rng + ?Sized>(
    features: Vec<Vec<f64>>,
    labels: Vec<Signal>,
    rng: &mut R,
) -> (Vec<Vec<f64>>, Vec<Signal>) {
    let mut class_samples: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, label) in labels.iter().enumerate() {
        class_samples.entry(label.index()).or_default().push(i);
    }

    let majority_size = class_samples.values().map(Vec::len).max().unwrap_or(0);

    let mut balanced_features = Vec::new();
    let mut balanced_labels = Vec::new();

    for (class, samples) in class_samples {
        for idx in &samples {
            balanced_features.push(features[*idx].clone());
            balanced_labels.push(Signal::from_index(class));
        }

        for _ in samples.len()..majority_size {
            let original = samples[rng.random_range(0..samples.len())];
            let augmented: Vec<f64> = features[original]
                .iter()
                .map(|v| v * (1.0 + (rng.random::<f64>() * 2.0 - 1.0) * 0.01))
                .collect();
            balanced_features.push(augmented);
            balanced_labels.push(Signal::from_index(class));
        }
    }

    (balanced_features, balanced_labels)
}

fn shuffle_in_unison<R: Rng + ?Sized>(
    features: Vec<Vec<f64>>,
    labels: Vec<Signal>,
    rng: &mut R,
) -> (Vec<Vec<f64>>, Vec<Signal>) {
    let mut order: Vec<usize> = (0..features.len()).collect();
    order.shuffle(rng);

    let mut shuffled_features = Vec::with_capacity(features.len());
    let mut shuffled_labels = Vec::with_capacity(labels.len());
    for idx in order {
        shuffled_features.push(features[idx].clone());
        shuffled_labels.push(labels[idx]);
    }
    (shuffled_features, shuffled_labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Venue;
    use crate::domain::strategy::{Genome, Param, TradeSettings};
    use chrono::{TimeZone, Utc};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_params() -> StrategyParams {
        let mut genome = Genome::new("DOGE-USDT-SWAP");
        genome.set(Param::WindowSize, 50.0);
        genome.set(Param::Lookahead, 3.0);
        genome.params(&TradeSettings::default())
    }

    fn wave_candles(count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let price = 1.0 + 0.05 * ((i as f64) / 9.0).sin() + 0.0001 * i as f64;
                Candle {
                    timestamp: Utc.timestamp_opt(i as i64 * 60, 0).unwrap(),
                    instrument: "DOGE-USDT-SWAP".to_string(),
                    venue: Venue::Okx,
                    open: price,
                    high: price * 1.003,
                    low: price * 0.997,
                    close: price,
                    volume: 100.0 + (i % 17) as f64,
                }
            })
            .collect()
    }

    #[test]
    fn test_normalize_value() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(normalize_value(2.5, &values), 0.5);
        assert_eq!(normalize_value(0.0, &values), 0.0);
        assert_eq!(normalize_value(9.0, &values), 1.0);
        // Degenerate window maps to the midpoint
        assert_eq!(normalize_value(5.0, &[2.0, 2.0]), 0.5);
        assert_eq!(normalize_value(5.0, &[]), 0.0);
    }

    #[test]
    fn test_prediction_features_shape_and_bounds() {
        let pipeline = FeaturePipeline::new(small_params());
        let candles = wave_candles(200);
        let features = pipeline.prediction_features(&candles).unwrap();

        assert_eq!(features.len(), 150);
        for row in &features {
            assert_eq!(row.len(), 31);
            for (j, value) in row.iter().enumerate() {
                assert!(value.is_finite(), "feature {} not finite", j);
            }
        }
    }

    #[test]
    fn test_prediction_features_insufficient_data() {
        let pipeline = FeaturePipeline::new(small_params());
        let candles = wave_candles(50);
        let err = pipeline.prediction_features(&candles).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { .. }));
    }

    #[test]
    fn test_training_set_balanced_and_aligned() {
        let pipeline = FeaturePipeline::new(small_params());
        let candles = wave_candles(400);
        let mut rng = StdRng::seed_from_u64(1);
        let (features, labels) = pipeline.training_set(&candles, &mut rng).unwrap();

        assert_eq!(features.len(), labels.len());
        assert!(!features.is_empty());

        // Every represented class is upsampled to the majority size
        let mut counts = [0usize; Signal::COUNT];
        for label in &labels {
            counts[label.index()] += 1;
        }
        let represented: Vec<usize> = counts.iter().copied().filter(|c| *c > 0).collect();
        let majority = *represented.iter().max().unwrap();
        assert!(represented.iter().all(|c| *c == majority));
    }

    #[test]
    fn test_training_set_insufficient_data() {
        let pipeline = FeaturePipeline::new(small_params());
        let candles = wave_candles(52);
        let err = pipeline.training_set(&candles, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { .. }));
    }

    #[test]
    fn test_momentum() {
        assert_eq!(momentum(&[1.0, 1.5, 2.0]), 1.0);
        assert_eq!(momentum(&[]), 0.0);
        assert_eq!(momentum(&[0.0, 1.0]), 0.0);
    }
}
