use crate::domain::signal::Signal;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};

/// Replace NaN/Inf with a neutral default so one degenerate backtest
/// window cannot poison an aggregate or a whole generation.
pub fn safe_value(v: f64, default: f64) -> f64 {
    if v.is_nan() || v.is_infinite() { default } else { v }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values.to_vec()).mean().unwrap_or(0.0)
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    Data::new(values.to_vec()).std_dev().unwrap_or(0.0)
}

/// Risk and return figures for a single backtest window.
///
/// `pnl` is the per-day compounded return in percent, `trades` the
/// closed-trade count per day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub pnl: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub trades: f64,
}

/// Distributional aggregate over the stratified backtest windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeepBacktestMetrics {
    pub mean: BacktestMetrics,
    pub min: BacktestMetrics,
    pub max: BacktestMetrics,
    pub std_dev: BacktestMetrics,
}

impl DeepBacktestMetrics {
    pub fn aggregate(windows: &[BacktestMetrics]) -> Self {
        if windows.is_empty() {
            return Self::default();
        }

        let pnl: Vec<f64> = windows.iter().map(|m| m.pnl).collect();
        let max_drawdown: Vec<f64> = windows.iter().map(|m| m.max_drawdown).collect();
        let sharpe: Vec<f64> = windows.iter().map(|m| m.sharpe_ratio).collect();
        let sortino: Vec<f64> = windows.iter().map(|m| m.sortino_ratio).collect();
        let trades: Vec<f64> = windows.iter().map(|m| m.trades).collect();

        let fold = |values: &[f64], pick: fn(f64, f64) -> f64| {
            values.iter().copied().reduce(pick).unwrap_or(0.0)
        };
        let collect = |f: &dyn Fn(&[f64]) -> f64| BacktestMetrics {
            pnl: f(&pnl),
            max_drawdown: f(&max_drawdown),
            sharpe_ratio: f(&sharpe),
            sortino_ratio: f(&sortino),
            trades: f(&trades),
        };

        DeepBacktestMetrics {
            mean: collect(&mean),
            min: collect(&|v| fold(v, f64::min)),
            max: collect(&|v| fold(v, f64::max)),
            std_dev: collect(&std_dev),
        }
    }
}

/// Classifier quality plus simulated trading performance for one trained
/// model. `Default` doubles as the worst-case placeholder the optimizer
/// assigns when a genome fails to train.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Overall accuracy in percent.
    pub accuracy: f64,
    /// Row-normalized percentages, rows = actual class, columns = predicted.
    pub confusion_matrix: [[f64; Signal::COUNT]; Signal::COUNT],
    pub class_precision: [f64; Signal::COUNT],
    pub class_recall: [f64; Signal::COUNT],
    pub f1_scores: [f64; Signal::COUNT],
    /// True positives per class.
    pub samples: [usize; Signal::COUNT],
    pub backtest: DeepBacktestMetrics,
}

impl ModelMetrics {
    /// Derive classification metrics from a raw confusion matrix of
    /// counts, rows indexed by actual class, columns by predicted class.
    pub fn from_confusion(confusion: [[usize; Signal::COUNT]; Signal::COUNT], total: usize) -> Self {
        let n = Signal::COUNT;
        let mut metrics = ModelMetrics::default();

        for i in 0..n {
            let row_total: usize = confusion[i].iter().sum();
            if row_total > 0 {
                for j in 0..n {
                    metrics.confusion_matrix[i][j] =
                        confusion[i][j] as f64 / row_total as f64 * 100.0;
                }
            }
            metrics.samples[i] = confusion[i][i];
        }

        for i in 0..n {
            let true_positives = confusion[i][i];
            let mut false_positives = 0;
            let mut false_negatives = 0;
            for j in 0..n {
                if i != j {
                    false_positives += confusion[j][i];
                    false_negatives += confusion[i][j];
                }
            }

            if true_positives + false_positives > 0 {
                metrics.class_precision[i] =
                    true_positives as f64 / (true_positives + false_positives) as f64 * 100.0;
            }
            if true_positives + false_negatives > 0 {
                metrics.class_recall[i] =
                    true_positives as f64 / (true_positives + false_negatives) as f64 * 100.0;
            }
            if metrics.class_precision[i] + metrics.class_recall[i] > 0.0 {
                metrics.f1_scores[i] = 2.0 * (metrics.class_precision[i] * metrics.class_recall[i])
                    / (metrics.class_precision[i] + metrics.class_recall[i]);
            }
        }

        let correct: usize = (0..n).map(|i| confusion[i][i]).sum();
        if total > 0 {
            metrics.accuracy = correct as f64 / total as f64 * 100.0;
        }

        metrics
    }

    /// Average F1 across the three classes, in percent.
    pub fn avg_f1(&self) -> f64 {
        (self.f1_scores[0] + self.f1_scores[1] + self.f1_scores[2]) / 3.0
    }

    /// Scalar optimization target.
    ///
    /// The weights, tanh divisors and penalty thresholds below are tuned
    /// against live optimizer behavior; changing any of them reshapes the
    /// whole search landscape, so they stay exactly as calibrated.
    pub fn fitness(&self) -> f64 {
        let avg_f1 = (self.f1_scores[0] + self.f1_scores[1] + self.f1_scores[2]) / 300.0;

        // Offset tanh for smooth scaling (range: ~0.1 to 1.0)
        let norm_pnl = 0.5 + 0.5 * (safe_value(self.backtest.mean.pnl, 0.0) / 50.0).tanh();
        let sharpe = 0.5 + 0.5 * (safe_value(self.backtest.mean.sharpe_ratio, 0.0) / 3.0).tanh();
        let sortino = 0.5 + 0.5 * (safe_value(self.backtest.mean.sortino_ratio, 0.0) / 3.0).tanh();

        // Drawdown penalty (range: ~0.1 to 1.0)
        let drawdown_penalty =
            0.1 + 0.9 * (-safe_value(self.backtest.min.max_drawdown, 0.0) / 25.0).exp();

        // Variance penalty (range: ~0.2 to 1.0)
        let variance_penalty = 1.0 / (1.0 + safe_value(self.backtest.std_dev.pnl, 0.0) / 10.0);

        // Trade factor: rewards balanced activity (range: ~0.5 to 1.5)
        let trade_factor = 0.5 + 1.0 * (safe_value(self.backtest.mean.trades, 0.0) * 0.05).tanh();

        // Risk-adjusted return modifier (range: ~0.8 to 1.2)
        let risk_reward_factor = 0.8
            + 0.4
                * ((safe_value(self.backtest.mean.pnl, 0.0)
                    / safe_value(self.backtest.mean.trades, 1.0).max(1.0))
                    * 0.1)
                    .tanh();

        // PnL reward factor (range: ~0.8 to 1.5)
        let pnl_reward = 0.8 + 0.7 * (safe_value(self.backtest.mean.pnl, 0.0) / 100.0).exp();

        let mut fitness = (avg_f1 * 0.25) + (sortino * 0.25) + (sharpe * 0.2) + (norm_pnl * 0.3);

        fitness *= drawdown_penalty;
        fitness *= trade_factor;
        fitness *= variance_penalty;
        fitness *= risk_reward_factor;
        fitness *= pnl_reward;

        // Extreme penalty for full account wipeouts
        if self.backtest.min.max_drawdown >= 99.5 {
            fitness *= 0.05;
        } else if self.backtest.min.max_drawdown >= 95.0 {
            fitness *= 0.2;
        }

        // Small positive offset keeps the score strictly positive
        safe_value(fitness + 0.00001, 0.00001)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_with_pnl(pnl: f64) -> ModelMetrics {
        ModelMetrics {
            f1_scores: [60.0, 55.0, 58.0],
            backtest: DeepBacktestMetrics {
                mean: BacktestMetrics {
                    pnl,
                    max_drawdown: 10.0,
                    sharpe_ratio: 1.2,
                    sortino_ratio: 1.8,
                    trades: 4.0,
                },
                min: BacktestMetrics {
                    pnl: pnl - 1.0,
                    max_drawdown: 20.0,
                    ..Default::default()
                },
                std_dev: BacktestMetrics {
                    pnl: 2.0,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_fitness_monotone_in_mean_pnl() {
        let mut previous = f64::MIN;
        for pnl in [-20.0, -5.0, 0.0, 1.0, 5.0, 20.0, 60.0] {
            let fitness = metrics_with_pnl(pnl).fitness();
            assert!(
                fitness >= previous,
                "fitness decreased at pnl {}: {} < {}",
                pnl,
                fitness,
                previous
            );
            previous = fitness;
        }
    }

    #[test]
    fn test_fitness_strictly_positive_on_nan_inputs() {
        let mut metrics = metrics_with_pnl(f64::NAN);
        metrics.backtest.mean.sharpe_ratio = f64::INFINITY;
        metrics.backtest.std_dev.pnl = f64::NAN;
        let fitness = metrics.fitness();
        assert!(fitness.is_finite());
        assert!(fitness > 0.0);
    }

    #[test]
    fn test_fitness_wipeout_penalty() {
        let healthy = metrics_with_pnl(5.0);
        let mut wiped = metrics_with_pnl(5.0);
        wiped.backtest.min.max_drawdown = 99.9;
        assert!(wiped.fitness() < healthy.fitness() * 0.5);
    }

    #[test]
    fn test_default_metrics_fitness_positive() {
        let fitness = ModelMetrics::default().fitness();
        assert!(fitness > 0.0);
        assert!(fitness < 1.0);
    }

    #[test]
    fn test_from_confusion_perfect_classifier() {
        let confusion = [[10, 0, 0], [0, 5, 0], [0, 0, 5]];
        let metrics = ModelMetrics::from_confusion(confusion, 20);
        assert!((metrics.accuracy - 100.0).abs() < 1e-9);
        for i in 0..3 {
            assert!((metrics.class_precision[i] - 100.0).abs() < 1e-9);
            assert!((metrics.class_recall[i] - 100.0).abs() < 1e-9);
            assert!((metrics.f1_scores[i] - 100.0).abs() < 1e-9);
        }
        assert_eq!(metrics.samples, [10, 5, 5]);
    }

    #[test]
    fn test_from_confusion_mixed() {
        // Actual Hold: 8 predicted hold, 2 predicted long.
        let confusion = [[8, 2, 0], [1, 4, 0], [0, 0, 5]];
        let metrics = ModelMetrics::from_confusion(confusion, 20);
        assert!((metrics.accuracy - 85.0).abs() < 1e-9);
        // Precision of Long = 4 / (4 + 2)
        assert!((metrics.class_precision[1] - 400.0 / 6.0).abs() < 1e-9);
        // Recall of Long = 4 / (4 + 1)
        assert!((metrics.class_recall[1] - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate() {
        let windows = vec![
            BacktestMetrics {
                pnl: 1.0,
                max_drawdown: 5.0,
                sharpe_ratio: 1.0,
                sortino_ratio: 2.0,
                trades: 3.0,
            },
            BacktestMetrics {
                pnl: 3.0,
                max_drawdown: 15.0,
                sharpe_ratio: 2.0,
                sortino_ratio: 4.0,
                trades: 5.0,
            },
        ];
        let deep = DeepBacktestMetrics::aggregate(&windows);
        assert!((deep.mean.pnl - 2.0).abs() < 1e-9);
        assert!((deep.min.pnl - 1.0).abs() < 1e-9);
        assert!((deep.max.pnl - 3.0).abs() < 1e-9);
        assert!((deep.max.max_drawdown - 15.0).abs() < 1e-9);
        // Sample standard deviation of [1, 3]
        assert!((deep.std_dev.pnl - std::f64::consts::SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(
            DeepBacktestMetrics::aggregate(&[]),
            DeepBacktestMetrics::default()
        );
    }

    #[test]
    fn test_safe_value() {
        assert_eq!(safe_value(f64::NAN, 1.5), 1.5);
        assert_eq!(safe_value(f64::INFINITY, 0.0), 0.0);
        assert_eq!(safe_value(2.0, 0.0), 2.0);
    }
}
