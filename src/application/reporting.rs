//! Per-generation statistics and the sink abstraction they flow into.
//!
//! The optimizer only knows this trait; the concrete CSV writer lives in
//! infrastructure.

use crate::domain::strategy::Genome;
use anyhow::Result;
use chrono::{DateTime, Utc};
use statrs::statistics::{Data, Distribution};

/// Seven-number summary of one metric across a population.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatSummary {
    pub mean: f64,
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl StatSummary {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let percentile = |p: usize| sorted[(sorted.len() * p / 100).min(sorted.len() - 1)];

        let data = Data::new(sorted.clone());
        Self {
            mean: data.mean().unwrap_or(0.0),
            min: sorted[0],
            p25: percentile(25),
            median: percentile(50),
            p75: percentile(75),
            max: sorted[sorted.len() - 1],
            std_dev: if sorted.len() > 1 {
                data.std_dev().unwrap_or(0.0)
            } else {
                0.0
            },
        }
    }
}

/// Aggregate statistics and best genome of one completed generation.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub generation: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fitness: StatSummary,
    pub pnl: StatSummary,
    pub max_drawdown: StatSummary,
    pub sharpe_ratio: StatSummary,
    pub sortino_ratio: StatSummary,
    pub trades: StatSummary,
    pub f1: StatSummary,
    pub best: Genome,
}

impl GenerationRecord {
    /// Summarize an evaluated population. `population` must be sorted by
    /// fitness descending; the first genome is recorded as the best.
    pub fn from_population(
        generation: usize,
        started_at: DateTime<Utc>,
        population: &[Genome],
    ) -> Self {
        let collect = |f: &dyn Fn(&Genome) -> f64| {
            StatSummary::from_values(&population.iter().map(f).collect::<Vec<f64>>())
        };

        Self {
            generation,
            started_at,
            finished_at: Utc::now(),
            fitness: collect(&|g| g.fitness()),
            pnl: collect(&|g| g.metrics.backtest.mean.pnl),
            max_drawdown: collect(&|g| g.metrics.backtest.mean.max_drawdown),
            sharpe_ratio: collect(&|g| g.metrics.backtest.mean.sharpe_ratio),
            sortino_ratio: collect(&|g| g.metrics.backtest.mean.sortino_ratio),
            trades: collect(&|g| g.metrics.backtest.mean.trades),
            f1: collect(&|g| g.metrics.avg_f1()),
            best: population[0].clone(),
        }
    }
}

/// Receives one record per completed generation.
pub trait GenerationSink: Send + Sync {
    fn record(&self, record: &GenerationRecord) -> Result<()>;
}

/// Discards records; used in tests and dry runs.
pub struct NullSink;

impl GenerationSink for NullSink {
    fn record(&self, _record: &GenerationRecord) -> Result<()> {
        Ok(())
    }
}
