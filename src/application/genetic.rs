//! Evolutionary search over strategy genomes.
//!
//! Each generation: parallel fitness evaluation (train + deep backtest
//! per genome) across a worker pool, fan-in over a results channel,
//! fitness-sorted selection with unconditional elites and softmax
//! roulette, then crossover + mutation to refill the population.

use crate::application::model::Model;
use crate::application::reporting::{GenerationRecord, GenerationSink};
use crate::domain::candle::{Venue, truncate_to_minute};
use crate::domain::metrics::ModelMetrics;
use crate::domain::strategy::{Genome, TradeSettings};
use crate::infrastructure::candle_store::CandleStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use statrs::statistics::{Data, Distribution};
use std::sync::Arc;
use std::thread::available_parallelism;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct OptimizerSettings {
    pub population_size: usize,
    pub generations: usize,
    pub retain_rate: f64,
    pub mutation_rate: f64,
    pub elite_count: usize,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 20,
            retain_rate: 0.3,
            mutation_rate: 0.3,
            elite_count: 2,
        }
    }
}

/// Score one genome: train a model over its `train_days` window, deep
/// backtest it, and hand back the metrics. Any failure (insufficient
/// data, training error, fetch error) yields the neutral worst-case
/// metrics instead of aborting the generation.
pub async fn evaluate_fitness(
    store: &CandleStore,
    venue: Venue,
    trade: &TradeSettings,
    genome: &Genome,
    now: DateTime<Utc>,
) -> ModelMetrics {
    let params = genome.params(trade);
    let to = truncate_to_minute(now);
    let from = to - Duration::days(params.train_days);

    match Model::train(store, venue, params, from, to).await {
        Ok(mut model) => match model.deep_backtest(store, now).await {
            Ok(_) => model.metrics,
            Err(e) => {
                debug!("deep backtest failed, scoring genome as worst-case: {:#}", e);
                ModelMetrics::default()
            }
        },
        Err(e) => {
            debug!("training failed, scoring genome as worst-case: {:#}", e);
            ModelMetrics::default()
        }
    }
}

/// Survivor selection over a population sorted by fitness descending.
///
/// The retain rate adapts to the population's fitness spread: low
/// variance tightens selection, high variance loosens it. The top
/// `elite_count` genomes always survive; genomes beyond the retain band
/// survive stochastically with probability exp(fitness) / Σ fitness.
pub fn selection<R: Rng + ?Sized>(
    population: Vec<Genome>,
    retain_rate: f64,
    elite_count: usize,
    rng: &mut R,
) -> Vec<Genome> {
    if population.is_empty() {
        return population;
    }

    let fitnesses: Vec<f64> = population.iter().map(Genome::fitness).collect();
    let spread = if fitnesses.len() > 1 {
        Data::new(fitnesses.clone()).std_dev().unwrap_or(0.0)
    } else {
        0.0
    };

    let retain_rate = if spread < 0.05 {
        retain_rate * 0.9 // More selection pressure
    } else {
        retain_rate * 1.1 // Allow more exploration
    };

    let elite_count = elite_count.clamp(1, population.len());
    let n = ((population.len() as f64 * retain_rate) as usize).clamp(elite_count, population.len());

    let mut survivors: Vec<Genome> = population[..elite_count].to_vec();

    let total_fitness: f64 = fitnesses.iter().sum();
    if total_fitness <= 0.0 {
        return survivors;
    }

    for genome in &population[n..] {
        let scaled_fitness = genome.fitness().exp();
        if rng.random::<f64>() < scaled_fitness / total_fitness {
            survivors.push(genome.clone());
        }
    }

    survivors
}

/// Selection, crossover and mutation. Returns exactly
/// `settings.population_size` genomes, best survivor first.
pub fn next_generation<R: Rng + ?Sized>(
    evaluated: Vec<Genome>,
    settings: &OptimizerSettings,
    rng: &mut R,
) -> Vec<Genome> {
    let mut population = selection(
        evaluated,
        settings.retain_rate,
        settings.elite_count,
        rng,
    );

    while population.len() < settings.population_size {
        let i = rng.random_range(0..population.len());
        let j = rng.random_range(0..population.len());
        let mut child = Genome::crossover(&population[i], &population[j], rng);
        child.mutate(rng, settings.mutation_rate);
        population.push(child);
    }
    population.truncate(settings.population_size);

    population
}

pub struct GeneticOptimizer {
    store: Arc<CandleStore>,
    venue: Venue,
    trade: TradeSettings,
    settings: OptimizerSettings,
    sink: Arc<dyn GenerationSink>,
}

impl GeneticOptimizer {
    pub fn new(
        store: Arc<CandleStore>,
        venue: Venue,
        trade: TradeSettings,
        settings: OptimizerSettings,
        sink: Arc<dyn GenerationSink>,
    ) -> Self {
        Self {
            store,
            venue,
            trade,
            settings,
            sink,
        }
    }

    /// Run the configured number of generations and return the best
    /// genome of the final one.
    pub async fn run(&self, instrument: &str, now: DateTime<Utc>) -> Result<Genome> {
        anyhow::ensure!(
            self.settings.population_size > 0,
            "population size must be positive"
        );

        let mut population = Vec::with_capacity(self.settings.population_size);
        population.push(Genome::new(instrument));
        {
            let mut rng = rand::rng();
            for _ in 1..self.settings.population_size {
                let mut genome = Genome::new(instrument);
                genome.randomize(&mut rng, 25.0);
                population.push(genome);
            }
        }

        for generation in 0..self.settings.generations {
            let started_at = Utc::now();
            info!(
                "generation {}/{}: evaluating {} genomes",
                generation + 1,
                self.settings.generations,
                population.len()
            );

            let mut evaluated = self.evaluate_population(population, now).await;
            evaluated.sort_by(|a, b| {
                b.fitness()
                    .partial_cmp(&a.fitness())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let record = GenerationRecord::from_population(generation, started_at, &evaluated);
            info!(
                "generation {}: fitness mean {:.6} best {:.6}, best pnl {:.2}%/day",
                generation,
                record.fitness.mean,
                record.fitness.max,
                record.best.metrics.backtest.mean.pnl
            );
            if let Err(e) = self.sink.record(&record) {
                warn!("failed to record generation stats: {:#}", e);
            }

            let mut rng = rand::rng();
            population = next_generation(evaluated, &self.settings, &mut rng);
        }

        Ok(population
            .into_iter()
            .next()
            .expect("population is never empty"))
    }

    /// Evaluate a population on `available_parallelism - 1` workers
    /// (clamped to [1, population]), fanning results into a channel.
    /// Completion order is arbitrary; the caller re-sorts.
    async fn evaluate_population(
        &self,
        population: Vec<Genome>,
        now: DateTime<Utc>,
    ) -> Vec<Genome> {
        let pop_size = population.len();
        let workers = available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .saturating_sub(1)
            .clamp(1, pop_size);
        let chunk_size = pop_size.div_ceil(workers);

        let (tx, mut rx) = mpsc::channel(pop_size);
        for chunk in population.chunks(chunk_size) {
            let chunk: Vec<Genome> = chunk.to_vec();
            let tx = tx.clone();
            let store = self.store.clone();
            let venue = self.venue;
            let trade = self.trade;
            tokio::spawn(async move {
                for mut genome in chunk {
                    genome.metrics = evaluate_fitness(&store, venue, &trade, &genome, now).await;
                    if tx.send(genome).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut evaluated = Vec::with_capacity(pop_size);
        while let Some(genome) = rx.recv().await {
            evaluated.push(genome);
        }
        evaluated
    }
}
