//! End-to-end genetic optimizer flow against a fully scripted candle
//! cache: worst-case scoring for unevaluable genomes and stable
//! population size across generations.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use tradewind::application::genetic::{GeneticOptimizer, OptimizerSettings, evaluate_fitness};
use tradewind::application::reporting::{GenerationRecord, GenerationSink, NullSink};
use tradewind::domain::candle::Venue;
use tradewind::domain::metrics::ModelMetrics;
use tradewind::domain::strategy::{Genome, TradeSettings};
use tradewind::infrastructure::candle_store::CandleStore;
use tradewind::infrastructure::persistence::InMemoryCandleRepository;

const INSTRUMENT: &str = "DOGE-USDT-SWAP";

fn empty_store() -> Arc<CandleStore> {
    // No cached candles and no registered venues: every training attempt
    // fails before any network access.
    Arc::new(CandleStore::new(
        Arc::new(InMemoryCandleRepository::new()),
        vec![],
    ))
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn test_unevaluable_genome_scores_neutral_not_fatal() {
    let store = empty_store();
    let genome = Genome::new(INSTRUMENT);

    let metrics = evaluate_fitness(&store, Venue::Okx, &TradeSettings::default(), &genome, now()).await;

    assert_eq!(metrics, ModelMetrics::default());
    // Neutral metrics still produce a finite, strictly positive fitness.
    let fitness = metrics.fitness();
    assert!(fitness.is_finite());
    assert!(fitness > 0.0);
}

struct CountingSink {
    records: std::sync::Mutex<Vec<usize>>,
}

impl GenerationSink for CountingSink {
    fn record(&self, record: &GenerationRecord) -> Result<()> {
        self.records
            .lock()
            .expect("sink lock")
            .push(record.generation);
        Ok(())
    }
}

#[tokio::test]
async fn test_run_reports_every_generation_and_returns_best() {
    let store = empty_store();
    let sink = Arc::new(CountingSink {
        records: std::sync::Mutex::new(Vec::new()),
    });

    let settings = OptimizerSettings {
        population_size: 6,
        generations: 3,
        retain_rate: 0.5,
        mutation_rate: 0.3,
        elite_count: 2,
    };

    let optimizer = GeneticOptimizer::new(
        store,
        Venue::Okx,
        TradeSettings::default(),
        settings,
        sink.clone(),
    );

    let best = optimizer.run(INSTRUMENT, now()).await.unwrap();
    assert_eq!(best.instrument, INSTRUMENT);
    assert!(best.fitness() > 0.0);

    let generations = sink.records.lock().unwrap().clone();
    assert_eq!(generations, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_zero_population_is_rejected() {
    let optimizer = GeneticOptimizer::new(
        empty_store(),
        Venue::Okx,
        TradeSettings::default(),
        OptimizerSettings {
            population_size: 0,
            ..Default::default()
        },
        Arc::new(NullSink),
    );

    assert!(optimizer.run(INSTRUMENT, now()).await.is_err());
}
