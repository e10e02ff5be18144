//! Evolutionary strategy search. Prints the best genome of the final
//! generation as `TRADEWIND_*` lines ready for the operator environment,
//! and appends per-generation statistics to an optimizer CSV.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tradewind::application::genetic::GeneticOptimizer;
use tradewind::config::Config;
use tradewind::domain::ports::VenueDataService;
use tradewind::infrastructure::binance::BinanceMarketDataService;
use tradewind::infrastructure::candle_store::CandleStore;
use tradewind::infrastructure::okx::OkxMarketDataService;
use tradewind::infrastructure::persistence::{Database, SqliteCandleRepository};
use tradewind::infrastructure::reporting::CsvGenerationSink;

#[derive(Parser, Debug)]
#[command(author, version, about = "Genetic search over strategy hyperparameters")]
struct Args {
    /// Instrument to optimize for (default from TRADEWIND_INSTRUMENT)
    #[arg(long)]
    instrument: Option<String>,

    /// Number of generations to run
    #[arg(long)]
    generations: Option<usize>,

    /// Population size per generation
    #[arg(long)]
    population: Option<usize>,

    /// Base survivor retain rate
    #[arg(long)]
    retain_rate: Option<f64>,

    /// Probability of mutating a child genome
    #[arg(long)]
    mutation_rate: Option<f64>,

    /// Genomes kept unconditionally each generation
    #[arg(long)]
    elite_count: Option<usize>,

    /// Output CSV path (default optimizer-<timestamp>.csv)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let mut settings = config.optimizer;
    if let Some(generations) = args.generations {
        settings.generations = generations;
    }
    if let Some(population) = args.population {
        settings.population_size = population;
    }
    if let Some(retain_rate) = args.retain_rate {
        settings.retain_rate = retain_rate;
    }
    if let Some(mutation_rate) = args.mutation_rate {
        settings.mutation_rate = mutation_rate;
    }
    if let Some(elite_count) = args.elite_count {
        settings.elite_count = elite_count;
    }
    let instrument = args.instrument.unwrap_or_else(|| config.instrument.clone());

    let now = Utc::now();
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("optimizer-{}.csv", now.format("%Y-%m-%d-%H-%M-%S"))));

    info!(
        "optimizing {} on {}: {} generations of {} genomes",
        instrument, config.venue, settings.generations, settings.population_size
    );

    let database = Database::new(&config.database_url).await?;
    let repository = Arc::new(SqliteCandleRepository::new(database.pool.clone()));
    let venues: Vec<Arc<dyn VenueDataService>> = vec![
        Arc::new(OkxMarketDataService::new(config.okx.base_url.clone())),
        Arc::new(BinanceMarketDataService::new(config.binance_base_url.clone())),
    ];
    let store = Arc::new(CandleStore::new(repository, venues));

    let sink = Arc::new(CsvGenerationSink::create(&output)?);
    let optimizer = GeneticOptimizer::new(store, config.venue, config.trade, settings, sink);

    let best = optimizer.run(&instrument, now).await?;

    info!(
        "search complete: best fitness {:.6}, mean pnl {:.2}%/day, report at {}",
        best.fitness(),
        best.metrics.backtest.mean.pnl,
        output.display()
    );

    println!("TRADEWIND_INSTRUMENT={}", best.instrument);
    for line in best.env_lines() {
        println!("{}", line);
    }

    Ok(())
}
