use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tradewind::application::ensemble::Ensemble;
use tradewind::config::Config;
use tradewind::domain::ports::{ExecutionService, VenueDataService};
use tradewind::domain::signal::Signal;
use tradewind::domain::strategy::StrategyParams;
use tradewind::domain::trade::OrderRequest;
use tradewind::infrastructure::binance::BinanceMarketDataService;
use tradewind::infrastructure::candle_store::CandleStore;
use tradewind::infrastructure::okx::{OkxCredentials, OkxExecutionService, OkxMarketDataService};
use tradewind::infrastructure::persistence::{Database, SqliteCandleRepository};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(
        "starting tradewind for {} on {} ({}x leverage)",
        config.instrument, config.venue, config.trade.leverage
    );

    // Startup failures here are fatal; the operator should not run
    // without a cache or a seeded ensemble.
    let database = Database::new(&config.database_url).await?;
    let repository = Arc::new(SqliteCandleRepository::new(database.pool.clone()));
    let venues: Vec<Arc<dyn VenueDataService>> = vec![
        Arc::new(OkxMarketDataService::new(config.okx.base_url.clone())),
        Arc::new(BinanceMarketDataService::new(config.binance_base_url.clone())),
    ];
    let store = Arc::new(CandleStore::new(repository, venues));

    let params = config.genome.params(&config.trade);
    let ensemble = Ensemble::spawn(
        store.clone(),
        config.venue,
        params.clone(),
        config.ensemble.frequency,
        config.ensemble.generations,
    )
    .await?;

    let broker = OkxExecutionService::new(
        config.okx.base_url.clone(),
        OkxCredentials {
            api_key: config.okx.api_key.clone(),
            api_secret: config.okx.api_secret.clone(),
            api_passphrase: config.okx.api_passphrase.clone(),
        },
        config.trade.commission,
    );

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        // Steady-state errors are logged and the loop proceeds to the
        // next tick.
        if let Err(e) = tick(&ensemble, &broker, &config, &params).await {
            error!("trading tick failed: {:#}", e);
        }
    }
}

async fn tick(
    ensemble: &Ensemble,
    broker: &OkxExecutionService,
    config: &Config,
    params: &StrategyParams,
) -> Result<()> {
    let positions = broker.positions(&config.instrument).await?;
    if !positions.is_empty() {
        for position in &positions {
            info!("holding position: {}", position);
        }
        return Ok(());
    }

    let (signal, votes) = ensemble.predict(Utc::now()).await?;
    info!("ensemble signal: {} {}", signal, votes);

    if signal == Signal::Hold {
        return Ok(());
    }

    let equity = broker.equity().await?;
    let order = OrderRequest {
        instrument: config.instrument.clone(),
        is_long: signal == Signal::Long,
        usdt: equity * params.trade_multiplier,
        take_profit: params.take_profit,
        stop_loss: params.stop_loss,
        leverage: params.leverage,
    };

    let details = broker.place_order(&order).await?;
    info!("placed {} order {} on {}", signal, details.order_id, details.instrument);
    Ok(())
}
