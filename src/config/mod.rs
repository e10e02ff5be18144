//! Configuration for tradewind.
//!
//! Everything is read from the environment exactly once at startup into
//! an immutable [`Config`] that is passed into components; algorithms
//! never consult the environment themselves.

use crate::application::genetic::OptimizerSettings;
use crate::domain::candle::Venue;
use crate::domain::strategy::{Genome, PARAM_COUNT, PARAM_SPECS, TradeSettings};
use anyhow::{Context, Result};
use chrono::Duration;
use std::env;
use std::str::FromStr;

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("failed to parse env.{}: {}", name, value)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct OkxConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
}

#[derive(Debug, Clone, Copy)]
pub struct EnsembleSettings {
    /// Spacing between member timestamps, and the retrain period.
    pub frequency: Duration,
    /// Number of concurrently active generations.
    pub generations: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub instrument: String,
    pub venue: Venue,
    pub database_url: String,
    pub trade: TradeSettings,
    pub okx: OkxConfig,
    pub binance_base_url: String,
    pub optimizer: OptimizerSettings,
    pub ensemble: EnsembleSettings,
    /// Operator strategy defaults, overridable per gene via
    /// `TRADEWIND_<PARAM>` variables.
    pub genome: Genome,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let instrument = env_string("TRADEWIND_INSTRUMENT", "DOGE-USDT-SWAP");
        let venue = Venue::from_str(&env_string("TRADEWIND_VENUE", "okx"))?;

        let trade = TradeSettings {
            leverage: env_parse::<f64>("TRADEWIND_LEVERAGE", 50.0)?.clamp(1.0, 100.0),
            commission: env_parse::<f64>("TRADEWIND_COMMISSION", 0.001)?.clamp(0.0, 0.5),
            trade_multiplier: env_parse::<f64>("TRADEWIND_TRADE_MULTIPLIER", 1.0)?.clamp(0.5, 2.0),
        };

        let mut genes = [0.0; PARAM_COUNT];
        for (gene, spec) in genes.iter_mut().zip(PARAM_SPECS.iter()) {
            *gene = env_parse(&spec.env_var(), spec.default)?;
        }
        let genome = Genome::from_genes(&instrument, genes);

        let optimizer = OptimizerSettings {
            population_size: env_parse("TRADEWIND_POPULATION_SIZE", 50)?,
            generations: env_parse("TRADEWIND_GENERATIONS", 20)?,
            retain_rate: env_parse("TRADEWIND_RETAIN_RATE", 0.3)?,
            mutation_rate: env_parse("TRADEWIND_MUTATION_RATE", 0.3)?,
            elite_count: env_parse("TRADEWIND_ELITE_COUNT", 2)?,
        };

        let ensemble = EnsembleSettings {
            frequency: Duration::seconds(env_parse("TRADEWIND_ENSEMBLE_FREQUENCY_SECS", 86_400)?),
            generations: env_parse("TRADEWIND_ENSEMBLE_GENERATIONS", 5)?,
        };

        Ok(Config {
            instrument,
            venue,
            database_url: env_string("TRADEWIND_DATABASE_URL", "sqlite://data/tradewind.db"),
            trade,
            okx: OkxConfig {
                base_url: env_string("OKX_BASE_URL", "https://www.okx.com"),
                api_key: env_string("OKX_API_KEY", ""),
                api_secret: env_string("OKX_API_SECRET", ""),
                api_passphrase: env_string("OKX_API_PASSPHRASE", ""),
            },
            binance_base_url: env_string("BINANCE_BASE_URL", "https://api.binance.com"),
            optimizer,
            ensemble,
            genome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::Param;

    // Env-var tests mutate process state; keep them serialized in one test.
    #[test]
    fn test_from_env_defaults_and_overrides() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.venue, Venue::Okx);
        assert_eq!(config.genome.get(Param::WindowSize), 200.0);
        assert_eq!(config.optimizer.population_size, 50);

        // An override lands in the genome, clamped to its bound.
        unsafe {
            env::set_var("TRADEWIND_WINDOW_SIZE", "9999");
            env::set_var("TRADEWIND_LEVERAGE", "500");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.genome.get(Param::WindowSize), 500.0);
        assert_eq!(config.trade.leverage, 100.0);

        unsafe {
            env::set_var("TRADEWIND_WINDOW_SIZE", "not-a-number");
        }
        assert!(Config::from_env().is_err());

        unsafe {
            env::remove_var("TRADEWIND_WINDOW_SIZE");
            env::remove_var("TRADEWIND_LEVERAGE");
        }
    }
}
