use crate::domain::metrics::ModelMetrics;
use chrono::Duration;
use rand::Rng;

/// Search-space definition for one tunable hyperparameter.
///
/// `integer` params are carried as f64 inside the genome (so crossover
/// averaging works uniformly) and rounded down when converted to typed
/// strategy params, mirroring how they are consumed.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub integer: bool,
}

impl ParamSpec {
    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min, self.max)
    }

    pub fn env_var(&self) -> String {
        format!("TRADEWIND_{}", self.name.to_uppercase())
    }
}

/// Gene indices into [`Genome::genes`]. Discriminants are array positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Param {
    WindowSize = 0,
    Lookahead,
    TakeProfit,
    StopLoss,
    CooldownSecs,
    MinTradeProbability,
    ShortMaLength,
    LongMaLength,
    LongRsiLength,
    ShortRsiLength,
    MacdFastLength,
    MacdSlowLength,
    MacdSignalWindow,
    FastMacdFastLength,
    FastMacdSlowLength,
    FastMacdSignalWindow,
    BollingerWindow,
    BollingerMultiplier,
    StochasticWindow,
    SlowAtrPeriod,
    FastAtrPeriod,
    ObvMaLength,
    VolumeMaLength,
    MoneyFlowIndexPeriod,
    RateOfChangePeriod,
    CciPeriod,
    WilliamsRPeriod,
    PriceChangeFastPeriod,
    PriceChangeMediumPeriod,
    PriceChangeSlowPeriod,
    RsiUpperBound,
    RsiLowerBound,
    RsiSlope,
    TrainDays,
    NumTreesLog2,
    MaxTreeDepth,
}

pub const PARAM_COUNT: usize = 36;

const fn int_spec(name: &'static str, min: f64, max: f64, default: f64) -> ParamSpec {
    ParamSpec { name, min, max, default, integer: true }
}

const fn float_spec(name: &'static str, min: f64, max: f64, default: f64) -> ParamSpec {
    ParamSpec { name, min, max, default, integer: false }
}

/// Documented [min, max] bound and operator default for every gene, in
/// [`Param`] order. Take-profit and stop-loss are price-space fractions
/// (unleveraged); the take-profit floor covers a round trip of fees.
pub const PARAM_SPECS: [ParamSpec; PARAM_COUNT] = [
    int_spec("window_size", 50.0, 500.0, 200.0),
    int_spec("lookahead", 1.0, 50.0, 5.0),
    float_spec("take_profit", 0.002, 0.05, 0.008),
    float_spec("stop_loss", 0.001, 0.01, 0.002),
    int_spec("cooldown_secs", 0.0, 3600.0, 300.0),
    float_spec("min_trade_probability", 0.3, 1.0, 0.5),
    int_spec("short_ma_length", 10.0, 100.0, 50.0),
    int_spec("long_ma_length", 50.0, 400.0, 200.0),
    int_spec("long_rsi_length", 10.0, 50.0, 14.0),
    int_spec("short_rsi_length", 2.0, 14.0, 5.0),
    int_spec("macd_fast_length", 5.0, 20.0, 12.0),
    int_spec("macd_slow_length", 20.0, 50.0, 26.0),
    int_spec("macd_signal_window", 5.0, 15.0, 9.0),
    int_spec("fast_macd_fast_length", 3.0, 10.0, 5.0),
    int_spec("fast_macd_slow_length", 20.0, 50.0, 35.0),
    int_spec("fast_macd_signal_window", 3.0, 12.0, 5.0),
    int_spec("bollinger_window", 10.0, 50.0, 20.0),
    float_spec("bollinger_multiplier", 1.5, 3.5, 2.0),
    int_spec("stochastic_window", 5.0, 30.0, 14.0),
    int_spec("slow_atr_period", 10.0, 50.0, 14.0),
    int_spec("fast_atr_period", 10.0, 30.0, 20.0),
    int_spec("obv_ma_length", 10.0, 50.0, 20.0),
    int_spec("volume_ma_length", 10.0, 50.0, 20.0),
    int_spec("money_flow_index_period", 10.0, 40.0, 14.0),
    int_spec("rate_of_change_period", 10.0, 50.0, 14.0),
    int_spec("cci_period", 10.0, 50.0, 20.0),
    int_spec("williams_r_period", 10.0, 30.0, 14.0),
    int_spec("price_change_fast_period", 10.0, 100.0, 60.0),
    int_spec("price_change_medium_period", 50.0, 500.0, 240.0),
    int_spec("price_change_slow_period", 500.0, 2000.0, 1440.0),
    float_spec("rsi_upper_bound", 40.0, 80.0, 50.0),
    float_spec("rsi_lower_bound", 20.0, 60.0, 50.0),
    int_spec("rsi_slope", 1.0, 20.0, 3.0),
    int_spec("train_days", 2.0, 60.0, 14.0),
    int_spec("num_trees_log2", 3.0, 8.0, 6.0),
    int_spec("max_tree_depth", 4.0, 16.0, 10.0),
];

/// Account-level settings that are fixed per deployment and not subject
/// to evolutionary search.
#[derive(Debug, Clone, Copy)]
pub struct TradeSettings {
    pub leverage: f64,
    /// Round-trip commission as a fraction of notional.
    pub commission: f64,
    pub trade_multiplier: f64,
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            leverage: 50.0,
            commission: 0.001,
            trade_multiplier: 1.0,
        }
    }
}

/// One strategy candidate under evolutionary search: an instrument plus a
/// fixed-width vector of bounded hyperparameters, with the metrics of its
/// last evaluation attached.
///
/// All writes go through [`ParamSpec::clamp`], so a genome never leaves
/// its documented bounds no matter the sequence of mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct Genome {
    pub instrument: String,
    genes: [f64; PARAM_COUNT],
    pub metrics: ModelMetrics,
}

fn rand_percent<R: Rng + ?Sized>(rng: &mut R, dev: f64) -> f64 {
    1.0 + (rng.random::<f64>() * (2.0 * dev) - dev) / 100.0
}

impl Genome {
    /// Genome at the documented defaults.
    pub fn new(instrument: &str) -> Self {
        let mut genes = [0.0; PARAM_COUNT];
        for (gene, spec) in genes.iter_mut().zip(PARAM_SPECS.iter()) {
            *gene = spec.default;
        }
        Self {
            instrument: instrument.to_string(),
            genes,
            metrics: ModelMetrics::default(),
        }
    }

    /// Genome from a raw gene vector; every value is clamped to its bound.
    pub fn from_genes(instrument: &str, genes: [f64; PARAM_COUNT]) -> Self {
        let mut genome = Genome::new(instrument);
        for (i, value) in genes.into_iter().enumerate() {
            genome.genes[i] = PARAM_SPECS[i].clamp(value);
        }
        genome
    }

    pub fn get(&self, param: Param) -> f64 {
        self.genes[param as usize]
    }

    pub fn set(&mut self, param: Param, value: f64) {
        self.genes[param as usize] = PARAM_SPECS[param as usize].clamp(value);
    }

    pub fn genes(&self) -> &[f64; PARAM_COUNT] {
        &self.genes
    }

    pub fn fitness(&self) -> f64 {
        self.metrics.fitness()
    }

    /// Perturb every gene by ×(1 ± U(0, dev%)) and re-clamp.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R, dev: f64) {
        for (gene, spec) in self.genes.iter_mut().zip(PARAM_SPECS.iter()) {
            *gene = spec.clamp(*gene * rand_percent(rng, dev));
        }
    }

    /// With probability `mutation_rate`, apply a 5% randomization pass.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, mutation_rate: f64) {
        if rng.random::<f64>() < mutation_rate {
            self.randomize(rng, 5.0);
        }
    }

    /// Breed a child: per gene inherit from parent 1 (40%), parent 2
    /// (40%), or their average (20%).
    pub fn crossover<R: Rng + ?Sized>(parent1: &Genome, parent2: &Genome, rng: &mut R) -> Genome {
        let parent1 = if parent1.instrument != parent2.instrument {
            parent2
        } else {
            parent1
        };

        let mut child = Genome::new(&parent1.instrument);
        for i in 0..PARAM_COUNT {
            let r = rng.random::<f64>();
            let value = if r < 0.4 {
                parent1.genes[i]
            } else if r < 0.8 {
                parent2.genes[i]
            } else {
                (parent1.genes[i] + parent2.genes[i]) / 2.0
            };
            child.genes[i] = PARAM_SPECS[i].clamp(value);
        }
        child
    }

    /// Typed view consumed by the feature pipeline, trader and classifier.
    pub fn params(&self, trade: &TradeSettings) -> StrategyParams {
        let int = |p: Param| self.get(p) as usize;
        StrategyParams {
            instrument: self.instrument.clone(),
            window_size: int(Param::WindowSize),
            lookahead: int(Param::Lookahead),
            take_profit: self.get(Param::TakeProfit),
            stop_loss: self.get(Param::StopLoss),
            leverage: trade.leverage,
            commission: trade.commission,
            trade_multiplier: trade.trade_multiplier,
            cooldown: Duration::seconds(self.get(Param::CooldownSecs) as i64),
            min_trade_probability: self.get(Param::MinTradeProbability),
            short_ma_length: int(Param::ShortMaLength),
            long_ma_length: int(Param::LongMaLength),
            long_rsi_length: int(Param::LongRsiLength),
            short_rsi_length: int(Param::ShortRsiLength),
            macd_fast_length: int(Param::MacdFastLength),
            macd_slow_length: int(Param::MacdSlowLength),
            macd_signal_window: int(Param::MacdSignalWindow),
            fast_macd_fast_length: int(Param::FastMacdFastLength),
            fast_macd_slow_length: int(Param::FastMacdSlowLength),
            fast_macd_signal_window: int(Param::FastMacdSignalWindow),
            bollinger_window: int(Param::BollingerWindow),
            bollinger_multiplier: self.get(Param::BollingerMultiplier),
            stochastic_window: int(Param::StochasticWindow),
            slow_atr_period: int(Param::SlowAtrPeriod),
            fast_atr_period: int(Param::FastAtrPeriod),
            obv_ma_length: int(Param::ObvMaLength),
            volume_ma_length: int(Param::VolumeMaLength),
            money_flow_index_period: int(Param::MoneyFlowIndexPeriod),
            rate_of_change_period: int(Param::RateOfChangePeriod),
            cci_period: int(Param::CciPeriod),
            williams_r_period: int(Param::WilliamsRPeriod),
            price_change_fast_period: int(Param::PriceChangeFastPeriod),
            price_change_medium_period: int(Param::PriceChangeMediumPeriod),
            price_change_slow_period: int(Param::PriceChangeSlowPeriod),
            rsi_upper_bound: self.get(Param::RsiUpperBound),
            rsi_lower_bound: self.get(Param::RsiLowerBound),
            rsi_slope: int(Param::RsiSlope),
            train_days: self.get(Param::TrainDays) as i64,
            num_trees: 1 << (self.get(Param::NumTreesLog2) as usize),
            max_tree_depth: self.get(Param::MaxTreeDepth) as u16,
        }
    }

    /// Genes as `TRADEWIND_*=value` lines, the format the operator feeds
    /// back through the environment.
    pub fn env_lines(&self) -> Vec<String> {
        self.genes
            .iter()
            .zip(PARAM_SPECS.iter())
            .map(|(gene, spec)| {
                if spec.integer {
                    format!("{}={}", spec.env_var(), *gene as i64)
                } else {
                    format!("{}={:.4}", spec.env_var(), gene)
                }
            })
            .collect()
    }
}

/// Fully typed hyperparameter set for a single model.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub instrument: String,
    pub window_size: usize,
    pub lookahead: usize,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub leverage: f64,
    pub commission: f64,
    pub trade_multiplier: f64,
    pub cooldown: Duration,
    pub min_trade_probability: f64,
    pub short_ma_length: usize,
    pub long_ma_length: usize,
    pub long_rsi_length: usize,
    pub short_rsi_length: usize,
    pub macd_fast_length: usize,
    pub macd_slow_length: usize,
    pub macd_signal_window: usize,
    pub fast_macd_fast_length: usize,
    pub fast_macd_slow_length: usize,
    pub fast_macd_signal_window: usize,
    pub bollinger_window: usize,
    pub bollinger_multiplier: f64,
    pub stochastic_window: usize,
    pub slow_atr_period: usize,
    pub fast_atr_period: usize,
    pub obv_ma_length: usize,
    pub volume_ma_length: usize,
    pub money_flow_index_period: usize,
    pub rate_of_change_period: usize,
    pub cci_period: usize,
    pub williams_r_period: usize,
    pub price_change_fast_period: usize,
    pub price_change_medium_period: usize,
    pub price_change_slow_period: usize,
    pub rsi_upper_bound: f64,
    pub rsi_lower_bound: f64,
    pub rsi_slope: usize,
    pub train_days: i64,
    pub num_trees: usize,
    pub max_tree_depth: u16,
}

impl StrategyParams {
    /// Candles required before a range can be used for training: the
    /// feature window plus the label look-ahead.
    pub fn required_candles(&self) -> usize {
        self.window_size + self.lookahead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn within_bounds(genome: &Genome) -> bool {
        genome
            .genes()
            .iter()
            .zip(PARAM_SPECS.iter())
            .all(|(gene, spec)| *gene >= spec.min && *gene <= spec.max)
    }

    #[test]
    fn test_defaults_within_bounds() {
        assert!(within_bounds(&Genome::new("DOGE-USDT-SWAP")));
    }

    #[test]
    fn test_bounds_hold_after_repeated_randomization() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut genome = Genome::new("DOGE-USDT-SWAP");
        for _ in 0..200 {
            genome.randomize(&mut rng, 25.0);
            assert!(within_bounds(&genome));
        }
    }

    #[test]
    fn test_bounds_hold_after_crossover_and_mutation() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut a = Genome::new("DOGE-USDT-SWAP");
        let mut b = Genome::new("DOGE-USDT-SWAP");
        a.randomize(&mut rng, 25.0);
        b.randomize(&mut rng, 25.0);

        for _ in 0..100 {
            let mut child = Genome::crossover(&a, &b, &mut rng);
            child.mutate(&mut rng, 1.0);
            assert!(within_bounds(&child));
            a = b;
            b = child;
        }
    }

    #[test]
    fn test_crossover_genes_come_from_parents() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut a = Genome::new("DOGE-USDT-SWAP");
        let mut b = Genome::new("DOGE-USDT-SWAP");
        a.set(Param::WindowSize, 100.0);
        b.set(Param::WindowSize, 300.0);

        for _ in 0..50 {
            let child = Genome::crossover(&a, &b, &mut rng);
            let w = child.get(Param::WindowSize);
            assert!(
                w == 100.0 || w == 300.0 || w == 200.0,
                "unexpected crossover value {}",
                w
            );
        }
    }

    #[test]
    fn test_crossover_instrument_mismatch_prefers_second_parent() {
        let mut rng = StdRng::seed_from_u64(5);
        let a = Genome::new("DOGE-USDT-SWAP");
        let b = Genome::new("BTC-USDT-SWAP");
        let child = Genome::crossover(&a, &b, &mut rng);
        assert_eq!(child.instrument, "BTC-USDT-SWAP");
    }

    #[test]
    fn test_set_clamps() {
        let mut genome = Genome::new("DOGE-USDT-SWAP");
        genome.set(Param::WindowSize, 10_000.0);
        assert_eq!(genome.get(Param::WindowSize), 500.0);
        genome.set(Param::StopLoss, -1.0);
        assert_eq!(genome.get(Param::StopLoss), 0.001);
    }

    #[test]
    fn test_params_conversion() {
        let genome = Genome::new("DOGE-USDT-SWAP");
        let params = genome.params(&TradeSettings::default());
        assert_eq!(params.window_size, 200);
        assert_eq!(params.num_trees, 64);
        assert_eq!(params.cooldown, Duration::seconds(300));
        assert_eq!(params.required_candles(), 205);
    }

    #[test]
    fn test_env_lines_format() {
        let genome = Genome::new("DOGE-USDT-SWAP");
        let lines = genome.env_lines();
        assert_eq!(lines.len(), PARAM_COUNT);
        assert!(lines.contains(&"TRADEWIND_WINDOW_SIZE=200".to_string()));
        assert!(lines.contains(&"TRADEWIND_TAKE_PROFIT=0.0080".to_string()));
    }
}
