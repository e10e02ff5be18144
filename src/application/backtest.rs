//! Paper-trading simulation.
//!
//! A [`PaperTrader`] is a one-position state machine (flat -> open ->
//! flat) driven candle by candle; [`run_backtest`] wraps it with a
//! decision callback and derives window metrics, and
//! [`sample_backtest_windows`] picks the stratified windows the deep
//! backtest aggregates over.

use crate::domain::candle::Candle;
use crate::domain::errors::TradingError;
use crate::domain::metrics::BacktestMetrics;
use crate::domain::signal::Signal;
use crate::domain::strategy::StrategyParams;
use crate::domain::trade::Trade;
use chrono::{DateTime, Days, Duration, Months, Utc};
use rand::Rng;

pub const BACKTEST_STARTING_CAPITAL: f64 = 10_000.0;

/// Simulates leveraged trades against a candle stream, one open position
/// at a time.
pub struct PaperTrader {
    pub capital: f64,
    pub starting_capital: f64,
    pub open_trade: Option<Trade>,
    pub closed_trades: Vec<Trade>,
    stop_loss_percent: f64,
    take_profit_percent: f64,
    trade_fee_percent: f64,
    leverage: f64,
    cooldown: Duration,
    not_before: Option<DateTime<Utc>>,
}

impl PaperTrader {
    pub fn new(
        starting_capital: f64,
        stop_loss_percent: f64,
        take_profit_percent: f64,
        trade_fee_percent: f64,
        leverage: f64,
        cooldown: Duration,
    ) -> Self {
        Self {
            capital: starting_capital,
            starting_capital,
            open_trade: None,
            closed_trades: Vec::new(),
            stop_loss_percent,
            take_profit_percent,
            trade_fee_percent,
            leverage,
            cooldown,
            not_before: None,
        }
    }

    /// Open a leveraged position at `entry_price`. Entry fee is deducted
    /// immediately; stop-loss and take-profit are fixed offsets from the
    /// entry, mirrored for shorts.
    pub fn add_trade(
        &mut self,
        entry_price: f64,
        is_long: bool,
        entry_time: DateTime<Utc>,
    ) -> Result<&Trade, TradingError> {
        if self.open_trade.is_some() {
            return Err(TradingError::TradeAlreadyOpen);
        }

        let max_trade_capital = self.capital / (1.0 + self.trade_fee_percent * self.leverage);
        let trade_size = max_trade_capital * self.leverage;

        let (stop_loss, take_profit) = if is_long {
            (
                entry_price * (1.0 - self.stop_loss_percent),
                entry_price * (1.0 + self.take_profit_percent),
            )
        } else {
            (
                entry_price * (1.0 + self.stop_loss_percent),
                entry_price * (1.0 - self.take_profit_percent),
            )
        };

        let fee = trade_size * self.trade_fee_percent;
        if self.capital < fee {
            return Err(TradingError::InsufficientCapital {
                need: fee,
                available: self.capital,
            });
        }
        self.capital -= fee;

        self.open_trade = Some(Trade {
            entry_price,
            size: trade_size,
            is_long,
            stop_loss,
            take_profit,
            entry_time,
            exit_time: None,
            exit_price: None,
            percentage_return: None,
        });

        Ok(self.open_trade.as_ref().expect("trade was just opened"))
    }

    /// Process one candle. While flat, `decide` is consulted once and a
    /// non-Hold signal opens a position (subject to the cooldown); while
    /// open, the stop-loss is checked before the take-profit so an
    /// ambiguous candle resolves to the worst case.
    pub fn iterate(&mut self, candle: &Candle, decide: impl FnOnce(&Candle) -> Signal) {
        let (is_long, stop_loss, take_profit) = match &self.open_trade {
            None => {
                let signal = decide(candle);
                if signal != Signal::Hold
                    && self.not_before.is_none_or(|t| t < candle.timestamp)
                {
                    self.not_before = Some(candle.timestamp + self.cooldown);
                    self.add_trade(candle.close, signal == Signal::Long, candle.timestamp)
                        .ok();
                }
                return;
            }
            Some(trade) => (trade.is_long, trade.stop_loss, trade.take_profit),
        };

        if (is_long && candle.low < stop_loss) || (!is_long && candle.high > stop_loss) {
            self.close_trade(stop_loss, candle.timestamp).ok();
            return;
        }

        if (is_long && candle.high > take_profit) || (!is_long && candle.low < take_profit) {
            self.close_trade(take_profit, candle.timestamp).ok();
        }
    }

    /// Close the open position at `exit_price`, realizing signed PnL and
    /// the exit fee. Capital is floored at zero.
    pub fn close_trade(
        &mut self,
        exit_price: f64,
        exit_time: DateTime<Utc>,
    ) -> Result<(), TradingError> {
        let Some(mut trade) = self.open_trade.take() else {
            return Err(TradingError::NoTradeOpen);
        };

        let mut pnl = (exit_price - trade.entry_price) / trade.entry_price;
        if !trade.is_long {
            pnl *= -1.0;
        }

        let profit_loss = trade.size * pnl;
        let fee = trade.size * self.trade_fee_percent;

        self.capital += profit_loss - fee;
        if self.capital < 0.0 {
            self.capital = 0.0;
        }

        trade.exit_price = Some(exit_price);
        trade.exit_time = Some(exit_time);
        trade.percentage_return =
            Some(pnl * (1.0 - self.trade_fee_percent * 2.0 * self.leverage));
        self.closed_trades.push(trade);

        Ok(())
    }

    /// Total profit/loss over starting capital, in percent.
    pub fn pnl(&self) -> f64 {
        (self.capital - self.starting_capital) / self.starting_capital * 100.0
    }

    /// Worst peak-to-trough equity decline in percent, replaying the
    /// closed trades with both entry and exit fees applied.
    pub fn max_drawdown(&self) -> f64 {
        if self.closed_trades.is_empty() {
            return 0.0;
        }

        let mut max_capital = self.starting_capital;
        let mut max_drawdown: f64 = 0.0;
        let mut current_capital = self.starting_capital;

        for trade in &self.closed_trades {
            let exit_price = trade.exit_price.unwrap_or(trade.entry_price);
            let pnl = if trade.is_long {
                trade.size * ((exit_price - trade.entry_price) / trade.entry_price)
            } else {
                trade.size * ((trade.entry_price - exit_price) / trade.entry_price)
            };
            let trade_fees = trade.size * self.trade_fee_percent * 2.0;

            current_capital += pnl - trade_fees;
            if current_capital > max_capital {
                max_capital = current_capital;
            }

            let drawdown = (max_capital - current_capital) / max_capital;
            max_drawdown = max_drawdown.max(drawdown);
        }

        max_drawdown * 100.0
    }

    /// Mean over standard deviation of per-trade returns, with >3σ
    /// outliers discarded before the deviation is measured.
    pub fn sharpe_ratio(&self, risk_free_rate: f64) -> f64 {
        if self.closed_trades.is_empty() {
            return 0.0;
        }

        let returns: Vec<f64> = self
            .closed_trades
            .iter()
            .filter_map(|t| t.percentage_return)
            .collect();
        if returns.is_empty() {
            return 0.0;
        }

        let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;

        let filtered = filter_outliers(&returns, 3.0);
        let variance: f64 = filtered.iter().map(|r| (r - mean_return).powi(2)).sum();
        let std_dev = (variance / filtered.len() as f64).sqrt();

        if std_dev < 1e-6 {
            return 0.0;
        }

        (mean_return - risk_free_rate) / std_dev
    }

    /// Mean return over downside deviation from the risk-free rate. A
    /// window with no losing trades gets the sentinel 5.0 rather than
    /// infinity.
    pub fn sortino_ratio(&self, risk_free_rate: f64) -> f64 {
        if self.closed_trades.is_empty() {
            return 0.0;
        }

        let returns: Vec<f64> = self
            .closed_trades
            .iter()
            .filter_map(|t| t.percentage_return)
            .collect();
        if returns.is_empty() {
            return 0.0;
        }

        let downside_squared_sum: f64 = returns
            .iter()
            .map(|r| (r - risk_free_rate).min(0.0).powi(2))
            .sum();
        let downside_deviation = (downside_squared_sum / returns.len() as f64).sqrt();

        if downside_deviation < 1e-6 {
            return 5.0;
        }

        let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
        (mean_return - risk_free_rate) / downside_deviation
    }
}

/// Drop returns more than `ratio` standard deviations from the mean. If
/// everything is an outlier, keep the mean so the caller has one value.
fn filter_outliers(values: &[f64], ratio: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let std_dev = variance.sqrt();

    let lower = mean - ratio * std_dev;
    let upper = mean + ratio * std_dev;

    let filtered: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| *v >= lower && *v <= upper)
        .collect();

    if filtered.is_empty() {
        return vec![mean];
    }
    filtered
}

/// Drive a trader over `candles` (which include `window_size` warm-up
/// candles that are only simulated, never decided on) and derive the
/// window's metrics. `days` is the decided span in days; PnL is
/// compounded to a per-day figure.
pub fn run_backtest(
    candles: &[Candle],
    params: &StrategyParams,
    days: f64,
    mut decide: impl FnMut(usize, &Candle) -> Signal,
) -> BacktestMetrics {
    let mut trader = PaperTrader::new(
        BACKTEST_STARTING_CAPITAL,
        params.stop_loss,
        params.take_profit,
        params.commission / 2.0,
        params.leverage,
        params.cooldown,
    );

    for i in params.window_size..candles.len() {
        let candle = &candles[i];
        trader.iterate(candle, |c| decide(i, c));
    }

    BacktestMetrics {
        pnl: ((1.0 + trader.pnl() / 100.0).powf(1.0 / days) - 1.0) * 100.0,
        max_drawdown: trader.max_drawdown(),
        sharpe_ratio: trader.sharpe_ratio(0.0),
        sortino_ratio: trader.sortino_ratio(0.0),
        trades: trader.closed_trades.len() as f64 / days,
    }
}

/// One historical evaluation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacktestWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BacktestWindow {
    pub fn days(&self) -> f64 {
        (self.end - self.start).num_minutes() as f64 / (24.0 * 60.0)
    }
}

/// Sample the stratified deep-backtest windows: for each of the last 4
/// quarters, one 7-, 14- and 28-day window at a random offset of up to
/// 60 days before the quarter mark. Spreading windows across regimes
/// keeps fitness from overfitting a single market phase.
pub fn sample_backtest_windows<R: Rng + ?Sized>(
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<BacktestWindow> {
    let mut windows = Vec::with_capacity(12);

    for quarter in 0..4u32 {
        let quarter_mark = now
            .checked_sub_months(Months::new(3 * quarter))
            .unwrap_or(now);

        for days in [7u64, 14, 28] {
            let offset = (rng.random::<f64>() * 60.0) as u64 + days;
            let start = quarter_mark
                .checked_sub_days(Days::new(offset))
                .unwrap_or(quarter_mark);
            let end = start.checked_add_days(Days::new(days)).unwrap_or(start);
            windows.push(BacktestWindow { start, end });
        }
    }

    windows
}
