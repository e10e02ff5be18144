//! Scripted market scenarios against the paper-trading backtester.

use chrono::{Duration, TimeZone, Utc};

use tradewind::application::backtest::run_backtest;
use tradewind::domain::candle::{Candle, Venue};
use tradewind::domain::signal::Signal;
use tradewind::domain::strategy::{Genome, Param, TradeSettings};

const INSTRUMENT: &str = "DOGE-USDT-SWAP";

fn candle(minute: i64, price: f64) -> Candle {
    Candle {
        timestamp: Utc.timestamp_opt(minute * 60, 0).unwrap(),
        instrument: INSTRUMENT.to_string(),
        venue: Venue::Okx,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 100.0,
    }
}

/// 600 flat minutes with a scripted +5% ramp starting at candle 400.
fn scripted_candles() -> Vec<Candle> {
    (0..600)
        .map(|i| {
            let price = if i < 400 {
                1.0
            } else {
                // Ramp from 1.0 to 1.05 over 50 candles, then plateau.
                1.0 + 0.05 * (((i - 400) as f64 / 50.0).min(1.0))
            };
            candle(i, price)
        })
        .collect()
}

#[test]
fn test_scripted_move_yields_exactly_one_long_winner() {
    let mut genome = Genome::new(INSTRUMENT);
    genome.set(Param::WindowSize, 200.0);
    let trade = TradeSettings {
        leverage: 50.0,
        commission: 0.001,
        trade_multiplier: 1.0,
    };
    let mut params = genome.params(&trade);
    // 4% take-profit at the trade level: 0.04 / leverage in price space.
    params.take_profit = 0.04 / trade.leverage;
    params.stop_loss = 0.01 / trade.leverage;
    params.cooldown = Duration::minutes(5);

    let candles = scripted_candles();
    let days = (candles.len() - params.window_size) as f64 / (24.0 * 60.0);

    let metrics = run_backtest(&candles, &params, days, |i, _| {
        if i == 399 { Signal::Long } else { Signal::Hold }
    });

    // Exactly one closed trade over the window...
    let trades_total = metrics.trades * days;
    assert!(
        (trades_total - 1.0).abs() < 1e-9,
        "expected exactly one closed trade, got {}",
        trades_total
    );
    // ...and a profitable long: positive per-day PnL and no drawdown.
    assert!(metrics.pnl > 0.0);
    assert_eq!(metrics.max_drawdown, 0.0);
    // A single winning trade has no downside deviation.
    assert_eq!(metrics.sortino_ratio, 5.0);
}

#[test]
fn test_scripted_move_trade_details() {
    use tradewind::application::backtest::PaperTrader;

    let trade = TradeSettings::default();
    let take_profit = 0.04 / trade.leverage;
    let stop_loss = 0.01 / trade.leverage;

    let mut trader = PaperTrader::new(
        10_000.0,
        stop_loss,
        take_profit,
        trade.commission / 2.0,
        trade.leverage,
        Duration::minutes(5),
    );

    let candles = scripted_candles();
    for (i, c) in candles.iter().enumerate().skip(200) {
        trader.iterate(c, |_| if i == 399 { Signal::Long } else { Signal::Hold });
    }

    assert!(trader.open_trade.is_none());
    assert_eq!(trader.closed_trades.len(), 1);

    let closed = &trader.closed_trades[0];
    assert!(closed.is_long);
    assert!(closed.percentage_return.unwrap() > 0.0);
    // Closed at the take-profit trigger, which the +5% move overshoots.
    assert!((closed.exit_price.unwrap() - closed.take_profit).abs() < 1e-12);
    assert!(closed.exit_time.unwrap() > closed.entry_time);
    // The winning leveraged trade grows capital.
    assert!(trader.capital > trader.starting_capital);
}

#[test]
fn test_downtrend_stops_out_a_long() {
    let trade = TradeSettings::default();
    let mut genome = Genome::new(INSTRUMENT);
    genome.set(Param::WindowSize, 50.0);
    let mut params = genome.params(&trade);
    params.take_profit = 0.04 / trade.leverage;
    params.stop_loss = 0.01 / trade.leverage;

    // Steady decline after candle 100.
    let candles: Vec<Candle> = (0..300)
        .map(|i| {
            let price = if i < 100 {
                1.0
            } else {
                1.0 - 0.0005 * (i - 100) as f64
            };
            candle(i, price)
        })
        .collect();

    let days = 1.0;
    let metrics = run_backtest(&candles, &params, days, |i, _| {
        if i == 99 { Signal::Long } else { Signal::Hold }
    });

    assert_eq!(metrics.trades, 1.0);
    assert!(metrics.pnl < 0.0);
    assert!(metrics.max_drawdown > 0.0);
}
