use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A simulated or live position, created on open and finalized on close.
///
/// Immutable once closed; exclusively owned by a single trader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_price: f64,
    /// Leveraged notional size in quote currency.
    pub size: f64,
    pub is_long: bool,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    /// Signed fractional return on the leveraged size, net of fees.
    pub percentage_return: Option<f64>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit_price.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// An open position as reported by the venue account endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: PositionSide,
    pub margin_mode: String,
    pub leverage: f64,
    pub contracts: f64,
    pub average_price: f64,
    pub unrealised_pnl: f64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {:.0}x PX {:.6}/{:.6} UPnL {:.2}",
            self.instrument,
            self.side.to_string().to_uppercase(),
            self.leverage,
            self.contracts,
            self.average_price,
            self.unrealised_pnl
        )
    }
}

/// Market order request handed to the execution service.
///
/// `take_profit` / `stop_loss` are price-space fractions; the execution
/// service turns them into trigger prices around the fill.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub instrument: String,
    pub is_long: bool,
    /// Margin to commit, in quote currency.
    pub usdt: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub leverage: f64,
}

/// Identifier of a placed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub instrument: String,
    pub order_id: String,
}
