use thiserror::Error;

/// Errors from venue market-data APIs and the candle fetch pipeline
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("venue api error: {msg} (code {code})")]
    VenueApi { code: String, msg: String },

    #[error("invalid candle payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("candle fetch cancelled")]
    Cancelled,

    #[error("no fetch worker registered for venue {venue}")]
    WorkerUnavailable { venue: String },
}

/// Errors from simulated and live trading operations
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("trade already open")]
    TradeAlreadyOpen,

    #[error("no trade open")]
    NoTradeOpen,

    #[error("insufficient capital for trade after fees: need {need:.2}, available {available:.2}")]
    InsufficientCapital { need: f64, available: f64 },

    #[error("quantity {quantity:.6} is less than minimum order size {min_size:.6}")]
    BelowMinimumSize { quantity: f64, min_size: f64 },
}

/// Errors from model training, feature preparation and prediction
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no candle data received")]
    NoData,

    #[error("insufficient candle data: need at least {required} candles, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("indicator error: {0}")]
    Indicator(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("prediction error: {0}")]
    Prediction(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_data_error_formatting() {
        let err = MarketDataError::VenueApi {
            code: "51000".to_string(),
            msg: "parameter error".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("51000"));
        assert!(msg.contains("parameter error"));
    }

    #[test]
    fn test_model_error_formatting() {
        let err = ModelError::InsufficientData {
            required: 205,
            got: 40,
        };
        let msg = err.to_string();
        assert!(msg.contains("205"));
        assert!(msg.contains("40"));
    }
}
