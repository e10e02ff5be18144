pub mod binance;
pub mod candle_store;
pub mod http_client_factory;
pub mod okx;
pub mod persistence;
pub mod reporting;
