mod candle_repository;
mod database;

pub use candle_repository::{InMemoryCandleRepository, SqliteCandleRepository};
pub use database::Database;
