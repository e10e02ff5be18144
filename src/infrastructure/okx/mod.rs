mod execution;
mod market_data;

pub use execution::{OkxCredentials, OkxExecutionService};
pub use market_data::OkxMarketDataService;
