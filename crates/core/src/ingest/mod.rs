pub mod fetcher;
pub mod gateway;
pub mod source;

#[cfg(test)]
pub(crate) mod fake;

pub use fetcher::{DayFetch, DayFetcher};
pub use gateway::HttpGatewaySource;
pub use source::{ChangeCounts, MarketDataSource, SourceError};
