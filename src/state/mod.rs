pub mod market_stats;
pub mod wallet_cache;

pub use market_stats::MarketStats;
pub use wallet_cache::WalletCache;
