pub mod accounting;
pub mod data;
pub mod exchange;
pub mod trading;
pub mod utils;

// Re-export commonly used types
pub use accounting::{AccountState, AccountingLedger, WithdrawalPolicy};
pub use data::{NewTrade, PriceTick, Side, Trade, TradeId, TradeStatus};
pub use exchange::{
    BinanceRestClient, CredentialStore, ExchangeError, FeedEvent, MarketDataFeed, OrderGateway, PaperGateway,
};
pub use trading::{EngineConfig, EngineEvent, TradingEngine, TradeRegistry};
pub use utils::Config;
