pub mod types;

pub use types::{NewTrade, PriceTick, Side, Trade, TradeId, TradeStatus};
