use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire representation expected by the order endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a threshold trade
///
/// Pending -> Active -> Closed, with Cancelled reachable from Pending or Active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Waiting for price to fall to the entry threshold
    Pending,
    /// Bought, waiting for price to rise to the exit threshold
    Active,
    /// Sold, no longer tracked
    Closed,
    /// Removed by the user
    Cancelled,
}

impl TradeStatus {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (TradeStatus::Pending, TradeStatus::Active)
                | (TradeStatus::Active, TradeStatus::Closed)
                | (TradeStatus::Pending, TradeStatus::Cancelled)
                | (TradeStatus::Active, TradeStatus::Cancelled)
        )
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Active => "active",
            TradeStatus::Closed => "closed",
            TradeStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Registry-assigned trade identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// User request for a new threshold trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrade {
    pub pair: String,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
}

/// A threshold trade owned by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub pair: String,
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    /// Price at which the buy leg was filled, set on Pending -> Active
    pub entry_fill_price: Option<Decimal>,
}

impl Trade {
    /// Profit of selling the whole amount at `exit_fill`
    ///
    /// Falls back to the configured entry price when no fill was recorded.
    /// `None` when the result does not fit in a `Decimal`.
    pub fn realized_profit(&self, exit_fill: Decimal) -> Option<Decimal> {
        let entry = self.entry_fill_price.unwrap_or(self.entry_price);
        exit_fill.checked_sub(entry)?.checked_mul(self.amount)
    }
}

/// One price update from the trade stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub pair: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(pair: impl Into<String>, price: Decimal) -> Self {
        Self {
            pair: pair.into(),
            price,
            timestamp: Utc::now(),
        }
    }
}
