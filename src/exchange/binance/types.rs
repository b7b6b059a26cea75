use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::errors::{ExchangeError, Result};

/// Binance `<symbol>@trade` stream message
///
/// Only the price is required; the remaining fields are optional so that
/// trimmed or proxied frames still parse.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradeStreamMessage {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,  // "trade"

    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,

    #[serde(rename = "s", default)]
    pub symbol: Option<String>,

    #[serde(rename = "p")]
    pub price: String,  // Price as string

    #[serde(rename = "q", default)]
    pub quantity: Option<String>,

    #[serde(rename = "T", default)]
    pub trade_time: Option<u64>,
}

impl TradeStreamMessage {
    /// Parse the string-encoded price
    pub fn parse_price(&self) -> Option<Decimal> {
        self.price.parse::<Decimal>().ok()
    }
}

/// Raw response from `POST /api/v3/order`
///
/// Success and error bodies share this shape: a filled order carries
/// `orderId`, a rejection carries `code` and `msg`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrderResponse {
    #[serde(rename = "orderId", default)]
    pub order_id: Option<u64>,

    #[serde(default)]
    pub symbol: Option<String>,

    #[serde(rename = "clientOrderId", default)]
    pub client_order_id: Option<String>,

    #[serde(rename = "executedQty", default)]
    pub executed_qty: Option<String>,

    #[serde(rename = "cummulativeQuoteQty", default)]
    pub cumulative_quote_qty: Option<String>,

    #[serde(default)]
    pub status: Option<String>,  // "NEW", "FILLED", etc.

    #[serde(default)]
    pub code: Option<i64>,

    #[serde(default)]
    pub msg: Option<String>,
}

/// Interpreted result of a successful order placement
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    pub order_id: u64,
    pub symbol: String,
    pub status: Option<String>,
    pub executed_qty: Option<Decimal>,
    /// Average fill price when the exchange reports quote and base quantities
    pub avg_price: Option<Decimal>,
}

impl OrderResponse {
    /// Classify a parsed order body
    ///
    /// An `orderId` means success; otherwise `msg` means the exchange rejected
    /// the order, and anything else is malformed.
    pub fn into_result(self, requested_symbol: &str) -> Result<OrderResult> {
        if let Some(order_id) = self.order_id {
            let executed_qty = self.executed_qty.as_deref().and_then(|q| q.parse::<Decimal>().ok());
            let quote_qty = self
                .cumulative_quote_qty
                .as_deref()
                .and_then(|q| q.parse::<Decimal>().ok());
            let avg_price = match (executed_qty, quote_qty) {
                // None on a zero base or an overflowing quotient
                (Some(base), Some(quote)) => quote.checked_div(base),
                _ => None,
            };

            return Ok(OrderResult {
                order_id,
                symbol: self.symbol.unwrap_or_else(|| requested_symbol.to_string()),
                status: self.status,
                executed_qty,
                avg_price,
            });
        }

        match self.msg {
            Some(msg) => Err(ExchangeError::ExchangeRejection { code: self.code, msg }),
            None => Err(ExchangeError::Parse("order response has neither orderId nor msg".into())),
        }
    }
}

/// One entry of the account `balances` array
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: String,
    #[serde(default)]
    pub locked: Option<String>,
}

/// Response from `GET /api/v3/account`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountResponse {
    pub balances: Vec<AssetBalance>,
}

impl AccountResponse {
    /// Free amount for `asset`, `None` when absent or unparsable
    pub fn free_balance(&self, asset: &str) -> Option<Decimal> {
        self.balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .and_then(|b| b.free.parse::<Decimal>().ok())
    }
}
