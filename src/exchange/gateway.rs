//! Order placement seam used by the trading engine
//!
//! `BinanceRestClient` talks to the real exchange; `PaperGateway` fills
//! every order locally for the simulated trading mode.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::info;

use crate::data::Side;
use crate::exchange::binance::types::OrderResult;
use crate::exchange::errors::Result;

/// Authenticated order and account calls against an exchange
///
/// Callers must not invoke `place_market_order` again for the same trade
/// until the previous call for it has resolved.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit one MARKET order. Exactly one attempt, no retry.
    async fn place_market_order(&self, pair: &str, side: Side, quantity: Decimal) -> Result<OrderResult>;

    /// Free balance of `asset`, zero when the account does not hold it
    async fn get_balance(&self, asset: &str) -> Result<Decimal>;

    /// Unauthenticated connectivity probe
    async fn ping(&self) -> Result<()>;
}

/// Order recorded by the paper gateway
#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub order_id: u64,
    pub pair: String,
    pub side: Side,
    pub quantity: Decimal,
}

/// Simulated gateway: every order fills immediately, nothing leaves the process
pub struct PaperGateway {
    next_order_id: AtomicU64,
    balance: Decimal,
    orders: Mutex<Vec<PaperOrder>>,
}

impl PaperGateway {
    pub fn new(balance: Decimal) -> Self {
        Self {
            next_order_id: AtomicU64::new(1),
            balance,
            orders: Mutex::new(Vec::new()),
        }
    }

    /// Orders submitted so far, oldest first
    pub async fn orders(&self) -> Vec<PaperOrder> {
        self.orders.lock().await.clone()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_market_order(&self, pair: &str, side: Side, quantity: Decimal) -> Result<OrderResult> {
        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        self.orders.lock().await.push(PaperOrder {
            order_id,
            pair: pair.to_string(),
            side,
            quantity,
        });

        info!("Simulated {} {} {} (paper order {})", side, quantity, pair, order_id);

        Ok(OrderResult {
            order_id,
            symbol: pair.to_string(),
            status: Some("FILLED".to_string()),
            executed_qty: Some(quantity),
            avg_price: None,
        })
    }

    async fn get_balance(&self, _asset: &str) -> Result<Decimal> {
        Ok(self.balance)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
