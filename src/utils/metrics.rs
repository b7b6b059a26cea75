//! Prometheus metrics for the trading engine
//!
//! Each engine owns its own registry so several sessions (and tests) can run
//! in one process without name collisions.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    pub ticks_received: IntCounter,
    pub orders_submitted: IntCounter,
    pub orders_failed: IntCounter,
    pub trades_closed: IntCounter,
    pub tracked_trades: IntGauge,
    pub cumulative_profit: Gauge,
}

impl EngineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let ticks_received = IntCounter::new("spot_trader_ticks_received_total", "Price ticks received")?;
        let orders_submitted = IntCounter::new("spot_trader_orders_submitted_total", "Market orders submitted")?;
        let orders_failed = IntCounter::new("spot_trader_orders_failed_total", "Market orders that failed")?;
        let trades_closed = IntCounter::new("spot_trader_trades_closed_total", "Trades closed by a filled sell")?;
        let tracked_trades = IntGauge::new("spot_trader_tracked_trades", "Pending and active trades")?;
        let cumulative_profit = Gauge::new("spot_trader_cumulative_profit", "Tracked cumulative profit")?;

        registry.register(Box::new(ticks_received.clone()))?;
        registry.register(Box::new(orders_submitted.clone()))?;
        registry.register(Box::new(orders_failed.clone()))?;
        registry.register(Box::new(trades_closed.clone()))?;
        registry.register(Box::new(tracked_trades.clone()))?;
        registry.register(Box::new(cumulative_profit.clone()))?;

        Ok(Self {
            registry,
            ticks_received,
            orders_submitted,
            orders_failed,
            trades_closed,
            tracked_trades,
            cumulative_profit,
        })
    }

    pub fn set_cumulative_profit(&self, profit: Decimal) {
        self.cumulative_profit.set(profit.to_f64().unwrap_or(0.0));
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if TextEncoder::new().encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
