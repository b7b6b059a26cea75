//! Threshold trade registry
//!
//! Owns every trade and is the only place its status changes. Evaluation
//! claims trades by marking an order in flight, so a trade never has two
//! outstanding orders.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::{NewTrade, Side, Trade, TradeId, TradeStatus};
use crate::utils::config::PairRules;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("unknown trade {0}")]
    UnknownTrade(TradeId),

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error("amount {amount} below {pair} minimum {minimum}")]
    BelowMinimum {
        pair: String,
        amount: Decimal,
        minimum: Decimal,
    },

    #[error("trade {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TradeId,
        from: TradeStatus,
        to: TradeStatus,
    },

    #[error("trade {0} has no {1} order in flight")]
    NoOrderInFlight(TradeId, Side),
}

/// Order the engine must submit for a claimed trade
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub trade_id: TradeId,
    pub pair: String,
    pub side: Side,
    pub quantity: Decimal,
    /// Tick price that crossed the threshold
    pub trigger_price: Decimal,
}

/// Status change applied by the registry
#[derive(Debug, Clone, PartialEq)]
pub struct TradeTransition {
    pub from: TradeStatus,
    pub to: TradeStatus,
    /// Trade after the change
    pub trade: Trade,
}

#[derive(Debug, Clone)]
struct TrackedTrade {
    trade: Trade,
    in_flight: Option<Side>,
}

/// Pending and Active trades in creation order, plus terminal history
#[derive(Debug, Default)]
pub struct TradeRegistry {
    tracked: Vec<TrackedTrade>,
    history: Vec<Trade>,
    rules: HashMap<String, PairRules>,
    next_id: u64,
}

impl TradeRegistry {
    pub fn new() -> Self {
        Self::with_rules(HashMap::new())
    }

    /// Registry enforcing per-pair minimum size and price precision
    pub fn with_rules(rules: HashMap<String, PairRules>) -> Self {
        let rules = rules.into_iter().map(|(k, v)| (k.to_uppercase(), v)).collect();
        Self {
            tracked: Vec::new(),
            history: Vec::new(),
            rules,
            next_id: 1,
        }
    }

    /// Register a new Pending trade
    pub fn add(&mut self, request: NewTrade) -> Result<TradeId, RegistryError> {
        let pair = request.pair.trim().to_uppercase();
        if pair.is_empty() {
            return Err(RegistryError::InvalidTrade("pair is empty".into()));
        }
        if request.amount <= Decimal::ZERO {
            return Err(RegistryError::InvalidTrade(format!("amount must be positive, got {}", request.amount)));
        }

        let (mut entry_price, mut exit_price) = (request.entry_price, request.exit_price);
        if let Some(rules) = self.rules.get(&pair) {
            if request.amount < rules.min_trade_amount {
                return Err(RegistryError::BelowMinimum {
                    pair,
                    amount: request.amount,
                    minimum: rules.min_trade_amount,
                });
            }
            entry_price = entry_price.round_dp(rules.price_precision);
            exit_price = exit_price.round_dp(rules.price_precision);
        }

        if entry_price <= Decimal::ZERO || exit_price <= Decimal::ZERO {
            return Err(RegistryError::InvalidTrade(format!(
                "prices must be positive, got entry {} exit {}",
                entry_price, exit_price
            )));
        }

        // Notional must stay representable so fills can be accounted
        if request.amount.checked_mul(entry_price.max(exit_price)).is_none() {
            return Err(RegistryError::InvalidTrade(format!(
                "notional of {} at {} is too large",
                request.amount,
                entry_price.max(exit_price)
            )));
        }

        let id = TradeId(self.next_id);
        self.next_id += 1;

        info!(
            "Trade {} added: {} {} entry {} exit {}",
            id, pair, request.amount, entry_price, exit_price
        );

        self.tracked.push(TrackedTrade {
            trade: Trade {
                id,
                pair,
                amount: request.amount,
                entry_price,
                exit_price,
                status: TradeStatus::Pending,
                created_at: Utc::now(),
                entry_fill_price: None,
            },
            in_flight: None,
        });

        Ok(id)
    }

    /// Remove a Pending or Active trade on user request
    ///
    /// No offsetting order is placed. An order already in flight for the
    /// trade still resolves, but its result is discarded.
    pub fn cancel(&mut self, id: TradeId) -> Result<TradeTransition, RegistryError> {
        let idx = match self.tracked.iter().position(|t| t.trade.id == id) {
            Some(idx) => idx,
            None => return Err(self.missing(id, TradeStatus::Cancelled)),
        };

        let mut tracked = self.tracked.remove(idx);
        let from = apply(&mut tracked.trade, TradeStatus::Cancelled)?;
        if let Some(side) = tracked.in_flight {
            warn!("Trade {} cancelled with a {} order in flight", id, side);
        }

        info!("Trade {} cancelled", id);
        self.history.push(tracked.trade.clone());

        Ok(TradeTransition {
            from,
            to: TradeStatus::Cancelled,
            trade: tracked.trade,
        })
    }

    /// One evaluation pass for a tick on `pair`
    ///
    /// Pending trades with `price <= entry` get a Buy, Active trades with
    /// `price >= exit` get a Sell. Returned trades are marked in flight and
    /// skipped by later passes until `complete_order` is called.
    pub fn due_orders(&mut self, pair: &str, price: Decimal) -> Vec<PendingOrder> {
        let mut due = Vec::new();

        for tracked in self.tracked.iter_mut() {
            if tracked.in_flight.is_some() || !tracked.trade.pair.eq_ignore_ascii_case(pair) {
                continue;
            }

            let trade = &tracked.trade;
            let side = match trade.status {
                TradeStatus::Pending if price <= trade.entry_price => Side::Buy,
                TradeStatus::Active if price >= trade.exit_price => Side::Sell,
                _ => continue,
            };

            debug!("Trade {} crossed threshold at {}, claiming {} order", trade.id, price, side);
            tracked.in_flight = Some(side);
            due.push(PendingOrder {
                trade_id: trade.id,
                pair: trade.pair.clone(),
                side,
                quantity: trade.amount,
                trigger_price: price,
            });
        }

        due
    }

    /// Resolve the in-flight order of a trade
    ///
    /// A failed order leaves the status unchanged. A filled Buy moves
    /// Pending -> Active; a filled Sell moves Active -> Closed and drops the
    /// trade from the tracked set. Returns `Ok(None)` when nothing changed.
    pub fn complete_order(
        &mut self,
        id: TradeId,
        side: Side,
        filled: bool,
        fill_price: Decimal,
    ) -> Result<Option<TradeTransition>, RegistryError> {
        let idx = match self.tracked.iter().position(|t| t.trade.id == id) {
            Some(idx) => idx,
            None => {
                if let Some(trade) = self.history.iter().find(|t| t.id == id) {
                    warn!(
                        "{} order for {} trade {} resolved (filled: {}); result discarded",
                        side, trade.status, id, filled
                    );
                    return Ok(None);
                }
                return Err(RegistryError::UnknownTrade(id));
            }
        };

        if self.tracked[idx].in_flight != Some(side) {
            return Err(RegistryError::NoOrderInFlight(id, side));
        }
        self.tracked[idx].in_flight = None;

        if !filled {
            return Ok(None);
        }

        let transition = match side {
            Side::Buy => {
                let trade = &mut self.tracked[idx].trade;
                let from = apply(trade, TradeStatus::Active)?;
                trade.entry_fill_price = Some(fill_price);
                info!("Trade {} active: bought {} {} @ {}", id, trade.amount, trade.pair, fill_price);
                TradeTransition {
                    from,
                    to: TradeStatus::Active,
                    trade: trade.clone(),
                }
            }
            Side::Sell => {
                let from = apply(&mut self.tracked[idx].trade, TradeStatus::Closed)?;
                let tracked = self.tracked.remove(idx);
                info!(
                    "Trade {} closed: sold {} {} @ {}",
                    id, tracked.trade.amount, tracked.trade.pair, fill_price
                );
                self.history.push(tracked.trade.clone());
                TradeTransition {
                    from,
                    to: TradeStatus::Closed,
                    trade: tracked.trade,
                }
            }
        };

        Ok(Some(transition))
    }

    /// Look up a trade, tracked or historical
    pub fn get(&self, id: TradeId) -> Option<&Trade> {
        self.tracked
            .iter()
            .map(|t| &t.trade)
            .chain(self.history.iter())
            .find(|t| t.id == id)
    }

    /// Pending and Active trades in creation order
    pub fn trades(&self) -> Vec<Trade> {
        self.tracked.iter().map(|t| t.trade.clone()).collect()
    }

    /// Closed and Cancelled trades, oldest first
    pub fn history(&self) -> &[Trade] {
        &self.history
    }

    pub fn has_order_in_flight(&self, id: TradeId) -> bool {
        self.tracked.iter().any(|t| t.trade.id == id && t.in_flight.is_some())
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Forget every trade; pair rules stay and ids keep increasing
    pub fn clear(&mut self) {
        self.tracked.clear();
        self.history.clear();
    }

    fn missing(&self, id: TradeId, to: TradeStatus) -> RegistryError {
        match self.history.iter().find(|t| t.id == id) {
            Some(trade) => RegistryError::InvalidTransition {
                id,
                from: trade.status,
                to,
            },
            None => RegistryError::UnknownTrade(id),
        }
    }
}

fn apply(trade: &mut Trade, to: TradeStatus) -> Result<TradeStatus, RegistryError> {
    let from = trade.status;
    if !from.can_transition_to(to) {
        return Err(RegistryError::InvalidTransition { id: trade.id, from, to });
    }
    trade.status = to;
    Ok(from)
}
