use rust_decimal::Decimal;

use crate::accounting::AccountState;
use crate::data::{PriceTick, Side, TradeId, TradeStatus};
use crate::exchange::Severity;

/// Domain events published by the engine
///
/// Presentation layers subscribe to these; the engine never renders anything.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started { pair: String },
    Stopped,
    PriceUpdated(PriceTick),
    TradeStateChanged {
        id: TradeId,
        from: TradeStatus,
        to: TradeStatus,
    },
    BalanceChanged(AccountState),
    OrderFailed {
        id: TradeId,
        side: Side,
        error: String,
        severity: Severity,
    },
    ConnectionLost { pair: String, reason: String },
    Withdrawal { amount: Decimal },
}
