use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Session account figures
///
/// In-process bookkeeping only, not a durable financial record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Decimal,
    /// May go negative
    pub cumulative_profit: Decimal,
    pub total_trades: u64,
    pub successful_trades: u64,
}

impl AccountState {
    /// Percentage of successful trades, zero before the first trade
    pub fn success_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }

        Decimal::from(self.successful_trades) / Decimal::from(self.total_trades) * Decimal::ONE_HUNDRED
    }
}

/// Profit withdrawal rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalPolicy {
    /// Profit must exceed this before a withdrawal is allowed
    pub minimum_amount: Decimal,
    /// Share of cumulative profit taken per withdrawal, 0-100
    pub percentage: Decimal,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            minimum_amount: Decimal::ONE_HUNDRED,
            percentage: Decimal::from(50),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("cumulative profit {profit} does not exceed withdrawal minimum {minimum}")]
    NotEligible { profit: Decimal, minimum: Decimal },

    #[error("withdrawal percentage {0} outside 0-100")]
    InvalidPercentage(Decimal),

    #[error("{0} is not representable")]
    Overflow(&'static str),
}

/// Single writer for `AccountState`
#[derive(Debug, Clone)]
pub struct AccountingLedger {
    state: AccountState,
    policy: WithdrawalPolicy,
}

impl AccountingLedger {
    pub fn new(policy: WithdrawalPolicy) -> Self {
        Self {
            state: AccountState::default(),
            policy,
        }
    }

    pub fn with_balance(policy: WithdrawalPolicy, balance: Decimal) -> Self {
        let mut ledger = Self::new(policy);
        ledger.state.balance = balance;
        ledger
    }

    pub fn record_balance_change(&mut self, delta: Decimal) -> Result<(), LedgerError> {
        self.state.balance = checked_add(self.state.balance, delta, "balance")?;
        Ok(())
    }

    /// Overwrite the balance with an exchange-reported figure
    pub fn set_balance(&mut self, balance: Decimal) {
        self.state.balance = balance;
    }

    pub fn record_trade_outcome(&mut self, success: bool, profit: Decimal) -> Result<(), LedgerError> {
        self.state.cumulative_profit = checked_add(self.state.cumulative_profit, profit, "cumulative profit")?;
        self.state.total_trades += 1;
        if success {
            self.state.successful_trades += 1;
        }
        Ok(())
    }

    /// Book a finished trade: outcome plus the matching balance change
    ///
    /// Either both figures move or neither does.
    pub fn record_realized_trade(&mut self, success: bool, profit: Decimal) -> Result<(), LedgerError> {
        let balance = checked_add(self.state.balance, profit, "balance")?;
        self.record_trade_outcome(success, profit)?;
        self.state.balance = balance;
        Ok(())
    }

    pub fn is_withdrawal_eligible(&self) -> bool {
        self.state.cumulative_profit > self.policy.minimum_amount
    }

    /// Take the configured share of cumulative profit
    ///
    /// Only the tracked profit figure shrinks; `balance` is untouched and no
    /// funds move on the exchange. Eligibility is not checked here, callers
    /// gate on `is_withdrawal_eligible`.
    pub fn withdraw(&mut self) -> Result<Decimal, LedgerError> {
        let percentage = self.policy.percentage;
        if percentage < Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
            return Err(LedgerError::InvalidPercentage(percentage));
        }

        let amount = self
            .state
            .cumulative_profit
            .checked_mul(percentage / Decimal::ONE_HUNDRED)
            .ok_or(LedgerError::Overflow("withdrawal amount"))?;
        self.state.cumulative_profit -= amount;

        info!(
            "Withdrew {} from tracked profit, {} remaining",
            amount, self.state.cumulative_profit
        );

        Ok(amount)
    }

    pub fn success_rate(&self) -> Decimal {
        self.state.success_rate()
    }

    pub fn snapshot(&self) -> AccountState {
        self.state.clone()
    }

    pub fn policy(&self) -> &WithdrawalPolicy {
        &self.policy
    }

    /// Zero every figure, e.g. when a session ends
    pub fn reset(&mut self) {
        self.state = AccountState::default();
    }
}

fn checked_add(current: Decimal, delta: Decimal, figure: &'static str) -> Result<Decimal, LedgerError> {
    current.checked_add(delta).ok_or(LedgerError::Overflow(figure))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_outcomes_and_success_rate() {
        let mut ledger = AccountingLedger::new(WithdrawalPolicy::default());
        assert_eq!(ledger.success_rate(), Decimal::ZERO);

        ledger.record_trade_outcome(true, dec!(4.20)).unwrap();
        ledger.record_trade_outcome(false, dec!(-1.50)).unwrap();
        ledger.record_trade_outcome(true, dec!(0.30)).unwrap();
        ledger.record_trade_outcome(false, dec!(-2.00)).unwrap();

        let state = ledger.snapshot();
        assert_eq!(state.total_trades, 4);
        assert_eq!(state.successful_trades, 2);
        assert_eq!(state.cumulative_profit, dec!(1.00));
        assert_eq!(ledger.success_rate(), dec!(50));
    }

    #[test]
    fn test_profit_may_go_negative() {
        let mut ledger = AccountingLedger::new(WithdrawalPolicy::default());
        ledger.record_trade_outcome(false, dec!(-3)).unwrap();
        assert_eq!(ledger.snapshot().cumulative_profit, dec!(-3));
        assert!(!ledger.is_withdrawal_eligible());
    }

    #[test]
    fn test_withdraw_takes_percentage_of_profit_only() {
        let mut ledger = AccountingLedger::with_balance(
            WithdrawalPolicy {
                minimum_amount: dec!(100),
                percentage: dec!(50),
            },
            dec!(1000),
        );
        ledger.record_trade_outcome(true, dec!(200)).unwrap();

        assert!(ledger.is_withdrawal_eligible());
        let amount = ledger.withdraw().unwrap();

        assert_eq!(amount, dec!(100));
        assert_eq!(ledger.snapshot().cumulative_profit, dec!(100));
        assert_eq!(ledger.snapshot().balance, dec!(1000));
    }

    #[test]
    fn test_withdraw_does_not_check_eligibility() {
        let mut ledger = AccountingLedger::new(WithdrawalPolicy::default());
        ledger.record_trade_outcome(true, dec!(100)).unwrap();

        // Exactly at the minimum is not eligible, but the arithmetic still applies
        assert!(!ledger.is_withdrawal_eligible());
        assert_eq!(ledger.withdraw(), Ok(dec!(50)));
        assert_eq!(ledger.snapshot().cumulative_profit, dec!(50));
    }

    #[test]
    fn test_overflow_is_an_error_and_leaves_state() {
        let mut ledger = AccountingLedger::with_balance(WithdrawalPolicy::default(), Decimal::MAX);
        ledger.record_trade_outcome(true, dec!(10)).unwrap();
        let before = ledger.snapshot();

        assert_eq!(
            ledger.record_balance_change(Decimal::MAX),
            Err(LedgerError::Overflow("balance"))
        );
        assert_eq!(
            ledger.record_realized_trade(true, dec!(1)),
            Err(LedgerError::Overflow("balance"))
        );
        assert_eq!(ledger.snapshot(), before);

        ledger.set_balance(dec!(0));
        assert_eq!(
            ledger.record_realized_trade(true, Decimal::MAX),
            Err(LedgerError::Overflow("cumulative profit"))
        );
        assert_eq!(ledger.snapshot().total_trades, 1);
        assert_eq!(ledger.snapshot().balance, dec!(0));
    }

    #[test]
    fn test_realized_trade_moves_both_figures() {
        let mut ledger = AccountingLedger::with_balance(WithdrawalPolicy::default(), dec!(1000));
        ledger.record_realized_trade(false, dec!(-2.50)).unwrap();

        let state = ledger.snapshot();
        assert_eq!(state.balance, dec!(997.50));
        assert_eq!(state.cumulative_profit, dec!(-2.50));
        assert_eq!((state.total_trades, state.successful_trades), (1, 0));
    }

    #[test]
    fn test_invalid_percentage() {
        let mut ledger = AccountingLedger::new(WithdrawalPolicy {
            minimum_amount: dec!(0),
            percentage: dec!(150),
        });
        ledger.record_trade_outcome(true, dec!(10)).unwrap();
        assert_eq!(ledger.withdraw(), Err(LedgerError::InvalidPercentage(dec!(150))));
    }

    #[test]
    fn test_balance_changes_and_reset() {
        let mut ledger = AccountingLedger::new(WithdrawalPolicy::default());
        ledger.record_balance_change(dec!(12.5)).unwrap();
        ledger.record_balance_change(dec!(-2.5)).unwrap();
        assert_eq!(ledger.snapshot().balance, dec!(10));

        ledger.set_balance(dec!(500));
        assert_eq!(ledger.snapshot().balance, dec!(500));

        ledger.reset();
        assert_eq!(ledger.snapshot(), AccountState::default());
    }

    proptest! {
        #[test]
        fn prop_outcomes_are_additive(outcomes in prop::collection::vec((any::<bool>(), -50_000i64..50_000), 0..64)) {
            let mut ledger = AccountingLedger::new(WithdrawalPolicy::default());
            let mut expected_profit = Decimal::ZERO;

            for (i, (success, cents)) in outcomes.iter().enumerate() {
                let before = ledger.snapshot();
                let profit = Decimal::new(*cents, 2);
                ledger.record_trade_outcome(*success, profit).unwrap();
                expected_profit += profit;

                let after = ledger.snapshot();
                prop_assert_eq!(after.total_trades, before.total_trades + 1);
                prop_assert_eq!(after.total_trades, i as u64 + 1);
                prop_assert!(after.total_trades >= after.successful_trades);
                prop_assert_eq!(after.balance, before.balance);
            }

            prop_assert_eq!(ledger.snapshot().cumulative_profit, expected_profit);
        }

        #[test]
        fn prop_withdraw_leaves_balance(profit_cents in 10_001i64..10_000_000, pct in 0u32..=100) {
            let mut ledger = AccountingLedger::with_balance(
                WithdrawalPolicy { minimum_amount: dec!(100), percentage: Decimal::from(pct) },
                dec!(42),
            );
            let profit = Decimal::new(profit_cents, 2);
            ledger.record_trade_outcome(true, profit).unwrap();

            let amount = ledger.withdraw().unwrap();
            prop_assert_eq!(amount + ledger.snapshot().cumulative_profit, profit);
            prop_assert_eq!(ledger.snapshot().balance, dec!(42));
        }
    }
}
