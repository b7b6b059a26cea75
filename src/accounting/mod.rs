pub mod ledger;

pub use ledger::{AccountState, AccountingLedger, LedgerError, WithdrawalPolicy};
