//! # Usage Module
//!
//! Monthly query counters and the transaction volume window, both keyed by
//! the *billing* identity so every wallet in a portfolio draws from the same
//! pool.
//!
//! ```text
//! period.rs        (year, month) buckets, encoded into store keys
//! ledger.rs        UsageLedger: record/read queries and transactions
//! transactions.rs  TransactionRecord and volume summation
//! ```

pub mod ledger;
pub mod period;
pub mod transactions;

pub use ledger::UsageLedger;
pub use period::Period;
pub use transactions::{TransactionRecord, TransactionStatus};
