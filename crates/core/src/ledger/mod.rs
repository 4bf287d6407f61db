//! Double-entry ledger: domain records, posting rules, balance derivation,
//! and the transaction executor.

pub mod balance;
pub mod error;
pub mod executor;
pub mod posting;
pub mod types;

pub use error::LedgerError;
pub use executor::{
    ExecutorConfig, LedgerOperation, LockedAccounts, OperationPlan, SpendCheck,
    TransactionExecutor,
};
pub use types::{
    Account, AccountStatus, AccountType, Bucket, EntryKind, Hold, HoldStatus, IntentStatus,
    JournalEntry, JournalLine, PaymentIntent, Refund, RefundStatus, Side, Wallet,
};
