//! Core ledger engine for Tesoro.
//!
//! This crate contains the double-entry ledger engine with no web or SQL
//! dependencies: all persistence goes through the [`store::LedgerStore`]
//! port.
//!
//! # Modules
//!
//! - `ledger` - Posting rules, balance derivation, the transaction executor
//! - `store` - The persistence port and the in-memory implementation
//! - `idempotency` - Keys, request fingerprints, and response snapshots
//! - `recipient` - Recipient reference parsing and resolution
//! - `authz` - Scope checks and spend-ceiling enforcement
//! - `transfer` - Transfer and deposit operations
//! - `hold` - Hold lifecycle: create, capture, release, lazy expiry
//! - `intent` - Payment intent lifecycle: create, pay, cancel
//! - `refund` - Refunds against captures
//! - `wallet` - Read side: balances, history, wallet administration
//! - `engine` - The facade tying operations to the executor

pub mod authz;
pub mod engine;
pub mod hold;
pub mod idempotency;
pub mod intent;
pub mod ledger;
pub mod recipient;
pub mod refund;
pub mod store;
pub mod transfer;
pub mod wallet;

pub use engine::LedgerEngine;
pub use ledger::error::LedgerError;
