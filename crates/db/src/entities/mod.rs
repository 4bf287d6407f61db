//! `SeaORM` entity definitions for the wallet ledger schema.

pub mod accounts;
pub mod api_keys;
pub mod external_identities;
pub mod holds;
pub mod idempotency_records;
pub mod journal_entries;
pub mod journal_lines;
pub mod payment_intents;
pub mod refunds;
pub mod sea_orm_active_enums;
pub mod wallets;
