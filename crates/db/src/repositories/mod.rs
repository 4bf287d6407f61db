//! Repository abstractions for data the adapter reads outside the ledger
//! port.

pub mod api_key;
