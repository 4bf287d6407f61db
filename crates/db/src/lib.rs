//! Database layer: `SeaORM` entities, migrations, and the PostgreSQL
//! implementation of the ledger store port.
//!
//! This crate provides:
//! - `SeaORM` entity definitions for the wallet ledger schema
//! - Database migrations
//! - [`SeaOrmLedgerStore`], the production `LedgerStore`
//! - The API-key repository used by the HTTP adapter

pub mod entities;
pub mod migration;
pub mod repositories;
pub mod store;

pub use repositories::api_key::ApiKeyRepository;
pub use store::SeaOrmLedgerStore;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

use tesoro_shared::config::DatabaseConfig;

/// Establishes a connection pool to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections);
    Database::connect(options).await
}
