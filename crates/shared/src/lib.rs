//! Shared types and configuration for Tesoro.
//!
//! This crate provides common types used across all other crates:
//! - Integer minor-unit money with currency tags
//! - Typed IDs for type-safe entity references
//! - Cursor pagination types for list endpoints
//! - API-key identity, scopes, and spend limits
//! - Configuration management

pub mod auth;
pub mod config;
pub mod types;

pub use auth::{ApiKeyIdentity, Scope, SpendLimits};
pub use config::AppConfig;
pub use types::{Currency, Money, MoneyError};
