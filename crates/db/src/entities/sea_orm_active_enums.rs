//! `SeaORM` active enums mirroring the PostgreSQL enum types.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "entry_kind")]
pub enum EntryKind {
    #[sea_orm(string_value = "deposit")]
    Deposit,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "hold")]
    Hold,
    #[sea_orm(string_value = "capture")]
    Capture,
    #[sea_orm(string_value = "release")]
    Release,
    #[sea_orm(string_value = "refund")]
    Refund,
    #[sea_orm(string_value = "intent_pay")]
    IntentPay,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "line_side")]
pub enum LineSide {
    #[sea_orm(string_value = "debit")]
    Debit,
    #[sea_orm(string_value = "credit")]
    Credit,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "line_bucket")]
pub enum LineBucket {
    #[sea_orm(string_value = "available")]
    Available,
    #[sea_orm(string_value = "held")]
    Held,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "account_type")]
pub enum AccountType {
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "system")]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "account_status")]
pub enum AccountStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "frozen")]
    Frozen,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "hold_status")]
pub enum HoldStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "partially_captured")]
    PartiallyCaptured,
    #[sea_orm(string_value = "captured")]
    Captured,
    #[sea_orm(string_value = "released")]
    Released,
    #[sea_orm(string_value = "expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "intent_status")]
pub enum IntentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "refund_status")]
pub enum RefundStatus {
    #[sea_orm(string_value = "posted")]
    Posted,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "idempotency_status")]
pub enum IdempotencyStatus {
    #[sea_orm(string_value = "in_flight")]
    InFlight,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "api_key_status")]
pub enum ApiKeyStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "revoked")]
    Revoked,
}
