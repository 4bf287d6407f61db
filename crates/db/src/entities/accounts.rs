//! `SeaORM` Entity for the accounts table. One account per wallet.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::{AccountStatus, AccountType};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub wallet_id: Uuid,
    pub currency: String,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wallets::Entity",
        from = "Column::WalletId",
        to = "super::wallets::Column::Id"
    )]
    Wallets,
    #[sea_orm(has_many = "super::journal_lines::Entity")]
    JournalLines,
}

impl Related<super::wallets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallets.def()
    }
}

impl Related<super::journal_lines::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JournalLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
