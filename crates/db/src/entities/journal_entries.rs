//! `SeaORM` Entity for the journal_entries table. Append-only.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::EntryKind;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "journal_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: EntryKind,
    pub initiator_wallet_id: Uuid,
    pub reference_id: Option<String>,
    pub metadata: Json,
    pub idempotency_key: Option<String>,
    pub linked_entry_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::journal_lines::Entity")]
    JournalLines,
}

impl Related<super::journal_lines::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JournalLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
