//! Repository snapshot entity.
//!
//! `item` holds the snapshot in tagged attribute encoding; the primary key
//! duplicates its `full_name` for keyed lookups.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "repositories")]
pub struct Model {
    /// `owner/repo` (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub full_name: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub item: JsonValue,

    pub created_at: DateTimeWithTimeZone,

    /// Last time the snapshot was written
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
