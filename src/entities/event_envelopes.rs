//! `SeaORM` Entity for event_envelopes
//!
//! `sequence` is assigned by the database and is authoritative over the
//! value inside `doc`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "event_envelopes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sequence: i64,
    pub event_type: String,
    pub hotel_id: String,
    /// pending, in_flight, succeeded, failed, dead
    pub status: String,
    pub priority: i16,
    pub created_at: DateTimeWithTimeZone,
    pub next_attempt_at: DateTimeWithTimeZone,
    #[sea_orm(column_type = "JsonBinary")]
    pub doc: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
