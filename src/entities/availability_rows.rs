//! `SeaORM` Entity for availability_rows

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "availability_rows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub hotel_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub room_type_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub date: Date,
    #[sea_orm(column_type = "JsonBinary")]
    pub doc: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
