use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Hotels::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Hotels::Id).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(Hotels::Doc).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        // Room types are keyed by (hotel, code); the code doubles as the room type id
        manager
            .create_table(
                Table::create()
                    .table(RoomTypes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(RoomTypes::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(RoomTypes::Code).string_len(64).not_null())
                    .col(ColumnDef::new(RoomTypes::Doc).json_binary().not_null())
                    .primary_key(Index::create().col(RoomTypes::HotelId).col(RoomTypes::Code))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RoomTypes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Hotels::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Hotels {
    Table,
    Id,
    Doc,
}

#[derive(Iden)]
enum RoomTypes {
    Table,
    HotelId,
    Code,
    Doc,
}
