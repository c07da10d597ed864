use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // The composite primary key is also the (hotel, room type, date) index
        manager
            .create_table(
                Table::create()
                    .table(AvailabilityRows::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(AvailabilityRows::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(AvailabilityRows::RoomTypeId).string_len(64).not_null())
                    .col(ColumnDef::new(AvailabilityRows::Date).date().not_null())
                    .col(ColumnDef::new(AvailabilityRows::Doc).json_binary().not_null())
                    .primary_key(
                        Index::create()
                            .col(AvailabilityRows::HotelId)
                            .col(AvailabilityRows::RoomTypeId)
                            .col(AvailabilityRows::Date),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_availability_rows_hotel_date")
                    .table(AvailabilityRows::Table)
                    .col(AvailabilityRows::HotelId)
                    .col(AvailabilityRows::Date)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AvailabilityRows::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum AvailabilityRows {
    Table,
    HotelId,
    RoomTypeId,
    Date,
    Doc,
}
