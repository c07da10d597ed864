use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Bookings::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Bookings::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Bookings::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(Bookings::ChannelId).string_len(64).not_null())
                    .col(ColumnDef::new(Bookings::ChannelBookingId).string_len(128).not_null())
                    .col(ColumnDef::new(Bookings::Doc).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_bookings_hotel_channel_booking")
                    .table(Bookings::Table)
                    .col(Bookings::HotelId)
                    .col(Bookings::ChannelId)
                    .col(Bookings::ChannelBookingId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ReconciliationRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReconciliationRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationRecords::HotelId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationRecords::IdempotencyKey)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReconciliationRecords::Outcome)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReconciliationRecords::Doc).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reconciliation_records_hotel_key")
                    .table(ReconciliationRecords::Table)
                    .col(ReconciliationRecords::HotelId)
                    .col(ReconciliationRecords::IdempotencyKey)
                    .to_owned(),
            )
            .await?;

        // A change applies at most once; rejected attempts may repeat
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_reconciliation_records_applied_key
                ON reconciliation_records (hotel_id, idempotency_key)
                WHERE outcome = 'applied';
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReconciliationRecords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Bookings::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Bookings {
    Table,
    Id,
    HotelId,
    ChannelId,
    ChannelBookingId,
    Doc,
}

#[derive(Iden)]
enum ReconciliationRecords {
    Table,
    Id,
    HotelId,
    IdempotencyKey,
    Outcome,
    Doc,
}
