use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EventEnvelopes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(EventEnvelopes::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(EventEnvelopes::Sequence)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(EventEnvelopes::EventType).string_len(32).not_null())
                    .col(ColumnDef::new(EventEnvelopes::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(EventEnvelopes::Status).string_len(16).not_null())
                    .col(ColumnDef::new(EventEnvelopes::Priority).small_integer().not_null())
                    .col(
                        ColumnDef::new(EventEnvelopes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EventEnvelopes::NextAttemptAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(EventEnvelopes::Doc).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        // Drain query
        manager
            .create_index(
                Index::create()
                    .name("idx_event_envelopes_type_status_next_attempt")
                    .table(EventEnvelopes::Table)
                    .col(EventEnvelopes::EventType)
                    .col(EventEnvelopes::Status)
                    .col(EventEnvelopes::NextAttemptAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_event_envelopes_status_priority")
                    .table(EventEnvelopes::Table)
                    .col(EventEnvelopes::Status)
                    .col(EventEnvelopes::Priority)
                    .col(EventEnvelopes::CreatedAt)
                    .col(EventEnvelopes::Sequence)
                    .to_owned(),
            )
            .await?;

        // Blocking predecessors of a lease candidate
        manager
            .create_index(
                Index::create()
                    .name("idx_event_envelopes_hotel_status_created")
                    .table(EventEnvelopes::Table)
                    .col(EventEnvelopes::HotelId)
                    .col(EventEnvelopes::Status)
                    .col(EventEnvelopes::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EventEnvelopes::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum EventEnvelopes {
    Table,
    Id,
    Sequence,
    EventType,
    HotelId,
    Status,
    Priority,
    CreatedAt,
    NextAttemptAt,
    Doc,
}
