use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RatePlans::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(RatePlans::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(RatePlans::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(RatePlans::RoomTypeId).string_len(64).not_null())
                    .col(ColumnDef::new(RatePlans::Doc).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_rate_plans_hotel_room_type")
                    .table(RatePlans::Table)
                    .col(RatePlans::HotelId)
                    .col(RatePlans::RoomTypeId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SeasonalRates::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SeasonalRates::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SeasonalRates::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(SeasonalRates::Doc).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_seasonal_rates_hotel")
                    .table(SeasonalRates::Table)
                    .col(SeasonalRates::HotelId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RateOverrides::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(RateOverrides::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(RateOverrides::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(RateOverrides::RoomTypeId).string_len(64).not_null())
                    .col(ColumnDef::new(RateOverrides::Date).date().not_null())
                    .col(ColumnDef::new(RateOverrides::RatePlanId).uuid().null())
                    .col(ColumnDef::new(RateOverrides::Doc).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_rate_overrides_hotel_room_type_date")
                    .table(RateOverrides::Table)
                    .col(RateOverrides::HotelId)
                    .col(RateOverrides::RoomTypeId)
                    .col(RateOverrides::Date)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DynamicRules::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DynamicRules::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(DynamicRules::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(DynamicRules::Doc).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dynamic_rules_hotel")
                    .table(DynamicRules::Table)
                    .col(DynamicRules::HotelId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PromoCodes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PromoCodes::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(PromoCodes::Code).string_len(64).not_null())
                    .col(ColumnDef::new(PromoCodes::Doc).json_binary().not_null())
                    .primary_key(Index::create().col(PromoCodes::HotelId).col(PromoCodes::Code))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PromoCodes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DynamicRules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RateOverrides::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SeasonalRates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RatePlans::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum RatePlans {
    Table,
    Id,
    HotelId,
    RoomTypeId,
    Doc,
}

#[derive(Iden)]
enum SeasonalRates {
    Table,
    Id,
    HotelId,
    Doc,
}

#[derive(Iden)]
enum RateOverrides {
    Table,
    Id,
    HotelId,
    RoomTypeId,
    Date,
    RatePlanId,
    Doc,
}

#[derive(Iden)]
enum DynamicRules {
    Table,
    Id,
    HotelId,
    Doc,
}

#[derive(Iden)]
enum PromoCodes {
    Table,
    HotelId,
    Code,
    Doc,
}
