use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChannelConfigs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ChannelConfigs::HotelId).string_len(64).not_null())
                    .col(ColumnDef::new(ChannelConfigs::ChannelId).string_len(64).not_null())
                    .col(ColumnDef::new(ChannelConfigs::Doc).json_binary().not_null())
                    .primary_key(
                        Index::create()
                            .col(ChannelConfigs::HotelId)
                            .col(ChannelConfigs::ChannelId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChannelConfigs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ChannelConfigs {
    Table,
    HotelId,
    ChannelId,
    Doc,
}
