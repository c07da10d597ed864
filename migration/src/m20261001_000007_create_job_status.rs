use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Last run of each scheduled job per hotel
        manager
            .create_table(
                Table::create()
                    .table(JobStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobStatus::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobStatus::JobName).string_len(100).not_null())
                    .col(ColumnDef::new(JobStatus::HotelId).string_len(64).not_null())
                    .col(
                        ColumnDef::new(JobStatus::LastSuccessAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobStatus::LastAttemptAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(JobStatus::LastError).text().null())
                    .col(
                        ColumnDef::new(JobStatus::SuccessCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobStatus::ErrorCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobStatus::MinIntervalSecs)
                            .big_integer()
                            .not_null()
                            .default(3600),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_status_job_hotel")
                    .table(JobStatus::Table)
                    .col(JobStatus::JobName)
                    .col(JobStatus::HotelId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobStatus::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum JobStatus {
    Table,
    Id,
    JobName,
    HotelId,
    LastSuccessAt,
    LastAttemptAt,
    LastError,
    SuccessCount,
    ErrorCount,
    MinIntervalSecs,
}
