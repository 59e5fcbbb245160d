use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduledActions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduledActions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ScheduledActions::GuildId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledActions::ActionType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScheduledActions::Args).json().not_null())
                    .col(
                        ColumnDef::new(ScheduledActions::DueAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScheduledActions::Reason).string())
                    .col(
                        ColumnDef::new(ScheduledActions::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ScheduledActions::LastError).text())
                    .col(
                        ColumnDef::new(ScheduledActions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScheduledActions::ExecutedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ScheduledActions::FailedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ScheduledActions::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Index for the due-action poll
        manager
            .create_index(
                Index::create()
                    .name("idx-scheduled-actions-due-at")
                    .table(ScheduledActions::Table)
                    .col(ScheduledActions::DueAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScheduledActions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ScheduledActions {
    Table,
    Id,
    GuildId,
    ActionType,
    Args,
    DueAt,
    Reason,
    Attempts,
    LastError,
    CreatedAt,
    ExecutedAt,
    FailedAt,
    DeletedAt,
}
