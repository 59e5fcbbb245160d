use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Ranks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Ranks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Ranks::GuildId).big_integer().not_null())
                    .col(ColumnDef::new(Ranks::RoleId).big_integer().not_null())
                    .col(ColumnDef::new(Ranks::NumInvites).integer().not_null())
                    .col(ColumnDef::new(Ranks::Description).string())
                    .col(
                        ColumnDef::new(Ranks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Ranks::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-ranks-guild-role")
                    .table(Ranks::Table)
                    .col(Ranks::GuildId)
                    .col(Ranks::RoleId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Ranks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Ranks {
    Table,
    Id,
    GuildId,
    RoleId,
    NumInvites,
    Description,
    CreatedAt,
    DeletedAt,
}
