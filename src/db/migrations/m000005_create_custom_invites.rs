use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CustomInvites::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CustomInvites::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CustomInvites::GuildId).big_integer().not_null())
                    .col(ColumnDef::new(CustomInvites::MemberId).big_integer().not_null())
                    .col(ColumnDef::new(CustomInvites::CreatorId).big_integer())
                    .col(ColumnDef::new(CustomInvites::Amount).big_integer().not_null())
                    .col(ColumnDef::new(CustomInvites::Reason).string())
                    .col(
                        ColumnDef::new(CustomInvites::Cleared)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CustomInvites::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-custom-invites-guild-member")
                    .table(CustomInvites::Table)
                    .col(CustomInvites::GuildId)
                    .col(CustomInvites::MemberId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CustomInvites::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CustomInvites {
    Table,
    Id,
    GuildId,
    MemberId,
    CreatorId,
    Amount,
    Reason,
    Cleared,
    CreatedAt,
}
