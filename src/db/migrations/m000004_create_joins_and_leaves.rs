use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Joins::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Joins::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Joins::GuildId).big_integer().not_null())
                    .col(ColumnDef::new(Joins::MemberId).big_integer().not_null())
                    .col(ColumnDef::new(Joins::ExactMatchCode).string_len(32))
                    .col(ColumnDef::new(Joins::PossibleMatches).json().not_null())
                    .col(ColumnDef::new(Joins::InvalidatedReason).string_len(16))
                    .col(
                        ColumnDef::new(Joins::Cleared)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Joins::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Joins::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Redelivered join events collapse onto this index
        manager
            .create_index(
                Index::create()
                    .name("idx-joins-guild-member-created")
                    .table(Joins::Table)
                    .col(Joins::GuildId)
                    .col(Joins::MemberId)
                    .col(Joins::CreatedAt)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-joins-guild-code")
                    .table(Joins::Table)
                    .col(Joins::GuildId)
                    .col(Joins::ExactMatchCode)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Leaves::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Leaves::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Leaves::GuildId).big_integer().not_null())
                    .col(ColumnDef::new(Leaves::MemberId).big_integer().not_null())
                    .col(ColumnDef::new(Leaves::JoinId).integer().not_null())
                    .col(
                        ColumnDef::new(Leaves::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-leaves-join")
                            .from(Leaves::Table, Leaves::JoinId)
                            .to(Joins::Table, Joins::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-leaves-guild-member-join")
                    .table(Leaves::Table)
                    .col(Leaves::GuildId)
                    .col(Leaves::MemberId)
                    .col(Leaves::JoinId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Leaves::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Joins::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Joins {
    Table,
    Id,
    GuildId,
    MemberId,
    ExactMatchCode,
    PossibleMatches,
    InvalidatedReason,
    Cleared,
    CreatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Leaves {
    Table,
    Id,
    GuildId,
    MemberId,
    JoinId,
    CreatedAt,
}
