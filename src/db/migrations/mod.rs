pub mod m000001_create_guilds_and_members;
pub mod m000002_create_guild_settings;
pub mod m000003_create_invite_codes;
pub mod m000004_create_joins_and_leaves;
pub mod m000005_create_custom_invites;
pub mod m000006_create_ranks;
pub mod m000007_create_scheduled_actions;

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m000001_create_guilds_and_members::Migration),
            Box::new(m000002_create_guild_settings::Migration),
            Box::new(m000003_create_invite_codes::Migration),
            Box::new(m000004_create_joins_and_leaves::Migration),
            Box::new(m000005_create_custom_invites::Migration),
            Box::new(m000006_create_ranks::Migration),
            Box::new(m000007_create_scheduled_actions::Migration),
        ]
    }
}
