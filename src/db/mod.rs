use crate::config::AppConfig;
use sea_orm::{Database, DatabaseConnection};
use tracing::info;

pub mod entities;
pub mod migrations;

pub async fn establish_connection(config: &AppConfig) -> Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opt = sea_orm::ConnectOptions::new(config.database_url.clone());
    opt.max_connections(32)
        .min_connections(2)
        .connect_timeout(config.store_timeout)
        .acquire_timeout(config.store_timeout)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug);

    info!("Connecting to database...");
    let db = Database::connect(opt).await?;
    info!("Database connection established");

    Ok(db)
}
