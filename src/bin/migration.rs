use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::info;

use storefront_api::migrator::Migrator;

#[tokio::main]
async fn main() -> Result<(), DbErr> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());

    // Configure database connection
    let database_url = std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("APP__DATABASE_URL"))
        .unwrap_or_else(|_| "sqlite://storefront.db?mode=rwc".to_string());

    info!("Connecting to database: {}", database_url);

    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(5)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(true);

    let db = Database::connect(options).await?;

    match command.as_str() {
        "up" => {
            info!("Applying pending migrations");
            Migrator::up(&db, None).await?;
        }
        "down" => {
            info!("Rolling back the last migration");
            Migrator::down(&db, Some(1)).await?;
        }
        "status" => Migrator::status(&db).await?,
        other => {
            return Err(DbErr::Custom(format!(
                "unknown command '{}'; expected up, down or status",
                other
            )))
        }
    }

    info!("Migration command '{}' completed", command);
    Ok(())
}
