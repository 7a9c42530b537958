use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};
use serde_json::Value;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Platform fee percent, with the `platform_settings` row overriding the configured default.
    /// Stored as `{"value": <number>}`.
    pub async fn fetch_platform_fee_percent(&self, default_percent: f64) -> Result<f64, sqlx::Error> {
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT setting_value FROM platform_settings WHERE setting_key = 'platform_fee_percent'",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row.and_then(|(v,)| v.get("value").and_then(Value::as_f64)) {
            Some(percent) => {
                info!(percent, "Platform fee loaded from settings");
                Ok(percent)
            }
            None => {
                warn!(default_percent, "No platform fee setting; using configured default");
                Ok(default_percent)
            }
        }
    }
}
