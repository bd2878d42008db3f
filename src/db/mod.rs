//! Database initialization and migration runner.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

const MAX_CONNECTIONS: u32 = 5;

/// Connect to Postgres and apply the embedded migrations (users, ws tickets,
/// room snapshots).
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new().max_connections(MAX_CONNECTIONS).connect(database_url).await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;
    info!("db: migrations applied");

    Ok(pool)
}
