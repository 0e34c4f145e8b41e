use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::GatewayError;

pub async fn make_pool(database_url: &str) -> Result<PgPool, GatewayError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), GatewayError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
