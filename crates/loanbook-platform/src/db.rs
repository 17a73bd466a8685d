use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

const SCHEMA: &str = include_str!("../migrations/0001_waivers.sql");

pub async fn connect_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Creates the waiver tables if they are missing. Every statement is idempotent.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("failed to apply waiver schema")?;
    Ok(())
}
