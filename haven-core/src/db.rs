use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &str = include_str!("../schema.sql");

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Apply `schema.sql`. Every statement is `IF NOT EXISTS`, so reruns are no-ops.
pub async fn ensure_schema(pool: &PgPool) -> Result<usize, sqlx::Error> {
    let statements = schema_statements();
    for stmt in &statements {
        sqlx::query(stmt).execute(pool).await?;
    }
    tracing::info!(statements = statements.len(), "Schema ensured");
    Ok(statements.len())
}

/// Split the bundled schema into executable statements, dropping comment-only chunks.
fn schema_statements() -> Vec<String> {
    SCHEMA
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|l| !l.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
