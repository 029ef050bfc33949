use thiserror::Error;

use crate::store::StoreError;

/// Startup and process-level failures. Request-level failures use `PipelineError`.
#[derive(Error, Debug)]
pub enum HavenError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
