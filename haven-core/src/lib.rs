pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod webhook;

pub use config::HavenConfig;
pub use error::HavenError;
pub use llm::{CompletionBackend, CompletionError, OpenAiCompletionClient};
pub use pipeline::PipelineError;
pub use store::{MemoryStore, PgStore, Store, StoreError};
