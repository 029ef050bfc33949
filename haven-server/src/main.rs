use std::sync::Arc;

use clap::Parser;
use haven_core::models::TherapyModule;
use haven_core::{HavenConfig, HavenError, MemoryStore, OpenAiCompletionClient, PgStore, Store};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use haven_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "haven.toml")]
    config: String,

    /// Check database connectivity and exit
    #[arg(long)]
    health: bool,

    /// Create any missing tables and exit
    #[arg(long)]
    init_schema: bool,

    /// Serve from an in-memory store instead of PostgreSQL
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match HavenConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let store: Arc<dyn Store> = if args.memory {
        memory_store(&config).await?
    } else {
        let pool = match haven_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        };

        if args.health {
            match haven_core::db::health_check(&pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            }
            println!("✅ Haven DB health check passed");
            return Ok(());
        }

        if args.init_schema {
            let applied = haven_core::db::ensure_schema(&pool).await?;
            println!("✅ Schema ready ({} statements applied)", applied);
            return Ok(());
        }

        Arc::new(PgStore::new(pool))
    };

    let backend = match OpenAiCompletionClient::from_config(&config.llm) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to create completion client: {}", e);
            std::process::exit(1);
        }
    };

    if config.webhook.resolved_secret().is_none() {
        tracing::warn!("No webhook secret configured; /webhooks/post-call will reject every call");
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = HttpState {
        store,
        backend: Arc::new(backend),
        config,
    };
    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}

/// In-memory store seeded with a starter copy of the default module.
async fn memory_store(config: &HavenConfig) -> Result<Arc<dyn Store>, HavenError> {
    let store = MemoryStore::new();
    store
        .insert_module(&TherapyModule::starter(
            config.personalization.default_module.clone(),
        ))
        .await?;
    tracing::warn!("Using in-memory store; nothing will be persisted");
    Ok(Arc::new(store))
}
