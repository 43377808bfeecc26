// ShopLedger - Web Server
// REST API with Axum over SQLite (or in-memory storage when no database is set)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use shopledger::api::{router, AppState};
use shopledger::config::Config;
use shopledger::logging::init_tracing;
use shopledger::{DatabaseStorage, MemStorage, Storage};

#[derive(Parser, Debug)]
#[command(name = "shopledger-server")]
#[command(about = "ShopLedger REST API", version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "shopledger.json")]
    config: PathBuf,

    /// SQLite database (overrides config and SHOPLEDGER_DB)
    #[arg(long)]
    database: Option<String>,

    /// Listen address (overrides config and SHOPLEDGER_BIND)
    #[arg(long)]
    bind: Option<String>,
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, source) = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    let mut config = config.apply_env();
    config.apply_overrides(args.database, args.bind);
    init_tracing(&config.log_filter);
    source.log();

    tracing::info!("🌐 ShopLedger server v{}", shopledger::VERSION);

    let storage: Arc<dyn Storage> = match &config.database {
        Some(path) => {
            let db = DatabaseStorage::open(path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Arc::new(db)
        }
        None => {
            tracing::warn!("no database configured, data lives in memory only");
            Arc::new(MemStorage::new())
        }
    };

    let app = router(AppState::new(storage));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    tracing::info!("🚀 Server running on http://{}", config.bind);
    tracing::info!("   API: http://{}/api/health", config.bind);

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}
