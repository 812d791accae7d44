use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use scribe_core::observability::init_observability;
use scribe_core::vendors::openai::{OpenAiClientConfig, OpenAiSource};
use scribe_core::{MemoryRecords, MemoryStreamStore, SqliteStreamStore, StreamEngine, StreamStore};
use scribe_server::{ServerArgs, app};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_observability();
    let args = ServerArgs::parse();

    let store: Arc<dyn StreamStore> = match &args.db_path {
        Some(path) => {
            info!(path = %path.display(), "opening sqlite stream store");
            Arc::new(
                SqliteStreamStore::open(path)
                    .await
                    .with_context(|| format!("failed to open stream store at {}", path.display()))?,
            )
        }
        None => {
            info!("using in-memory stream store");
            Arc::new(MemoryStreamStore::new())
        }
    };

    let api_key = args
        .openai_api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .context("OPENAI_API_KEY is required")?;
    let mut openai = OpenAiClientConfig::new(api_key).default_model(args.model.clone());
    if let Some(base_url) = &args.openai_base_url {
        openai = openai.base_url(base_url.clone());
    }

    let engine = StreamEngine::builder()
        .store(store)
        .source(Arc::new(OpenAiSource::new(openai)?))
        .records(Arc::new(MemoryRecords::new()))
        .config(args.engine_config())
        .build()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = engine.sweeper().spawn(shutdown_rx);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "scribe server listening");

    axum::serve(listener, app(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    info!("scribe server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
