use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use parley_llm::{HttpAgentRuntime, MessagesApiSummarizer};
use parley_server::{AppState, ServerConfig};
use parley_store::{Database, SqliteStore};
use parley_telemetry::{init_telemetry, TelemetryConfig};

/// Chat backend that streams agent replies over SSE.
#[derive(Debug, Parser)]
#[command(name = "parley", version)]
struct Args {
    /// Port to listen on. Overrides `PORT`.
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database file. Overrides `PARLEY_DB_PATH`.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let telemetry = init_telemetry(TelemetryConfig::default());

    let mut config = ServerConfig::from_env().context("invalid configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    let db = Database::open(&config.db_path)
        .with_context(|| format!("open database {}", config.db_path.display()))?;
    let store = Arc::new(SqliteStore::new(db));
    let runtime = Arc::new(HttpAgentRuntime::new(config.agent.clone()).context("agent client")?);
    let summarizer =
        Arc::new(MessagesApiSummarizer::new(config.summarizer.clone()).context("summarizer client")?);

    let state = AppState::new(&config, store, runtime, summarizer).with_logs(telemetry.log_sink());
    let handle = parley_server::start(&config, state)
        .await
        .context("start server")?;
    tracing::info!(port = handle.port, "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl+c")?;
    handle.shutdown().await;
    Ok(())
}
