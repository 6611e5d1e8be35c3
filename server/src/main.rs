use anyhow::Result;
use clap::Parser;
use search_core::store::{Connection, SledConnector};
use search_core::{JiebaTokenizer, SearchConfig, SearchEngine};
use server::{build_app, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Path of the sled database holding the document and index tables
    #[arg(long, env = "SEARCH_DB", default_value = "./data/search.db")]
    db: String,
    /// Optional JSON config overriding table names and limits
    #[arg(long, env = "SEARCH_CONFIG")]
    config: Option<String>,
    /// Directory of downloaded attachments
    #[arg(long, env = "FILES_ROOT", default_value = "./downloads")]
    files_root: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = SearchConfig::load_or_default(args.config.as_deref())?;

    let connection = Connection::open(Box::new(SledConnector::new(&args.db)));
    let engine = SearchEngine::new(connection, Arc::new(JiebaTokenizer), config);
    let app = build_app(AppState::new(engine, &args.files_root));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
