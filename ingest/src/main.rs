use anyhow::{Context, Result};
use clap::Parser;
use ingest::Ingestor;
use search_core::store::{Connection, SledConnector};
use search_core::{JiebaTokenizer, SearchConfig};
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Load crawled pages and extracted attachments into the document table")]
struct Cli {
    /// Input path (JSON/JSONL file or a directory of them)
    #[arg(long)]
    input: String,
    /// Path of the sled database
    #[arg(long, env = "SEARCH_DB", default_value = "./data/search.db")]
    db: String,
    /// Optional JSON config overriding table names and limits
    #[arg(long, env = "SEARCH_CONFIG")]
    config: Option<String>,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();
    let config = SearchConfig::load_or_default(args.config.as_deref())?;

    let connection = Connection::connect(Box::new(SledConnector::new(&args.db)))
        .with_context(|| format!("opening database {}", args.db))?;
    let store = connection.ensure_connected()?;

    let tokenizer = JiebaTokenizer;
    let stats = Ingestor::new(config, &tokenizer).ingest_path(store.as_ref(), Path::new(&args.input))?;
    eprintln!(
        "done: written={} skipped={} malformed={} -> {}",
        stats.documents_written, stats.skipped, stats.malformed, args.db
    );
    Ok(())
}
