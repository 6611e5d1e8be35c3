use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use search_core::document::{PostingValue, POSTING_PREFIX};
use search_core::store::{Connection, SledConnector, WideColumnStore};
use search_core::{filter_query, IndexBuilder, JiebaTokenizer, SearchConfig, SearchEngine};
use serde::Serialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and inspect the keyword inverted index", long_about = None)]
struct Cli {
    /// Path of the sled database holding the document and index tables
    #[arg(long, env = "SEARCH_DB", default_value = "./data/search.db", global = true)]
    db: String,
    /// Optional JSON config overriding table names and batch sizes
    #[arg(long, env = "SEARCH_CONFIG", global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the inverted index from every document's keywords
    Build {
        /// Puts buffered per write batch (overrides the config)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Show the posting rows a query touches, then run it
    Inspect {
        query: String,
        #[arg(long, default_value_t = 5)]
        k: usize,
    },
    /// Run a query and print the results as JSON
    Search {
        query: String,
        /// Number of results; omit to return every match
        #[arg(long)]
        k: Option<usize>,
    },
}

#[derive(Serialize)]
struct BuildReport<'a> {
    finished_at: String,
    #[serde(flatten)]
    stats: &'a search_core::BuildStats,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = SearchConfig::load_or_default(cli.config.as_deref())?;

    // Storage is required for every subcommand.
    let connection = Connection::connect(Box::new(SledConnector::new(&cli.db)))
        .with_context(|| format!("opening database {}", cli.db))?;

    match cli.command {
        Commands::Build { batch_size } => {
            let store = connection.ensure_connected()?;
            let mut builder = IndexBuilder::new(&config);
            if let Some(n) = batch_size {
                builder = builder.with_batch_size(n);
            }
            let stats = builder.build(store.as_ref(), store.as_ref())?;
            let report = BuildReport {
                finished_at: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
                stats: &stats,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Inspect { query, k } => {
            let store = connection.ensure_connected()?;
            inspect_postings(store.as_ref(), &config, &query)?;
            let engine = SearchEngine::new(connection, Arc::new(JiebaTokenizer), config);
            for (i, r) in engine.search(&query, Some(k)).iter().enumerate() {
                println!("#{} [{}] {:.2} {} ({})", i + 1, r.doc_type, r.score, r.title, r.url);
                if !r.snippet.is_empty() {
                    println!("    {}", r.snippet);
                }
            }
        }
        Commands::Search { query, k } => {
            let engine = SearchEngine::new(connection, Arc::new(JiebaTokenizer), config);
            let results = engine.search(&query, k);
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }
    Ok(())
}

fn inspect_postings(store: &dyn WideColumnStore, config: &SearchConfig, query: &str) -> Result<()> {
    let tokens = filter_query(&JiebaTokenizer, query);
    println!("tokens: {tokens:?}");
    for token in &tokens {
        match store.row(&config.index_table, token, &[]) {
            Ok(Some(row)) => {
                println!("term {token:?}: {} documents", row.len());
                for (column, raw) in row.iter().take(10) {
                    let doc_id = column.strip_prefix(POSTING_PREFIX).unwrap_or(column);
                    match serde_json::from_slice::<PostingValue>(raw) {
                        Ok(p) => println!("    {doc_id} w={} t={}", p.weight, p.doc_type),
                        Err(_) => println!("    {doc_id} <malformed posting>"),
                    }
                }
            }
            Ok(None) => println!("term {token:?}: not indexed"),
            Err(e) => println!("term {token:?}: lookup failed: {e}"),
        }
    }
    Ok(())
}
