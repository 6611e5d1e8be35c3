pub mod builder;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod scoring;
pub mod store;
pub mod tokenizer;

pub use builder::{BuildStats, IndexBuilder};
pub use config::SearchConfig;
pub use document::{DocId, DocType, DocumentMeta, DocumentRecord, KeywordTag, PostingValue};
pub use engine::{SearchEngine, SearchResult};
pub use error::{ConfigError, StoreError};
pub use store::{Connection, MemoryStore, SledConnector, SledStore, StaticConnector, WideColumnStore};
pub use tokenizer::{filter_query, JiebaTokenizer, Tokenizer};
