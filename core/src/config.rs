use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables shared by the index builder, the retrieval engine and the ingest tool.
///
/// Every field has a default, so a config file only needs the keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Table holding one row per crawled page or attachment.
    pub document_table: String,
    /// Table holding the term -> postings rows.
    pub index_table: String,
    /// Puts buffered by the index builder before each flush.
    pub build_batch_size: usize,
    /// Documents fetched per multi-get while hydrating candidates and snippets.
    pub hydrate_batch_size: usize,
    /// Upper bound on rows matched by the title substring scan.
    pub title_scan_limit: usize,
    /// Characters kept in a result snippet before the ellipsis.
    pub snippet_chars: usize,
    /// Keywords extracted per document at ingest time.
    pub keyword_top_k: usize,
    /// Maximum stored length of `content:text`, in characters.
    pub max_content_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            document_table: "web_data".into(),
            index_table: "keyword_index".into(),
            build_batch_size: 1000,
            hydrate_batch_size: 100,
            title_scan_limit: 10_000,
            snippet_chars: 200,
            keyword_top_k: 20,
            max_content_chars: 50_000,
        }
    }
}

impl SearchConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load `path` when given, otherwise fall back to the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
