use thiserror::Error;

/// Failures surfaced by a [`WideColumnStore`](crate::store::WideColumnStore) or its connection handle.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached, even after one reconnect attempt.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("invalid row key {0:?}: row keys must not contain NUL bytes")]
    InvalidKey(String),
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
