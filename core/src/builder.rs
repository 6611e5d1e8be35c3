//! Offline inverted-index build: document keywords -> `term -> {doc_id: posting}` rows.

use crate::config::SearchConfig;
use crate::document::{columns, parse_keywords, posting_column, round_to, DocType, PostingValue};
use crate::store::{BatchWriter, WideColumnStore};
use crate::tokenizer::is_stopword;
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Documents whose keyword list was read and indexed.
    pub documents_processed: usize,
    /// Postings written to the index table.
    pub entries_written: usize,
    /// Documents skipped because `info:keywords` was not a JSON array.
    pub malformed_documents: usize,
    /// Documents skipped because they carry no keywords at all.
    pub documents_without_keywords: usize,
}

/// Keyword admission policy: non-empty, at least two characters, not a stop-word.
pub fn is_indexable(word: &str) -> bool {
    !word.is_empty() && word.chars().count() >= 2 && !is_stopword(word)
}

pub struct IndexBuilder {
    document_table: String,
    index_table: String,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            document_table: config.document_table.clone(),
            index_table: config.index_table.clone(),
            batch_size: config.build_batch_size,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Create the index table unless it already exists.
    pub fn ensure_index_table(&self, index_store: &dyn WideColumnStore) -> Result<()> {
        let tables = index_store.tables().context("listing tables")?;
        if tables.iter().any(|t| t == &self.index_table) {
            tracing::info!(table = %self.index_table, "index table already exists");
        } else {
            tracing::info!(table = %self.index_table, "creating index table");
            index_store
                .create_table(&self.index_table)
                .with_context(|| format!("creating table {}", self.index_table))?;
        }
        Ok(())
    }

    /// Full pass over the document table.
    ///
    /// Re-running against unchanged documents rewrites identical postings. Batches
    /// flushed before a write failure stay in the index.
    pub fn build(&self, document_store: &dyn WideColumnStore, index_store: &dyn WideColumnStore) -> Result<BuildStats> {
        self.ensure_index_table(index_store)?;

        let mut stats = BuildStats::default();
        let mut writer = BatchWriter::new(index_store, &self.index_table, self.batch_size);
        let projection = [columns::KEYWORDS, columns::TYPE];

        tracing::info!(table = %self.document_table, batch_size = self.batch_size, "scanning documents");
        let rows = document_store
            .scan(&self.document_table, &projection)
            .with_context(|| format!("scanning {}", self.document_table))?;

        for entry in rows {
            let (doc_id, row) = entry.context("reading document row")?;
            let doc_type = row
                .get(columns::TYPE)
                .map(|v| DocType::parse(&String::from_utf8_lossy(v)))
                .unwrap_or_default();

            let raw = match row.get(columns::KEYWORDS) {
                Some(raw) if !raw.is_empty() => raw,
                _ => {
                    stats.documents_without_keywords += 1;
                    continue;
                }
            };
            let keywords = match parse_keywords(raw) {
                Ok(k) => k,
                Err(e) => {
                    tracing::warn!(doc_id = %doc_id, error = %e, "invalid JSON in info:keywords");
                    stats.malformed_documents += 1;
                    continue;
                }
            };

            let column = posting_column(&doc_id);
            for tag in keywords {
                if !is_indexable(&tag.word) || !tag.weight.is_finite() {
                    continue;
                }
                let value = serde_json::to_vec(&PostingValue { weight: round_to(tag.weight, 4), doc_type })?;
                writer.put(tag.word, column.clone(), value).with_context(|| {
                    format!("flushing index batch after {} entries", writer.flushed())
                })?;
                stats.entries_written += 1;
            }

            stats.documents_processed += 1;
            if stats.documents_processed % 100 == 0 {
                tracing::info!(documents = stats.documents_processed, entries = stats.entries_written, "processed documents");
            }
        }

        writer
            .flush()
            .with_context(|| format!("flushing final index batch after {} entries", writer.flushed()))?;

        tracing::info!(
            documents = stats.documents_processed,
            entries = stats.entries_written,
            malformed = stats.malformed_documents,
            "index build complete"
        );
        Ok(stats)
    }
}
