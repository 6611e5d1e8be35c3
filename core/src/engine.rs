//! Hybrid retrieval: inverted-index recall plus title substring recall, merged,
//! hydrated, scored, deduplicated and decorated with snippets.

use crate::config::SearchConfig;
use crate::document::{columns, DocId, DocType, DocumentMeta, PostingValue, POSTING_PREFIX};
use crate::error::StoreError;
use crate::scoring::{bm25, final_score, TITLE_MATCH_SCORE};
use crate::store::{Connection, Row, WideColumnStore};
use crate::tokenizer::{filter_query, Tokenizer};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::{Date, OffsetDateTime};

lazy_static! {
    static ref LINE_BREAKS: Regex = Regex::new(r"[\r\n]+").expect("valid regex");
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub doc_id: DocId,
    pub title: String,
    pub url: String,
    pub parent_url: String,
    pub score: f64,
    #[serde(rename = "type")]
    pub doc_type: DocType,
    pub date: Option<String>,
    pub file_paths: Vec<String>,
    pub snippet: String,
}

/// Title recall strategy. The default is a bounded substring scan over the document
/// table; a secondary index can replace it without touching scoring.
pub trait TitleRecall: Send + Sync {
    fn recall(&self, store: &dyn WideColumnStore, table: &str, token: &str, limit: usize)
        -> Result<Vec<(DocId, Row)>, StoreError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TitleSubstringScan;

impl TitleRecall for TitleSubstringScan {
    fn recall(&self, store: &dyn WideColumnStore, table: &str, token: &str, limit: usize)
        -> Result<Vec<(DocId, Row)>, StoreError> {
        store.scan_substring(table, columns::TITLE, token, columns::META, limit)
    }
}

/// Per-query candidate state.
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub doc_id: DocId,
    pub index_score: f64,
    pub scan_score: f64,
    pub meta: Option<DocumentMeta>,
}

/// Candidates in first-sighting order, addressable by document id.
#[derive(Debug, Default)]
pub struct CandidateSet {
    slots: Vec<Candidate>,
    by_id: HashMap<DocId, usize>,
}

impl CandidateSet {
    fn slot(&mut self, doc_id: &str) -> &mut Candidate {
        let idx = match self.by_id.get(doc_id) {
            Some(&i) => i,
            None => {
                self.slots.push(Candidate { doc_id: doc_id.to_string(), ..Default::default() });
                self.by_id.insert(doc_id.to_string(), self.slots.len() - 1);
                self.slots.len() - 1
            }
        };
        &mut self.slots[idx]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, doc_id: &str) -> Option<&Candidate> {
        self.by_id.get(doc_id).map(|&i| &self.slots[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.slots.iter()
    }

    fn unhydrated(&self) -> Vec<DocId> {
        self.slots.iter().filter(|c| c.meta.is_none()).map(|c| c.doc_id.clone()).collect()
    }
}

/// Union the two recall paths by document id. Index hits come first, in sighting order.
pub fn merge_candidates(index_hits: Vec<(DocId, f64)>, title_hits: Vec<(DocId, DocumentMeta)>) -> CandidateSet {
    let mut set = CandidateSet::default();
    for (doc_id, score) in index_hits {
        set.slot(&doc_id).index_score += score;
    }
    for (doc_id, meta) in title_hits {
        let c = set.slot(&doc_id);
        c.scan_score = TITLE_MATCH_SCORE;
        c.meta = Some(meta);
    }
    set
}

/// Keep the first occurrence of each `(title, url)` pair of a score-sorted list.
pub fn dedup_by_title_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert((r.title.clone(), r.url.clone())))
        .collect()
}

/// Leading `max_chars` characters with line breaks flattened, followed by `...`.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", LINE_BREAKS.replace_all(&head, " "))
}

pub struct SearchEngine {
    connection: Connection,
    tokenizer: Arc<dyn Tokenizer>,
    title_recall: Box<dyn TitleRecall>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(connection: Connection, tokenizer: Arc<dyn Tokenizer>, config: SearchConfig) -> Self {
        Self { connection, tokenizer, title_recall: Box::new(TitleSubstringScan), config }
    }

    pub fn with_title_recall(mut self, recall: Box<dyn TitleRecall>) -> Self {
        self.title_recall = recall;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Ranked results for `query`; `top_k = None` returns every scored candidate.
    ///
    /// Storage failures degrade the affected step and are logged; they never surface.
    pub fn search(&self, query: &str, top_k: Option<usize>) -> Vec<SearchResult> {
        self.search_on(query, top_k, OffsetDateTime::now_utc().date())
    }

    /// [`search`](Self::search) with the reference date for time decay pinned.
    pub fn search_on(&self, query: &str, top_k: Option<usize>, today: Date) -> Vec<SearchResult> {
        let tokens = filter_query(self.tokenizer.as_ref(), query);
        tracing::debug!(query, ?tokens, "filtered query");
        if tokens.is_empty() {
            return Vec::new();
        }

        let index_hits = self.connection.ensure_connected().and_then(|s| self.recall_by_index(s.as_ref(), &tokens));
        let index_hits = index_hits.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "index recall failed");
            Vec::new()
        });

        let title_hits = self
            .connection
            .ensure_connected()
            .and_then(|s| self.recall_by_title_scan(s.as_ref(), &tokens[0]));
        let title_hits = title_hits.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "title recall failed");
            Vec::new()
        });

        let (n_index, n_title) = (index_hits.len(), title_hits.len());
        let mut candidates = merge_candidates(index_hits, title_hits);
        self.hydrate(&mut candidates);

        let mut results: Vec<SearchResult> = candidates
            .slots
            .into_iter()
            .filter_map(|c| {
                let meta = c.meta?;
                let score = final_score(c.index_score, c.scan_score, &meta, today);
                let url = meta.display_url().to_string();
                Some(SearchResult {
                    doc_id: c.doc_id,
                    title: meta.title,
                    url,
                    parent_url: meta.parent_url,
                    score,
                    doc_type: meta.doc_type,
                    date: meta.date,
                    file_paths: meta.file_paths,
                    snippet: String::new(),
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let mut results = dedup_by_title_url(results);
        if let Some(k) = top_k {
            results.truncate(k);
        }
        self.attach_snippets(&mut results);

        tracing::info!(query, index_hits = n_index, title_hits = n_title, returned = results.len(), "search complete");
        results
    }

    /// Accumulated BM25 contribution per document over every token's posting row.
    /// A term whose lookup fails is skipped; the other terms still count.
    pub fn recall_by_index(&self, store: &dyn WideColumnStore, tokens: &[String]) -> Result<Vec<(DocId, f64)>, StoreError> {
        let mut order: Vec<DocId> = Vec::new();
        let mut scores: HashMap<DocId, f64> = HashMap::new();
        for token in tokens {
            let row = match store.row(&self.config.index_table, token, &[]) {
                Ok(Some(row)) => row,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(term = %token, error = %e, "posting lookup failed");
                    continue;
                }
            };
            for (column, raw) in row {
                let Some(doc_id) = column.strip_prefix(POSTING_PREFIX) else { continue };
                let posting: PostingValue = match serde_json::from_slice(&raw) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(term = %token, doc_id, error = %e, "malformed posting");
                        continue;
                    }
                };
                let contribution = bm25(posting.weight);
                match scores.get_mut(doc_id) {
                    Some(s) => *s += contribution,
                    None => {
                        order.push(doc_id.to_string());
                        scores.insert(doc_id.to_string(), contribution);
                    }
                }
            }
        }
        Ok(order
            .into_iter()
            .map(|id| {
                let score = scores[&id];
                (id, score)
            })
            .collect())
    }

    /// Documents whose title contains `token`, with their metadata already read.
    pub fn recall_by_title_scan(&self, store: &dyn WideColumnStore, token: &str) -> Result<Vec<(DocId, DocumentMeta)>, StoreError> {
        let rows = self
            .title_recall
            .recall(store, &self.config.document_table, token, self.config.title_scan_limit)?;
        Ok(rows
            .into_iter()
            .map(|(id, row)| {
                let meta = DocumentMeta::from_row(&id, &row);
                (id, meta)
            })
            .collect())
    }

    /// Fetch metadata for index-only candidates in fixed-size batches.
    /// Candidates still without metadata afterwards are left unhydrated and later dropped.
    fn hydrate(&self, candidates: &mut CandidateSet) {
        let missing = candidates.unhydrated();
        if missing.is_empty() {
            return;
        }
        let store = match self.connection.ensure_connected() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, missing = missing.len(), "cannot hydrate candidates");
                return;
            }
        };
        for chunk in missing.chunks(self.config.hydrate_batch_size.max(1)) {
            match store.rows(&self.config.document_table, chunk, columns::META) {
                Ok(rows) => {
                    for (id, row) in rows {
                        candidates.slot(&id).meta = Some(DocumentMeta::from_row(&id, &row));
                    }
                }
                Err(e) => tracing::warn!(error = %e, batch = chunk.len(), "hydration batch failed"),
            }
        }
    }

    fn attach_snippets(&self, results: &mut [SearchResult]) {
        if results.is_empty() {
            return;
        }
        let store = match self.connection.ensure_connected() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "cannot fetch snippets");
                return;
            }
        };
        let ids: Vec<DocId> = results.iter().map(|r| r.doc_id.clone()).collect();
        let mut texts: HashMap<DocId, String> = HashMap::new();
        for chunk in ids.chunks(self.config.hydrate_batch_size.max(1)) {
            match store.rows(&self.config.document_table, chunk, &[columns::TEXT]) {
                Ok(rows) => {
                    for (id, row) in rows {
                        if let Some(text) = row.get(columns::TEXT) {
                            texts.insert(id, String::from_utf8_lossy(text).into_owned());
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, batch = chunk.len(), "snippet fetch failed"),
            }
        }
        for r in results.iter_mut() {
            if let Some(text) = texts.get(&r.doc_id) {
                r.snippet = make_snippet(text, self.config.snippet_chars);
            }
        }
    }
}
