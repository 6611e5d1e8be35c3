#![allow(dead_code)]

use search_core::document::{DocumentRecord, KeywordTag};
use search_core::store::{Connector, MemoryStore, Mutation, Row, RowIter, WideColumnStore};
use search_core::{DocType, SearchConfig, StoreError, Tokenizer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Whitespace segmentation keeps test queries deterministic.
pub struct SpaceTokenizer;

impl Tokenizer for SpaceTokenizer {
    fn segment(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
    fn extract_keywords(&self, _: &str, _: usize) -> Vec<KeywordTag> {
        Vec::new()
    }
}

pub fn doc(id: &str, doc_type: DocType, title: &str, keywords: &[(&str, f64)]) -> DocumentRecord {
    DocumentRecord {
        doc_id: id.into(),
        doc_type,
        title: title.into(),
        url: format!("https://www.example.edu.cn/{id}.html"),
        parent_url: String::new(),
        date: None,
        content_text: format!("{title}\n正文内容"),
        keywords: keywords.iter().map(|(w, weight)| KeywordTag { word: w.to_string(), weight: *weight }).collect(),
        file_paths: Vec::new(),
    }
}

pub fn insert(store: &dyn WideColumnStore, config: &SearchConfig, record: &DocumentRecord) {
    store.create_table(&config.document_table).unwrap();
    let mutations: Vec<Mutation> = record
        .to_columns()
        .unwrap()
        .into_iter()
        .map(|(column, value)| Mutation { row: record.doc_id.clone(), column: column.into(), value })
        .collect();
    store.put_batch(&config.document_table, &mutations).unwrap();
}

pub fn set_raw(store: &MemoryStore, config: &SearchConfig, id: &str, column: &str, value: &str) {
    store.put(&config.document_table, id, column, value);
}

/// Delegating store that counts every call and can be told to fail.
pub struct InstrumentedStore {
    pub inner: Arc<MemoryStore>,
    pub calls: AtomicUsize,
    pub failing_pings: AtomicUsize,
    pub fail_puts_after: Option<usize>,
    pub puts: AtomicUsize,
    pub fail_table: Option<String>,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            failing_pings: AtomicUsize::new(0),
            fail_puts_after: None,
            puts: AtomicUsize::new(0),
            fail_table: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self, table: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_table.as_deref() == Some(table) {
            return Err(StoreError::Unavailable(format!("{table} offline")));
        }
        Ok(())
    }
}

impl WideColumnStore for InstrumentedStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failing_pings.load(Ordering::SeqCst);
        if left > 0 {
            self.failing_pings.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("socket closed".into()));
        }
        Ok(())
    }
    fn tables(&self) -> Result<Vec<String>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.tables()
    }
    fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.touch(table)?;
        self.inner.create_table(table)
    }
    fn row(&self, table: &str, key: &str, columns: &[&str]) -> Result<Option<Row>, StoreError> {
        self.touch(table)?;
        self.inner.row(table, key, columns)
    }
    fn rows(&self, table: &str, keys: &[String], columns: &[&str]) -> Result<Vec<(String, Row)>, StoreError> {
        self.touch(table)?;
        self.inner.rows(table, keys, columns)
    }
    fn scan<'a>(&'a self, table: &str, columns: &'a [&'a str]) -> Result<RowIter<'a>, StoreError> {
        self.touch(table)?;
        self.inner.scan(table, columns)
    }
    fn scan_substring(
        &self,
        table: &str,
        column: &str,
        needle: &str,
        columns: &[&str],
        limit: usize,
    ) -> Result<Vec<(String, Row)>, StoreError> {
        self.touch(table)?;
        self.inner.scan_substring(table, column, needle, columns, limit)
    }
    fn put_batch(&self, table: &str, mutations: &[Mutation]) -> Result<(), StoreError> {
        self.touch(table)?;
        let n = self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts_after.is_some_and(|limit| n >= limit) {
            return Err(StoreError::Unavailable("write timeout".into()));
        }
        self.inner.put_batch(table, mutations)
    }
}

/// Hands out the same store and counts how often it was asked to.
pub struct CountingConnector {
    pub store: Arc<InstrumentedStore>,
    pub connects: Arc<AtomicUsize>,
}

impl Connector for CountingConnector {
    fn connect(&self) -> Result<Arc<dyn WideColumnStore>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
    fn describe(&self) -> String {
        "counting".into()
    }
}

pub struct DownConnector;

impl Connector for DownConnector {
    fn connect(&self) -> Result<Arc<dyn WideColumnStore>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
    fn describe(&self) -> String {
        "down".into()
    }
}
