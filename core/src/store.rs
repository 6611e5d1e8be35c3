//! Wide-column storage: the trait the builder and the engine talk to, an embedded
//! `sled` backend, an in-memory backend, batched writes and the reconnecting
//! connection handle.

use crate::error::StoreError;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Column name -> raw cell value for one row.
pub type Row = BTreeMap<String, Vec<u8>>;

/// Iterator returned by [`WideColumnStore::scan`].
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<(String, Row), StoreError>> + 'a>;

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub row: String,
    pub column: String,
    pub value: Vec<u8>,
}

/// Logical wide-column store: tables of rows, each row a sorted set of `family:qualifier` cells.
///
/// Column projections are slices of column names; an empty slice selects every column.
pub trait WideColumnStore: Send + Sync {
    /// Cheap liveness probe.
    fn ping(&self) -> Result<(), StoreError>;
    fn tables(&self) -> Result<Vec<String>, StoreError>;
    /// Create `table` if it does not exist yet; a no-op otherwise.
    fn create_table(&self, table: &str) -> Result<(), StoreError>;
    fn row(&self, table: &str, key: &str, columns: &[&str]) -> Result<Option<Row>, StoreError>;
    /// Multi-get. Rows that do not exist are absent from the output; order follows `keys`.
    fn rows(&self, table: &str, keys: &[String], columns: &[&str]) -> Result<Vec<(String, Row)>, StoreError>;
    fn scan<'a>(&'a self, table: &str, columns: &'a [&'a str]) -> Result<RowIter<'a>, StoreError>;
    /// Rows whose `column` value contains `needle` as a raw substring, at most `limit` of them.
    fn scan_substring(
        &self,
        table: &str,
        column: &str,
        needle: &str,
        columns: &[&str],
        limit: usize,
    ) -> Result<Vec<(String, Row)>, StoreError>;
    fn put_batch(&self, table: &str, mutations: &[Mutation]) -> Result<(), StoreError>;
}

fn selected(columns: &[&str], column: &str) -> bool {
    columns.is_empty() || columns.contains(&column)
}

fn contains_substring(value: &[u8], needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    value.windows(needle.len()).any(|w| w == needle.as_bytes())
}

// --- sled backend ---

const SLED_DEFAULT_TREE: &[u8] = b"__sled__default";

/// Embedded backend: one sled tree per table, entries keyed by `row \0 column`.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self { db: sled::open(path)? })
    }

    /// A throwaway database removed when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        Ok(Self { db: sled::Config::new().temporary(true).open()? })
    }

    fn tree(&self, table: &str) -> Result<sled::Tree, StoreError> {
        if !self.has_table(table) {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        Ok(self.db.open_tree(table)?)
    }

    fn has_table(&self, table: &str) -> bool {
        self.db.tree_names().iter().any(|n| &n[..] == table.as_bytes())
    }

    fn cell_key(row: &str, column: &str) -> Result<Vec<u8>, StoreError> {
        if row.as_bytes().contains(&0) {
            return Err(StoreError::InvalidKey(row.to_string()));
        }
        let mut key = Vec::with_capacity(row.len() + column.len() + 1);
        key.extend_from_slice(row.as_bytes());
        key.push(0);
        key.extend_from_slice(column.as_bytes());
        Ok(key)
    }

    fn split_key(key: &[u8]) -> Option<(String, String)> {
        let sep = key.iter().position(|b| *b == 0)?;
        let row = String::from_utf8_lossy(&key[..sep]).into_owned();
        let column = String::from_utf8_lossy(&key[sep + 1..]).into_owned();
        Some((row, column))
    }

    fn read_row(tree: &sled::Tree, key: &str, columns: &[&str]) -> Result<Option<Row>, StoreError> {
        let prefix = Self::cell_key(key, "")?;
        let mut row = Row::new();
        let mut exists = false;
        for entry in tree.scan_prefix(&prefix) {
            let (k, v) = entry?;
            exists = true;
            let column = String::from_utf8_lossy(&k[prefix.len()..]).into_owned();
            if selected(columns, &column) {
                row.insert(column, v.to_vec());
            }
        }
        Ok(exists.then_some(row))
    }
}

/// Groups the sorted `(row, column, value)` cell stream of a tree into rows.
struct RowGrouper<I: Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> {
    cells: std::iter::Peekable<I>,
    columns: Vec<String>,
}

impl<I: Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> Iterator for RowGrouper<I> {
    type Item = Result<(String, Row), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut current: Option<(String, Row)> = None;
        loop {
            let next_row = match self.cells.peek() {
                None => return current.map(Ok),
                Some(Err(_)) => {
                    if current.is_some() {
                        return current.map(Ok);
                    }
                    let err = self.cells.next()?.err()?;
                    return Some(Err(err.into()));
                }
                Some(Ok((k, _))) => SledStore::split_key(k).map(|(r, _)| r),
            };
            if let (Some((row, _)), Some(next)) = (&current, &next_row) {
                if row != next {
                    return current.map(Ok);
                }
            }
            let Some(Ok((k, v))) = self.cells.next() else { continue };
            let Some((row_key, column)) = SledStore::split_key(&k) else { continue };
            let entry = current.get_or_insert_with(|| (row_key, Row::new()));
            if self.columns.is_empty() || self.columns.contains(&column) {
                entry.1.insert(column, v.to_vec());
            }
        }
    }
}

impl WideColumnStore for SledStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.db.size_on_disk()?;
        Ok(())
    }

    fn tables(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .db
            .tree_names()
            .into_iter()
            .filter(|n| &n[..] != SLED_DEFAULT_TREE)
            .map(|n| String::from_utf8_lossy(&n).into_owned())
            .collect())
    }

    fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.db.open_tree(table)?;
        Ok(())
    }

    fn row(&self, table: &str, key: &str, columns: &[&str]) -> Result<Option<Row>, StoreError> {
        let tree = self.tree(table)?;
        Self::read_row(&tree, key, columns)
    }

    fn rows(&self, table: &str, keys: &[String], columns: &[&str]) -> Result<Vec<(String, Row)>, StoreError> {
        let tree = self.tree(table)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = Self::read_row(&tree, key, columns)? {
                out.push((key.clone(), row));
            }
        }
        Ok(out)
    }

    fn scan<'a>(&'a self, table: &str, columns: &'a [&'a str]) -> Result<RowIter<'a>, StoreError> {
        let tree = self.tree(table)?;
        Ok(Box::new(RowGrouper {
            cells: tree.iter().peekable(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }))
    }

    fn scan_substring(
        &self,
        table: &str,
        column: &str,
        needle: &str,
        columns: &[&str],
        limit: usize,
    ) -> Result<Vec<(String, Row)>, StoreError> {
        let tree = self.tree(table)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            if out.len() >= limit {
                break;
            }
            let (k, v) = entry?;
            let Some((row_key, col)) = Self::split_key(&k) else { continue };
            if col != column || !contains_substring(&v, needle) {
                continue;
            }
            if let Some(row) = Self::read_row(&tree, &row_key, columns)? {
                out.push((row_key, row));
            }
        }
        Ok(out)
    }

    fn put_batch(&self, table: &str, mutations: &[Mutation]) -> Result<(), StoreError> {
        let tree = self.tree(table)?;
        let mut batch = sled::Batch::default();
        for m in mutations {
            batch.insert(Self::cell_key(&m.row, &m.column)?, m.value.as_slice());
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }
}

// --- in-memory backend ---

/// Process-local backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, BTreeMap<String, Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a single cell, creating the table if needed.
    pub fn put(&self, table: &str, row: &str, column: &str, value: impl Into<Vec<u8>>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .entry(row.to_string())
            .or_default()
            .insert(column.to_string(), value.into());
    }

    fn project(row: &Row, columns: &[&str]) -> Row {
        row.iter()
            .filter(|(c, _)| selected(columns, c))
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect()
    }
}

impl WideColumnStore for MemoryStore {
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn tables(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.tables.write().entry(table.to_string()).or_default();
        Ok(())
    }

    fn row(&self, table: &str, key: &str, columns: &[&str]) -> Result<Option<Row>, StoreError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(t.get(key).map(|r| Self::project(r, columns)))
    }

    fn rows(&self, table: &str, keys: &[String], columns: &[&str]) -> Result<Vec<(String, Row)>, StoreError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(keys
            .iter()
            .filter_map(|k| t.get(k).map(|r| (k.clone(), Self::project(r, columns))))
            .collect())
    }

    fn scan<'a>(&'a self, table: &str, columns: &'a [&'a str]) -> Result<RowIter<'a>, StoreError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let snapshot: Vec<(String, Row)> =
            t.iter().map(|(k, r)| (k.clone(), Self::project(r, columns))).collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn scan_substring(
        &self,
        table: &str,
        column: &str,
        needle: &str,
        columns: &[&str],
        limit: usize,
    ) -> Result<Vec<(String, Row)>, StoreError> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(t.iter()
            .filter(|(_, r)| r.get(column).is_some_and(|v| contains_substring(v, needle)))
            .take(limit)
            .map(|(k, r)| (k.clone(), Self::project(r, columns)))
            .collect())
    }

    fn put_batch(&self, table: &str, mutations: &[Mutation]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        for m in mutations {
            t.entry(m.row.clone()).or_default().insert(m.column.clone(), m.value.clone());
        }
        Ok(())
    }
}

// --- batched writes ---

/// Buffers puts and sends them to the store every `batch_size` mutations.
///
/// Each flush is applied on its own; a failed flush leaves earlier flushes in place.
pub struct BatchWriter<'a> {
    store: &'a dyn WideColumnStore,
    table: String,
    batch_size: usize,
    pending: Vec<Mutation>,
    flushed: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn WideColumnStore, table: &str, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self { store, table: table.to_string(), batch_size, pending: Vec::with_capacity(batch_size), flushed: 0 }
    }

    pub fn put(&mut self, row: impl Into<String>, column: impl Into<String>, value: Vec<u8>) -> Result<(), StoreError> {
        self.pending.push(Mutation { row: row.into(), column: column.into(), value });
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.store.put_batch(&self.table, &self.pending)?;
        self.flushed += self.pending.len();
        self.pending.clear();
        Ok(())
    }

    /// Mutations successfully sent so far.
    pub fn flushed(&self) -> usize {
        self.flushed
    }
}

// --- connection handle ---

/// Opens a fresh store handle; called at startup and on reconnect.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn WideColumnStore>, StoreError>;
    fn describe(&self) -> String;
}

/// Opens the database once and hands out clones of that handle afterwards.
///
/// sled locks its directory for the life of the process-wide `Db`, so reopening the
/// path while another handle is alive would fail.
pub struct SledConnector {
    path: PathBuf,
    db: Mutex<Option<sled::Db>>,
}

impl SledConnector {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf(), db: Mutex::new(None) }
    }
}

impl Connector for SledConnector {
    fn connect(&self) -> Result<Arc<dyn WideColumnStore>, StoreError> {
        let mut cached = self.db.lock();
        let db = match cached.as_ref() {
            Some(db) => db.clone(),
            None => {
                let db = sled::open(&self.path)?;
                *cached = Some(db.clone());
                db
            }
        };
        Ok(Arc::new(SledStore { db }))
    }

    fn describe(&self) -> String {
        format!("sled:{}", self.path.display())
    }
}

/// Hands out an already-open store, e.g. a shared [`MemoryStore`].
pub struct StaticConnector(pub Arc<dyn WideColumnStore>);

impl Connector for StaticConnector {
    fn connect(&self) -> Result<Arc<dyn WideColumnStore>, StoreError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static".into()
    }
}

/// Health-checked store handle owned by the engine.
pub struct Connection {
    connector: Box<dyn Connector>,
    current: RwLock<Option<Arc<dyn WideColumnStore>>>,
}

impl Connection {
    /// Connect eagerly; a failure is logged and retried on first use.
    pub fn open(connector: Box<dyn Connector>) -> Self {
        let current = match connector.connect() {
            Ok(store) => {
                tracing::info!(target = %connector.describe(), "connected to storage");
                Some(store)
            }
            Err(e) => {
                tracing::error!(target = %connector.describe(), error = %e, "failed to connect to storage");
                None
            }
        };
        Self { connector, current: RwLock::new(current) }
    }

    /// Connect and fail immediately when the store is unreachable.
    pub fn connect(connector: Box<dyn Connector>) -> Result<Self, StoreError> {
        let store = connector.connect()?;
        tracing::info!(target = %connector.describe(), "connected to storage");
        Ok(Self { connector, current: RwLock::new(Some(store)) })
    }

    /// Probe the current handle and reconnect once if it is missing or dead.
    pub fn ensure_connected(&self) -> Result<Arc<dyn WideColumnStore>, StoreError> {
        let existing = self.current.read().clone();
        if let Some(store) = existing {
            match store.ping() {
                Ok(()) => return Ok(store),
                Err(e) => tracing::warn!(error = %e, "storage connection lost, reconnecting"),
            }
        }
        let mut current = self.current.write();
        *current = None;
        match self.connector.connect() {
            Ok(store) => {
                tracing::info!(target = %self.connector.describe(), "reconnected to storage");
                *current = Some(store.clone());
                Ok(store)
            }
            Err(e) => Err(StoreError::Unavailable(format!("{}: {e}", self.connector.describe()))),
        }
    }
}
