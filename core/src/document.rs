use crate::store::Row;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content-derived row key of a document (hex digest of its URL or text).
pub type DocId = String;

/// Column names of the document table.
pub mod columns {
    pub const TITLE: &str = "info:title";
    pub const URL: &str = "info:url";
    pub const PARENT_URL: &str = "info:parent_url";
    pub const DATE: &str = "info:date";
    pub const TYPE: &str = "info:type";
    pub const KEYWORDS: &str = "info:keywords";
    pub const TEXT: &str = "content:text";
    pub const FILE_PATHS: &str = "files:path";

    /// Columns needed to score and render a result.
    pub const META: &[&str] = &[TITLE, TYPE, FILE_PATHS, DATE, URL, PARENT_URL];
}

/// Column family prefix of a posting inside an index row.
pub const POSTING_PREFIX: &str = "p:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    #[default]
    Web,
    File,
}

impl DocType {
    /// Anything other than `file` is treated as a web page.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "file" => DocType::File,
            _ => DocType::Web,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Web => "web",
            DocType::File => "file",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A weighted keyword as produced by the tokenizer's keyword extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordTag {
    pub word: String,
    pub weight: f64,
}

/// Wire shapes accepted in `info:keywords`. Never leaves this module.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawKeyword {
    Tagged {
        word: String,
        #[serde(default)]
        weight: Option<serde_json::Value>,
    },
    Bare(String),
}

impl RawKeyword {
    fn normalize(self) -> KeywordTag {
        match self {
            RawKeyword::Tagged { word, weight } => {
                let weight = match weight {
                    Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(1.0),
                    Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(1.0),
                    _ => 1.0,
                };
                KeywordTag { word, weight }
            }
            RawKeyword::Bare(word) => KeywordTag { word, weight: 1.0 },
        }
    }
}

/// Parse the JSON array stored in `info:keywords`.
///
/// Structured `{word, weight}` items and bare strings are both accepted; other array
/// elements are ignored. A payload that is not a JSON array is an error.
pub fn parse_keywords(raw: &[u8]) -> Result<Vec<KeywordTag>, serde_json::Error> {
    let items: Vec<serde_json::Value> = serde_json::from_slice(raw)?;
    Ok(items
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawKeyword>(v).ok())
        .map(RawKeyword::normalize)
        .collect())
}

/// Parse the JSON array of relative attachment paths stored in `files:path`.
pub fn parse_file_paths(raw: &[u8]) -> Result<Vec<String>, serde_json::Error> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(raw)
}

/// Value stored under `p:{doc_id}` in an index row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingValue {
    #[serde(rename = "w")]
    pub weight: f64,
    #[serde(rename = "t")]
    pub doc_type: DocType,
}

pub fn posting_column(doc_id: &str) -> String {
    format!("{POSTING_PREFIX}{doc_id}")
}

/// Round to `places` decimals using the exact binary value, so ties go to even.
///
/// `0.05425` is stored just below the tie and becomes `0.0542`.
pub fn round_to(value: f64, places: usize) -> f64 {
    format!("{value:.places$}").parse().unwrap_or(value)
}

/// The slice of a document row needed for scoring and rendering a result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMeta {
    pub title: String,
    pub url: String,
    pub parent_url: String,
    pub date: Option<String>,
    pub doc_type: DocType,
    pub file_paths: Vec<String>,
}

impl DocumentMeta {
    pub fn from_row(doc_id: &str, row: &Row) -> Self {
        let text = |col: &str| {
            row.get(col)
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default()
        };
        let file_paths = match row.get(columns::FILE_PATHS) {
            Some(raw) => parse_file_paths(raw).unwrap_or_else(|e| {
                tracing::warn!(doc_id, error = %e, "malformed files:path, ignoring attachments");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let date = Some(text(columns::DATE)).filter(|d| !d.trim().is_empty());
        Self {
            title: text(columns::TITLE),
            url: text(columns::URL),
            parent_url: text(columns::PARENT_URL),
            date,
            doc_type: DocType::parse(&text(columns::TYPE)),
            file_paths,
        }
    }

    /// URL to show for the document: its own, or the page it was attached to.
    pub fn display_url(&self) -> &str {
        if self.url.is_empty() {
            &self.parent_url
        } else {
            &self.url
        }
    }
}

/// A full document row as written by the ingest pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub doc_id: DocId,
    pub doc_type: DocType,
    pub title: String,
    pub url: String,
    pub parent_url: String,
    pub date: Option<String>,
    pub content_text: String,
    pub keywords: Vec<KeywordTag>,
    pub file_paths: Vec<String>,
}

impl DocumentRecord {
    /// Column/value pairs for this record, keywords rounded to 4 decimals.
    pub fn to_columns(&self) -> Result<Vec<(&'static str, Vec<u8>)>, serde_json::Error> {
        let keywords: Vec<KeywordTag> = self
            .keywords
            .iter()
            .map(|k| KeywordTag { word: k.word.clone(), weight: round_to(k.weight, 4) })
            .collect();
        let mut cols = vec![
            (columns::TYPE, self.doc_type.as_str().as_bytes().to_vec()),
            (columns::TITLE, self.title.as_bytes().to_vec()),
            (columns::TEXT, self.content_text.as_bytes().to_vec()),
            (columns::KEYWORDS, serde_json::to_vec(&keywords)?),
            (columns::FILE_PATHS, serde_json::to_vec(&self.file_paths)?),
        ];
        if !self.url.is_empty() {
            cols.push((columns::URL, self.url.as_bytes().to_vec()));
        }
        if !self.parent_url.is_empty() {
            cols.push((columns::PARENT_URL, self.parent_url.as_bytes().to_vec()));
        }
        if let Some(date) = &self.date {
            cols.push((columns::DATE, date.as_bytes().to_vec()));
        }
        Ok(cols)
    }
}
