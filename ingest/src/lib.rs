//! Loads crawl output into the document table.
//!
//! Input is JSON (one object or an array) or JSONL, one record per crawled page or
//! extracted attachment. Each record becomes one row keyed by a SHA-1 digest of its
//! URL (pages) or of its text (attachments), with keywords extracted on the way in.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use search_core::document::DocumentRecord;
use search_core::store::{BatchWriter, WideColumnStore};
use search_core::{DocType, SearchConfig, Tokenizer};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

lazy_static! {
    static ref CONTROL: Regex = Regex::new(r"[\x00-\x1f\x7f]").expect("valid regex");
    static ref SPACES: Regex = Regex::new(r"\s+").expect("valid regex");
}

const TITLE_FROM_TEXT_CHARS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CrawlRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "text", alias = "parsed_text")]
    pub body: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub parent_url: Option<String>,
    #[serde(default)]
    pub parent_title: Option<String>,
    /// Attachment paths relative to the files root.
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub documents_written: usize,
    pub skipped: usize,
    pub malformed: usize,
}

/// Replace control characters with spaces and collapse runs of whitespace.
pub fn clean_text(raw: &str) -> String {
    let no_control = CONTROL.replace_all(raw, " ");
    SPACES.replace_all(&no_control, " ").trim().to_string()
}

pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Title for an attachment: its own, else the first line of its text, else the page it hangs off.
pub fn attachment_title(title: &str, raw_text: &str, parent_title: &str) -> String {
    if !title.trim().is_empty() {
        return title.trim().to_string();
    }
    let first_line = raw_text.lines().next().unwrap_or("").trim();
    if !first_line.is_empty() {
        return first_line.chars().take(TITLE_FROM_TEXT_CHARS).collect();
    }
    format!("【附件】{parent_title}").trim().to_string()
}

pub struct Ingestor<'t> {
    config: SearchConfig,
    tokenizer: &'t dyn Tokenizer,
}

impl<'t> Ingestor<'t> {
    pub fn new(config: SearchConfig, tokenizer: &'t dyn Tokenizer) -> Self {
        Self { config, tokenizer }
    }

    /// Turn a crawl record into a document row. Attachments without text are skipped.
    pub fn to_document(&self, record: CrawlRecord) -> Option<DocumentRecord> {
        let doc_type = record.kind.as_deref().map(DocType::parse).unwrap_or_default();
        let cleaned = clean_text(&record.body);
        let content_text: String = cleaned.chars().take(self.config.max_content_chars).collect();
        let keywords = self.tokenizer.extract_keywords(&cleaned, self.config.keyword_top_k);

        match doc_type {
            DocType::Web => {
                if record.url.is_empty() {
                    return None;
                }
                let doc_id = record.id.unwrap_or_else(|| sha1_hex(record.url.as_bytes()));
                Some(DocumentRecord {
                    doc_id,
                    doc_type,
                    title: record.title.trim().to_string(),
                    url: record.url,
                    parent_url: record.parent_url.unwrap_or_default(),
                    date: record.date.filter(|d| !d.trim().is_empty()),
                    content_text,
                    keywords,
                    file_paths: record.files,
                })
            }
            DocType::File => {
                if cleaned.is_empty() {
                    return None;
                }
                let doc_id = record.id.unwrap_or_else(|| sha1_hex(cleaned.as_bytes()));
                let title = attachment_title(&record.title, &record.body, record.parent_title.as_deref().unwrap_or(""));
                Some(DocumentRecord {
                    doc_id,
                    doc_type,
                    title,
                    url: record.url,
                    parent_url: record.parent_url.unwrap_or_default(),
                    date: record.date.filter(|d| !d.trim().is_empty()),
                    content_text,
                    keywords,
                    file_paths: record.files,
                })
            }
        }
    }

    /// Ingest a JSON/JSONL file or every such file under a directory.
    pub fn ingest_path(&self, store: &dyn WideColumnStore, input: &Path) -> Result<IngestStats> {
        store
            .create_table(&self.config.document_table)
            .with_context(|| format!("creating table {}", self.config.document_table))?;

        let mut stats = IngestStats::default();
        let mut writer = BatchWriter::new(store, &self.config.document_table, self.config.build_batch_size);
        for file in input_files(input) {
            tracing::info!(file = %file.display(), "ingesting");
            for record in read_records(&file, &mut stats)? {
                let Some(doc) = self.to_document(record) else {
                    stats.skipped += 1;
                    continue;
                };
                for (column, value) in doc.to_columns()? {
                    writer.put(doc.doc_id.clone(), column, value)?;
                }
                stats.documents_written += 1;
                if stats.documents_written % 100 == 0 {
                    tracing::info!(documents = stats.documents_written, "ingested documents");
                }
                tracing::debug!(doc_id = %doc.doc_id, title = %doc.title, files = doc.file_paths.len(), "saved document");
            }
        }
        writer.flush()?;
        tracing::info!(
            documents = stats.documents_written,
            skipped = stats.skipped,
            malformed = stats.malformed,
            "ingest complete"
        );
        Ok(stats)
    }
}

fn input_files(input: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

fn read_records(file: &Path, stats: &mut IngestStats) -> Result<Vec<CrawlRecord>> {
    let reader = BufReader::new(File::open(file).with_context(|| format!("opening {}", file.display()))?);
    let mut out = Vec::new();
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(r) => out.push(r),
                Err(e) => {
                    tracing::warn!(file = %file.display(), line = lineno + 1, error = %e, "skipping malformed record");
                    stats.malformed += 1;
                }
            }
        }
        return Ok(out);
    }
    let json: serde_json::Value =
        serde_json::from_reader(reader).with_context(|| format!("parsing {}", file.display()))?;
    let values = match json {
        serde_json::Value::Array(arr) => arr,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };
    for v in values {
        match serde_json::from_value(v) {
            Ok(r) => out.push(r),
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping malformed record");
                stats.malformed += 1;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_strips_controls_and_collapses() {
        assert_eq!(clean_text("  标题\x00\n\n正文\t内容  "), "标题 正文 内容");
    }

    #[test]
    fn attachment_title_fallbacks() {
        assert_eq!(attachment_title(" 申请表 ", "x", "p"), "申请表");
        assert_eq!(attachment_title("", "\n", "学院通知"), "【附件】学院通知");
        let long = "字".repeat(80);
        assert_eq!(attachment_title("", &format!("{long}\n下一行"), "p").chars().count(), 50);
    }

    #[test]
    fn ids_are_fixed_length_hex() {
        let a = sha1_hex(b"https://www.example.edu.cn/");
        assert_eq!(a.len(), 40);
        assert_eq!(a, sha1_hex(b"https://www.example.edu.cn/"));
        assert_ne!(a, sha1_hex(b"https://www.example.edu.cn/x"));
    }
}
