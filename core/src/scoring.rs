//! Relevance arithmetic for the hybrid retrieval engine.
//!
//! The stored keyword weight stands in for a term frequency, and every document is
//! given the same nominal length, so the BM25 length normalization reduces to 1.

use crate::document::{round_to, DocType, DocumentMeta};
use time::macros::format_description;
use time::Date;

pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;
pub const NOMINAL_DOC_LEN: f64 = 500.0;
pub const NOMINAL_AVG_LEN: f64 = 500.0;

/// Fixed score of a document whose title contains the first query token.
pub const TITLE_MATCH_SCORE: f64 = 15.0;
pub const INDEX_SCORE_WEIGHT: f64 = 0.4;
pub const TITLE_SCORE_WEIGHT: f64 = 0.6;
pub const ATTACHMENT_BOOST: f64 = 1.5;
pub const YEARLY_DECAY: f64 = 0.9;

const DAYS_PER_YEAR: f64 = 365.25;

/// BM25 term contribution with the keyword weight used as `tf`.
pub fn bm25(tf: f64) -> f64 {
    let norm = 1.0 - BM25_B + BM25_B * (NOMINAL_DOC_LEN / NOMINAL_AVG_LEN);
    (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * norm)
}

pub fn base_score(index_score: f64, scan_score: f64) -> f64 {
    index_score * INDEX_SCORE_WEIGHT + scan_score * TITLE_SCORE_WEIGHT
}

/// Attachments, and pages that link to attachments, rank higher.
pub fn file_boost(meta: &DocumentMeta) -> f64 {
    match meta.doc_type {
        DocType::File => ATTACHMENT_BOOST,
        DocType::Web if !meta.file_paths.is_empty() => ATTACHMENT_BOOST,
        DocType::Web => 1.0,
    }
}

pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// `0.9 ^ years` since `date`; missing, malformed and future dates are not penalized.
pub fn time_decay(date: Option<&str>, today: Date) -> f64 {
    let Some(published) = date.and_then(parse_date) else {
        return 1.0;
    };
    let days = (today - published).whole_days().max(0);
    YEARLY_DECAY.powf(days as f64 / DAYS_PER_YEAR)
}

pub fn final_score(index_score: f64, scan_score: f64, meta: &DocumentMeta, today: Date) -> f64 {
    let raw = base_score(index_score, scan_score) * file_boost(meta) * time_decay(meta.date.as_deref(), today);
    round_to(raw, 2)
}
