mod common;

use common::{doc, insert, set_raw, CountingConnector, DownConnector, InstrumentedStore, SpaceTokenizer};
use search_core::document::{columns, DocumentRecord};
use search_core::scoring::bm25;
use search_core::store::{Connection, SledStore, StaticConnector, WideColumnStore};
use search_core::{DocType, IndexBuilder, JiebaTokenizer, MemoryStore, SearchConfig, SearchEngine, SearchResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use time::macros::date;
use time::Date;

const TODAY: Date = date!(2024 - 06 - 01);

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn indexed_store(docs: &[DocumentRecord]) -> Arc<MemoryStore> {
    let config = SearchConfig::default();
    let store = Arc::new(MemoryStore::new());
    for d in docs {
        insert(store.as_ref(), &config, d);
    }
    IndexBuilder::new(&config).build(store.as_ref(), store.as_ref()).unwrap();
    store
}

fn engine(store: Arc<MemoryStore>) -> SearchEngine {
    let conn = Connection::open(Box::new(StaticConnector(store)));
    SearchEngine::new(conn, Arc::new(SpaceTokenizer), SearchConfig::default())
}

fn ids(results: &[SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.doc_id.as_str()).collect()
}

#[test]
fn title_and_index_paths_combine() {
    let store = indexed_store(&[doc("d1", DocType::Web, "计算机学院通知", &[("计算机", 2.0)])]);
    let results = engine(store).search_on("计算机", None, TODAY);

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.doc_id, "d1");
    assert_eq!(r.score, round2(bm25(2.0) * 0.4 + 15.0 * 0.6));
    assert_eq!(r.score, 9.57);
    assert_eq!(r.doc_type, DocType::Web);
    assert_eq!(r.url, "https://www.example.edu.cn/d1.html");
    assert_eq!(r.snippet, "计算机学院通知 正文内容...");
}

#[test]
fn old_attachment_is_boosted_and_decayed() {
    let mut file = doc("f1", DocType::File, "年度报告", &[("经费", 1.0)]);
    file.date = Some("2019-06-01".into());
    let store = indexed_store(&[file]);
    let results = engine(store).search_on("经费", Some(10), TODAY);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].score, 0.35);
    assert_eq!(results[0].score, round2(bm25(1.0) * 0.4 * 1.5 * 0.9f64.powi(5)));
}

#[test]
fn stopword_only_query_never_touches_storage() {
    let inner = indexed_store(&[doc("d1", DocType::Web, "的和是", &[("计算机", 2.0)])]);
    let store = Arc::new(InstrumentedStore::new(inner));
    let connects = Arc::new(AtomicUsize::new(0));
    let conn = Connection::open(Box::new(CountingConnector { store: store.clone(), connects: connects.clone() }));
    let engine = SearchEngine::new(conn, Arc::new(SpaceTokenizer), SearchConfig::default());

    let before = store.calls();
    assert!(engine.search_on("的 和 是", None, TODAY).is_empty());
    assert!(engine.search_on("   ", None, TODAY).is_empty());
    assert_eq!(store.calls(), before);
    assert_eq!(connects.load(Ordering::SeqCst), 1);
}

#[test]
fn malformed_date_is_not_penalized() {
    let mut bad = doc("bad", DocType::Web, "学术讲座", &[("报告", 1.0)]);
    bad.date = Some("not-a-date".into());
    let clean = doc("clean", DocType::Web, "讲座预告", &[("报告", 1.0)]);
    let store = indexed_store(&[bad, clean]);
    let results = engine(store).search_on("报告", None, TODAY);

    assert_eq!(ids(&results), vec!["bad", "clean"]);
    assert_eq!(results[0].score, results[1].score);
    assert_eq!(results[0].date.as_deref(), Some("not-a-date"));
}

#[test]
fn duplicate_title_and_url_collapse_to_best() {
    let mut low = doc("a1", DocType::File, "附件：申请表", &[("申请表", 0.5)]);
    low.url = String::new();
    low.parent_url = "https://www.example.edu.cn/notice/7.html".into();
    let mut high = low.clone();
    high.doc_id = "a2".into();
    high.keywords[0].weight = 3.0;
    let store = indexed_store(&[low, high]);
    let results = engine(store).search_on("申请表", None, TODAY);

    assert_eq!(ids(&results), vec!["a2"]);
    assert_eq!(results[0].url, "https://www.example.edu.cn/notice/7.html");
}

#[test]
fn results_are_sorted_stable_and_truncated() {
    let store = indexed_store(&[
        doc("a", DocType::Web, "甲", &[("数据", 1.0)]),
        doc("b", DocType::Web, "乙", &[("数据", 1.0)]),
        doc("c", DocType::Web, "丙", &[("数据", 4.0)]),
        doc("d", DocType::Web, "丁", &[("数据", 0.2)]),
    ]);
    let engine = engine(store);

    let all = engine.search_on("数据", None, TODAY);
    assert_eq!(ids(&all), vec!["c", "a", "b", "d"]);
    assert!(all.windows(2).all(|w| w[0].score >= w[1].score));

    let top = engine.search_on("数据", Some(2), TODAY);
    assert_eq!(ids(&top), vec!["c", "a"]);
}

#[test]
fn raising_a_weight_never_lowers_rank() {
    let competitor = doc("rival", DocType::Web, "乙", &[("网络", 1.2)]);
    let before = engine(indexed_store(&[doc("me", DocType::Web, "甲", &[("网络", 1.0)]), competitor.clone()]))
        .search_on("网络", None, TODAY);
    let after = engine(indexed_store(&[doc("me", DocType::Web, "甲", &[("网络", 2.0)]), competitor]))
        .search_on("网络", None, TODAY);

    let pos = |rs: &[SearchResult]| rs.iter().position(|r| r.doc_id == "me").unwrap();
    let score = |rs: &[SearchResult]| rs.iter().find(|r| r.doc_id == "me").unwrap().score;
    assert!(pos(&after) <= pos(&before));
    assert!(score(&after) >= score(&before));
    assert_eq!(ids(&after), vec!["me", "rival"]);
}

#[test]
fn title_scan_uses_only_first_token() {
    let store = indexed_store(&[
        doc("x", DocType::Web, "物理学院", &[]),
        doc("y", DocType::Web, "化学学院", &[]),
    ]);
    let results = engine(store).search_on("物理 化学", None, TODAY);
    assert_eq!(ids(&results), vec!["x"]);
    assert_eq!(results[0].score, 9.0);
}

#[test]
fn web_page_with_attachments_is_boosted() {
    let mut page = doc("p", DocType::Web, "招生通知", &[]);
    page.file_paths = vec!["cs/简章.pdf".into()];
    let store = indexed_store(&[page]);
    let results = engine(store).search_on("招生", None, TODAY);
    assert_eq!(results[0].score, 13.5);
    assert_eq!(results[0].file_paths, vec!["cs/简章.pdf".to_string()]);
}

#[test]
fn postings_without_documents_are_dropped() {
    let store = indexed_store(&[doc("d1", DocType::Web, "通知", &[("通知", 1.0)])]);
    let config = SearchConfig::default();
    store.put(&config.index_table, "通知", "p:ghost", br#"{"w":9.0,"t":"web"}"#.to_vec());
    store.put(&config.index_table, "通知", "p:junk", b"not json".to_vec());

    let results = engine(store).search_on("通知", None, TODAY);
    assert_eq!(ids(&results), vec!["d1"]);
}

#[test]
fn missing_index_degrades_to_title_path() {
    let config = SearchConfig::default();
    let store = Arc::new(MemoryStore::new());
    insert(store.as_ref(), &config, &doc("d1", DocType::Web, "计算机学院通知", &[("计算机", 2.0)]));

    let results = engine(store).search_on("计算机", None, TODAY);
    assert_eq!(ids(&results), vec!["d1"]);
    assert_eq!(results[0].score, 9.0);
}

#[test]
fn document_table_outage_drops_unhydrated_candidates() {
    let inner = indexed_store(&[doc("d1", DocType::Web, "计算机学院通知", &[("计算机", 2.0)])]);
    let mut store = InstrumentedStore::new(inner);
    let config = SearchConfig::default();
    store.fail_table = Some(config.document_table.clone());
    let store = Arc::new(store);
    let conn = Connection::open(Box::new(CountingConnector { store, connects: Arc::new(AtomicUsize::new(0)) }));
    let engine = SearchEngine::new(conn, Arc::new(SpaceTokenizer), config);

    // the document table is unreachable, so nothing can be hydrated either
    assert!(engine.search_on("计算机", None, TODAY).is_empty());
}

#[test]
fn unreachable_storage_yields_empty_results() {
    let conn = Connection::open(Box::new(DownConnector));
    let engine = SearchEngine::new(conn, Arc::new(SpaceTokenizer), SearchConfig::default());
    assert!(engine.search_on("计算机", None, TODAY).is_empty());
}

#[test]
fn dead_connection_is_reestablished_once() {
    let inner = indexed_store(&[doc("d1", DocType::Web, "计算机学院通知", &[("计算机", 2.0)])]);
    let store = Arc::new(InstrumentedStore::new(inner));
    let connects = Arc::new(AtomicUsize::new(0));
    let conn = Connection::open(Box::new(CountingConnector { store: store.clone(), connects: connects.clone() }));
    let engine = SearchEngine::new(conn, Arc::new(SpaceTokenizer), SearchConfig::default());

    store.failing_pings.store(1, Ordering::SeqCst);
    let results = engine.search_on("计算机", None, TODAY);
    assert_eq!(ids(&results), vec!["d1"]);
    assert_eq!(connects.load(Ordering::SeqCst), 2);
}

#[test]
fn snippet_missing_text_stays_empty() {
    let config = SearchConfig::default();
    let store = Arc::new(MemoryStore::new());
    store.create_table(&config.document_table).unwrap();
    set_raw(&store, &config, "t1", columns::TITLE, "无正文页面");
    set_raw(&store, &config, "t1", columns::TYPE, "web");

    let results = engine(store).search_on("无正文", None, TODAY);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].snippet, "");
}

#[test]
fn control_characters_in_query_keep_index_hits_on_sled() {
    let config = SearchConfig::default();
    let store = Arc::new(SledStore::temporary().unwrap());
    insert(store.as_ref(), &config, &doc("f", DocType::Web, "年度预算", &[("经费", 1.0)]));
    IndexBuilder::new(&config).build(store.as_ref(), store.as_ref()).unwrap();
    let conn = Connection::open(Box::new(StaticConnector(store.clone())));
    let engine = SearchEngine::new(conn, Arc::new(SpaceTokenizer), config);

    let scores = |q: &str| engine.search_on(q, None, TODAY).iter().map(|r| r.score).collect::<Vec<_>>();
    assert_eq!(scores("经费"), vec![0.4]);
    assert_eq!(scores("经费 \0"), vec![0.4]);

    // a term the store refuses as a row key is skipped, not fatal for the path
    let hits = engine.recall_by_index(store.as_ref(), &["\0".to_string(), "经费".to_string()]).unwrap();
    assert_eq!(hits, vec![("f".to_string(), 1.0)]);
}

#[test]
fn jieba_end_to_end() {
    let config = SearchConfig::default();
    let store = indexed_store(&[doc("d1", DocType::Web, "计算机学院通知", &[("计算机", 2.0)])]);
    let inner = Arc::new(InstrumentedStore::new(store));
    let conn = Connection::open(Box::new(CountingConnector { store: inner.clone(), connects: Arc::new(AtomicUsize::new(0)) }));
    let engine = SearchEngine::new(conn, Arc::new(JiebaTokenizer), config);

    let results = engine.search_on("计算机", None, TODAY);
    assert_eq!(ids(&results), vec!["d1"]);
    assert_eq!(results[0].score, 9.57);

    let before = inner.calls();
    assert!(engine.search_on("的和是", None, TODAY).is_empty());
    assert_eq!(inner.calls(), before);
}
