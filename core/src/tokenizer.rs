use crate::document::KeywordTag;
use jieba_rs::{Jieba, KeywordExtract, TfIdf};
use lazy_static::lazy_static;
use std::collections::HashSet;

lazy_static! {
    static ref JIEBA: Jieba = Jieba::new();
    static ref TFIDF: TfIdf = TfIdf::default();
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "的","了","和","是","就","都","而","及","与","着",
            "或","一个","没有","我们","你们","他们","它","在","有",
            "个","这","那","为","之","大","来","以","中","上","下",
            "到","说","要","去","能","会","可","也","很","真","让",
            "自己","什么","怎么","哪里","这里","那里","但是","因为","所以",
            "如果","虽然","不仅","而且","或者","还是","以及","关于","对于",
            "根据","按照","通过","由于","为了","除了","包含","包括","其中",
            "例如","比如","等等","并且","或是","要么","既",
            "非","即","将","对","由","向","被","给","把","次","从",
            "自","当","并","但","所","诚","其","亦",
            "方","若","则","虽","已","故","至","且",
            "等","应","该","此","这些","那些","一些","一点","一切","任何",
            "所有","凡是","各个","各位","各种","各自","某","某某","某些",
            "某个","其它","其他","其余","另外","另","别","别的","别人",
            "别处","唯","唯有","只是","不过","只要","只有","除非","尽管",
            "不管","无论","不论","任","任凭","即使","即便","哪怕","倘若",
            "假若","假如","要是","如","如若","若是","果真",
            "果","一","二","三","四","五","六","七","八","九","十"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Text segmentation and keyword extraction used at ingest and query time.
pub trait Tokenizer: Send + Sync {
    /// Split `text` into search tokens; may emit overlapping finer-grained tokens.
    fn segment(&self, text: &str) -> Vec<String>;
    /// The `top_k` most characteristic terms of `text` with their weights.
    fn extract_keywords(&self, text: &str, top_k: usize) -> Vec<KeywordTag>;
}

/// Dictionary-based Chinese segmentation in search mode plus TF-IDF keyword tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct JiebaTokenizer;

/// Parts of speech kept as keywords: nouns, verbs, adjectives, adverbs, idioms.
const KEYWORD_POS: &[&str] = &["n", "nz", "v", "vd", "vn", "l", "a", "d"];

impl Tokenizer for JiebaTokenizer {
    fn segment(&self, text: &str) -> Vec<String> {
        JIEBA.cut_for_search(text, true).into_iter().map(str::to_string).collect()
    }

    fn extract_keywords(&self, text: &str, top_k: usize) -> Vec<KeywordTag> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let allowed = KEYWORD_POS.iter().map(|p| p.to_string()).collect();
        TFIDF
            .extract_keywords(&JIEBA, text, top_k, allowed)
            .into_iter()
            .map(|k| KeywordTag { word: k.keyword, weight: k.weight })
            .collect()
    }
}

/// Segment a query and drop noise tokens and stop-words, preserving order.
///
/// Control characters are removed from every token; a token left empty, or made only
/// of punctuation and symbols, is noise. An empty result means the query has nothing
/// searchable.
pub fn filter_query(tokenizer: &dyn Tokenizer, query: &str) -> Vec<String> {
    tokenizer
        .segment(query)
        .into_iter()
        .filter_map(|t| {
            let t: String = t.chars().filter(|c| !c.is_control()).collect();
            let t = t.trim();
            let searchable = t.chars().any(char::is_alphanumeric);
            (searchable && !is_stopword(t)).then(|| t.to_string())
        })
        .collect()
}
