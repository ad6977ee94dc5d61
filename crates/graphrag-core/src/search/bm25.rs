use std::collections::HashMap;

use parking_lot::RwLock;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::Bm25Config;
use crate::types::BM25Document;

#[derive(Debug, Clone)]
struct Posting {
    doc_id: String,
    term_freq: u32,
}

struct Inner {
    /// token -> postings list
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: HashMap<String, usize>,
    documents: HashMap<String, BM25Document>,
    total_doc_length: u64,
}

/// In-memory Okapi BM25 inverted index. Tokenization: Unicode-aware word
/// split, lowercased; CJK text additionally gets per-character bigram
/// shingles so lexical matches don't depend on a word segmenter this
/// crate doesn't own.
pub struct Bm25Index {
    k1: f32,
    b: f32,
    inner: RwLock<Inner>,
}

impl Bm25Index {
    pub fn new(config: Bm25Config) -> Self {
        Self {
            k1: config.k1,
            b: config.b,
            inner: RwLock::new(Inner {
                postings: HashMap::new(),
                doc_lengths: HashMap::new(),
                documents: HashMap::new(),
                total_doc_length: 0,
            }),
        }
    }

    pub fn add_documents(&self, docs: Vec<(String, String, HashMap<String, String>)>) {
        let mut inner = self.inner.write();
        for (id, content, metadata) in docs {
            let tokens = tokenize(&content);
            let doc_length = tokens.len();

            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }

            for (token, freq) in term_freqs {
                inner
                    .postings
                    .entry(token)
                    .or_default()
                    .push(Posting {
                        doc_id: id.clone(),
                        term_freq: freq,
                    });
            }

            inner.total_doc_length += doc_length as u64;
            inner.doc_lengths.insert(id.clone(), doc_length);
            inner.documents.insert(
                id.clone(),
                BM25Document {
                    id,
                    content,
                    tokenized_content: tokens,
                    doc_length,
                    metadata,
                },
            );
        }
    }

    /// Exports every indexed document as `(id, content, metadata)` so a
    /// caller can persist and later rebuild the index — tokenization and
    /// postings are recomputed from `content` on reload, not restored
    /// directly.
    pub fn snapshot(&self) -> Vec<(String, String, HashMap<String, String>)> {
        self.inner
            .read()
            .documents
            .values()
            .map(|doc| (doc.id.clone(), doc.content.clone(), doc.metadata.clone()))
            .collect()
    }

    pub fn remove_by_id(&self, doc_id: &str) {
        let mut inner = self.inner.write();
        if let Some(length) = inner.doc_lengths.remove(doc_id) {
            inner.total_doc_length = inner.total_doc_length.saturating_sub(length as u64);
        }
        inner.documents.remove(doc_id);
        for postings in inner.postings.values_mut() {
            postings.retain(|p| p.doc_id != doc_id);
        }
    }

    /// Drops every indexed document. Used by a full rebuild so a re-run
    /// against a corpus with removed documents doesn't leave stale
    /// postings behind — the `recreate` half of BM25 ingest.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.postings.clear();
        inner.doc_lengths.clear();
        inner.documents.clear();
        inner.total_doc_length = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tokenizes the query, accumulates BM25 over intersecting postings,
    /// returns the top-k with score >= min_score, scores min-max
    /// normalized to [0,1] per query.
    pub fn search(&self, query: &str, top_k: usize, min_score: f32) -> Vec<(String, f32)> {
        let inner = self.inner.read();
        if inner.documents.is_empty() {
            return Vec::new();
        }

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let num_docs = inner.documents.len() as f32;
        let avg_doc_len = if num_docs > 0.0 {
            inner.total_doc_length as f32 / num_docs
        } else {
            0.0
        };

        let mut scores: HashMap<String, f32> = HashMap::new();
        let mut seen_terms: HashMap<&str, ()> = HashMap::new();

        for term in &query_tokens {
            if seen_terms.contains_key(term.as_str()) {
                continue;
            }
            seen_terms.insert(term.as_str(), ());

            let Some(postings) = inner.postings.get(term) else {
                continue;
            };

            let doc_freq = postings.len() as f32;
            let idf = ((num_docs - doc_freq + 0.5) / (doc_freq + 0.5) + 1.0).ln();

            for posting in postings {
                let doc_len = inner
                    .doc_lengths
                    .get(&posting.doc_id)
                    .copied()
                    .unwrap_or(0) as f32;
                let tf = posting.term_freq as f32;
                let denom = tf + self.k1 * (1.0 - self.b + self.b * doc_len / avg_doc_len.max(1.0));
                let term_score = idf * (tf * (self.k1 + 1.0)) / denom.max(1e-6);
                *scores.entry(posting.doc_id.clone()).or_insert(0.0) += term_score;
            }
        }

        let mut results: Vec<(String, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let max_score = results.first().map(|(_, s)| *s).unwrap_or(0.0);
        let min_raw = results.last().map(|(_, s)| *s).unwrap_or(0.0);
        let range = (max_score - min_raw).max(1e-6);

        results
            .into_iter()
            .map(|(id, score)| (id, ((score - min_raw) / range).clamp(0.0, 1.0)))
            .filter(|(_, score)| *score >= min_score)
            .take(top_k)
            .collect()
    }
}

/// Unicode-aware word split with lowercase normalization. CJK runs get
/// per-character bigram shingles in addition to the run itself, so
/// lexical search works without a dedicated segmenter.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();

    for word in text.unicode_words() {
        let lower = word.to_lowercase();
        if is_cjk(&lower) {
            let chars: Vec<char> = lower.chars().collect();
            if chars.len() == 1 {
                tokens.push(lower.clone());
            }
            for window in chars.windows(2) {
                tokens.push(window.iter().collect());
            }
        } else {
            tokens.push(lower);
        }
    }

    tokens
}

fn is_cjk(s: &str) -> bool {
    s.chars().any(|c| {
        matches!(c as u32,
            0x4E00..=0x9FFF    // CJK Unified Ideographs
            | 0x3400..=0x4DBF  // CJK Extension A
            | 0x3040..=0x30FF  // Hiragana/Katakana
            | 0xAC00..=0xD7AF  // Hangul syllables
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> Bm25Config {
        Bm25Config { k1: 1.2, b: 0.75 }
    }

    #[test]
    fn finds_exact_term_match() {
        let index = Bm25Index::new(default_config());
        index.add_documents(vec![
            ("a".into(), "the quick brown fox".into(), Default::default()),
            ("b".into(), "a completely unrelated sentence".into(), Default::default()),
        ]);
        let results = index.search("quick fox", 10, 0.0);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn scores_are_normalized_to_unit_interval() {
        let index = Bm25Index::new(default_config());
        index.add_documents(vec![
            ("a".into(), "rust programming language".into(), Default::default()),
            ("b".into(), "rust rust rust programming".into(), Default::default()),
            ("c".into(), "cooking recipes".into(), Default::default()),
        ]);
        let results = index.search("rust programming", 10, 0.0);
        for (_, score) in &results {
            assert!(*score >= 0.0 && *score <= 1.0);
        }
    }

    #[test]
    fn min_score_filters_low_relevance() {
        let index = Bm25Index::new(default_config());
        index.add_documents(vec![
            ("a".into(), "graph retrieval augmented generation".into(), Default::default()),
            ("b".into(), "completely different topic about cooking".into(), Default::default()),
        ]);
        let results = index.search("graph retrieval", 10, 0.99);
        assert!(results.len() <= 1);
    }

    #[test]
    fn cjk_bigram_shingles_support_substring_matches() {
        let index = Bm25Index::new(default_config());
        index.add_documents(vec![("a".into(), "中国铁塔公司".into(), Default::default())]);
        let results = index.search("铁塔", 10, 0.0);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn remove_by_id_drops_document_from_results() {
        let index = Bm25Index::new(default_config());
        index.add_documents(vec![("a".into(), "hello world".into(), Default::default())]);
        index.remove_by_id("a");
        assert!(index.is_empty());
        assert!(index.search("hello", 10, 0.0).is_empty());
    }
}
