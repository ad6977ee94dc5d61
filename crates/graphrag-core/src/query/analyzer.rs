use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{ProcessedQuery, QueryType};

/// (query_type, pattern) table checked in order — first match wins, so
/// more specific patterns are listed before `General`'s catch-all.
static QUESTION_PATTERNS: Lazy<Vec<(QueryType, Regex)>> = Lazy::new(|| {
    vec![
        (QueryType::Greeting, Regex::new(r"(?i)^\s*(hi|hello|hey|good (morning|afternoon|evening))\b").unwrap()),
        (QueryType::Definition, Regex::new(r"(?i)\bwhat\s+(is|are|was|were)\b").unwrap()),
        (QueryType::Method, Regex::new(r"(?i)\bhow\s+(do|does|did|can|to)\b").unwrap()),
        (QueryType::Reason, Regex::new(r"(?i)\bwhy\s+(is|are|does|do|did)\b").unwrap()),
        (QueryType::Function, Regex::new(r"(?i)\bwhat\s+does\b.*\bdo\b").unwrap()),
        (QueryType::Feature, Regex::new(r"(?i)\b(features?|capabilit(y|ies))\s+of\b").unwrap()),
        (QueryType::Enumeration, Regex::new(r"(?i)\b(list|enumerate|what are all)\b").unwrap()),
        (QueryType::Classification, Regex::new(r"(?i)\b(type|category|kind)s?\s+of\b").unwrap()),
        (QueryType::Evaluation, Regex::new(r"(?i)\b(better|compare|versus|vs\.?|pros and cons)\b").unwrap()),
        (QueryType::CommitmentInquiry, Regex::new(r"(?i)\b(will|can|should)\s+(you|it|this)\b").unwrap()),
        (QueryType::ServiceInquiry, Regex::new(r"(?i)\b(support|help with|available for)\b").unwrap()),
        (QueryType::SpecificInquiry, Regex::new(r"(?i)\bwho\s+(is|are|was|were)\b").unwrap()),
    ]
});

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "do", "does", "did",
        "to", "of", "in", "on", "at", "for", "with", "and", "or", "but", "what", "how", "why",
        "who", "which", "this", "that", "these", "those", "it", "its", "as", "by", "from",
    ]
    .into_iter()
    .collect()
});

/// Synonym expansion table: query keyword -> additional search terms.
static SYNONYMS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        ("error", &["bug", "issue", "failure"][..]),
        ("fast", &["quick", "speed", "performance"][..]),
        ("config", &["configuration", "settings"][..]),
        ("delete", &["remove", "erase"][..]),
        ("create", &["add", "build", "make"][..]),
        ("docs", &["documentation"][..]),
    ])
});

static MEANINGLESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s.?!,]*$").unwrap());
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["']([^"']{2,})["']"#).unwrap());
static CAPITALIZED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z][a-zA-Z0-9]{2,}(?:\s[A-Z][a-zA-Z0-9]*)*)\b").unwrap());
static ACRONYM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z]{2,})\b").unwrap());
/// CJK run ending in a common institutional/technical suffix, e.g. a
/// company or platform name — checked before the bare n-gram pattern so
/// the suffix-bearing match wins.
static CJK_INSTITUTIONAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\u{4e00}-\u{9fff}]{2,}(?:公司|企业|集团|技术|系统|平台))").unwrap());
/// Bare CJK run of at least two characters, used only when nothing more
/// specific matched.
static CJK_BARE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\u{4e00}-\u{9fff}]{2,})").unwrap());

/// Colloquial-to-formal substitutions applied during normalization, e.g.
/// a casual "is-what" particle standing in for the formal phrasing.
const COLLOQUIAL_SUBSTITUTIONS: &[(&str, &str)] = &[("是啥", "是什么"), ("咋样", "怎么样"), ("咋办", "怎么办"), ("啥意思", "什么意思")];

/// Turns a raw user query into keywords, candidate entities, an expanded
/// term set, and a coarse intent classification. Purely textual — no
/// embeddings or LLM calls, so it runs ahead of and independent from
/// retrieval.
pub struct QueryAnalyzer;

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn process_query(&self, query: &str) -> ProcessedQuery {
        let normalized = normalize_query(query);
        let query_type = identify_query_type(query, &normalized);
        let keywords = extract_keywords(&normalized);
        let entities = extract_entities(query);
        let expanded_terms = expand_query(&keywords);
        let confidence = classification_confidence(query_type, &keywords);

        ProcessedQuery {
            original: query.to_string(),
            normalized,
            keywords,
            entities,
            expanded_terms,
            query_type,
            confidence,
        }
    }

    /// Builds the ordered list of query strings the retriever fans out,
    /// broadest-intent query first, capped to bound per-query retrieval
    /// cost.
    pub fn generate_search_queries(&self, processed: &ProcessedQuery) -> Vec<String> {
        let mut queries = vec![processed.original.clone(), processed.normalized.clone()];

        if !processed.keywords.is_empty() {
            queries.push(processed.keywords.join(" "));
        }
        for entity in &processed.entities {
            if entity.len() >= 3 {
                queries.push(entity.clone());
            }
        }
        if !processed.expanded_terms.is_empty() {
            let mut expanded = processed.keywords.clone();
            expanded.extend(processed.expanded_terms.iter().cloned());
            queries.push(expanded.join(" "));
        }

        queries.dedup();
        queries.truncate(3);
        queries
    }

    /// Fuzzy matching is worth the extra cost only when the normal path is
    /// likely to miss: short, low-confidence, or near-empty-keyword
    /// queries.
    pub fn should_use_fuzzy_search(&self, processed: &ProcessedQuery) -> bool {
        processed.original.chars().count() < 5 || processed.confidence < 0.6 || processed.keywords.len() < 2
    }
}

fn normalize_query(query: &str) -> String {
    let lower = query.trim().to_lowercase();
    let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut normalized = collapsed
        .replace("what's", "what is")
        .replace("who's", "who is")
        .replace("how's", "how is")
        .replace("can't", "cannot")
        .replace("won't", "will not")
        .replace("don't", "do not")
        .replace('？', "?")
        .replace('！', "!")
        .replace('，', ",")
        .replace('。', ".");

    for (colloquial, formal) in COLLOQUIAL_SUBSTITUTIONS {
        normalized = normalized.replace(colloquial, formal);
    }
    normalized
}

fn identify_query_type(raw: &str, normalized: &str) -> QueryType {
    if MEANINGLESS_RE.is_match(raw) {
        return QueryType::Meaningless;
    }
    for (query_type, pattern) in QUESTION_PATTERNS.iter() {
        if pattern.is_match(normalized) {
            return *query_type;
        }
    }
    if normalized.split_whitespace().count() <= 1 {
        return QueryType::Unknown;
    }
    QueryType::General
}

fn extract_keywords(normalized: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    normalized
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.len() > 1 && !STOP_WORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(|w| w.to_string())
        .collect()
}

/// Candidate entity surface forms, checked in priority order since
/// quoting is the strongest explicit signal and a bare CJK n-gram the
/// weakest: quoted phrases, capitalized ASCII runs, acronyms,
/// institutional-suffixed CJK runs, then bare CJK runs.
fn extract_entities(raw: &str) -> Vec<String> {
    let mut entities = Vec::new();
    let mut seen = HashSet::new();

    for caps in QUOTED_RE.captures_iter(raw) {
        let candidate = caps[1].to_string();
        if seen.insert(candidate.clone()) {
            entities.push(candidate);
        }
    }
    for caps in CAPITALIZED_RE.captures_iter(raw) {
        let candidate = caps[1].to_string();
        if seen.insert(candidate.clone()) {
            entities.push(candidate);
        }
    }
    for caps in ACRONYM_RE.captures_iter(raw) {
        let candidate = caps[1].to_string();
        if seen.insert(candidate.clone()) {
            entities.push(candidate);
        }
    }
    for caps in CJK_INSTITUTIONAL_RE.captures_iter(raw) {
        let candidate = caps[1].to_string();
        if seen.insert(candidate.clone()) {
            entities.push(candidate);
        }
    }
    for caps in CJK_BARE_RE.captures_iter(raw) {
        let candidate = caps[1].to_string();
        if seen.insert(candidate.clone()) {
            entities.push(candidate);
        }
    }

    entities
}

fn expand_query(keywords: &[String]) -> Vec<String> {
    let mut expanded = Vec::new();
    let mut seen: HashSet<&str> = keywords.iter().map(|k| k.as_str()).collect();
    for keyword in keywords {
        if let Some(synonyms) = SYNONYMS.get(keyword.as_str()) {
            for synonym in *synonyms {
                if seen.insert(synonym) {
                    expanded.push(synonym.to_string());
                }
            }
        }
    }
    expanded
}

fn classification_confidence(query_type: QueryType, keywords: &[String]) -> f32 {
    let base = match query_type {
        QueryType::Unknown | QueryType::Meaningless => 0.1,
        QueryType::General => 0.4,
        _ => 0.8,
    };
    let keyword_bonus = (keywords.len() as f32 * 0.05).min(0.2);
    (base + keyword_bonus).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_definition_question() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query("What is a knowledge graph?");
        assert_eq!(processed.query_type, QueryType::Definition);
    }

    #[test]
    fn greeting_is_classified_before_keyword_extraction_matters() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query("Hello there!");
        assert_eq!(processed.query_type, QueryType::Greeting);
    }

    #[test]
    fn meaningless_input_is_flagged() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query("   ...?");
        assert_eq!(processed.query_type, QueryType::Meaningless);
    }

    #[test]
    fn keywords_exclude_stop_words() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query("how does the retriever rank results");
        assert!(!processed.keywords.contains(&"the".to_string()));
        assert!(processed.keywords.contains(&"retriever".to_string()));
    }

    #[test]
    fn quoted_phrase_is_extracted_as_entity() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query(r#"What is "Analytical Engine"?"#);
        assert!(processed.entities.contains(&"Analytical Engine".to_string()));
    }

    #[test]
    fn short_low_confidence_query_triggers_fuzzy_search() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query("asdf");
        assert!(analyzer.should_use_fuzzy_search(&processed));
    }

    #[test]
    fn search_queries_include_expanded_terms() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query("how to fix this error fast");
        let queries = analyzer.generate_search_queries(&processed);
        assert!(queries.len() > 1);
    }

    #[test]
    fn full_width_punctuation_is_normalized_to_ascii() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query("这是什么？");
        assert!(processed.normalized.ends_with('?'));
    }

    #[test]
    fn institutional_cjk_entity_is_preferred_over_a_bare_run() {
        let analyzer = QueryAnalyzer::new();
        let processed = analyzer.process_query("字节跳动公司是做什么的");
        assert!(processed.entities.contains(&"字节跳动公司".to_string()));
    }
}
