use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::RunMode;

/// Immutable input record produced by readers (out of scope) and consumed
/// by the chunker and indexers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub name: String,
    pub source: String,
    pub content_type: String,
    pub parent_id: Option<String>,
    pub chunk_index: Option<u32>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            name: String::new(),
            source: String::new(),
            content_type: "text/plain".to_string(),
            parent_id: None,
            chunk_index: None,
        }
    }
}

/// A contiguous sub-range of a Document, produced by the chunker during
/// build and discarded once vector/BM25 records have been written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub parent_id: String,
    pub chunk_index: u32,
    pub metadata: HashMap<String, String>,
}

/// (id, vector, payload) tuple stored by the vector index. All records in
/// one collection must share `vector.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: HashMap<String, String>,
}

/// A node in the knowledge graph. `id` is a content-derived UUID, not the
/// display name — equality for dedup uses normalized (name, entity_type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub confidence: f32,
    pub source_chunk_ids: Vec<String>,
}

impl Entity {
    pub fn normalized_key(&self) -> (String, String) {
        (
            normalize_surface_form(&self.name),
            self.entity_type.to_lowercase(),
        )
    }
}

/// A typed edge between two entities. Both endpoints must resolve to an
/// existing entity at persist time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation_type: String,
    pub confidence: f32,
}

/// Collapse whitespace and punctuation, lowercase — used to group surface
/// forms of the same entity during canonicalization.
pub fn normalize_surface_form(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() || *c == ' ')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A single lexical document in the BM25 index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BM25Document {
    pub id: String,
    pub content: String,
    pub tokenized_content: Vec<String>,
    pub doc_length: usize,
    pub metadata: HashMap<String, String>,
}

/// Serialized into the KV store as a single JSON blob (`spo_index`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SPOIndex {
    /// surface string -> (predicate, object, relationship_id)
    pub subject_index: HashMap<String, Vec<(String, String, String)>>,
    /// surface string -> (subject, object, relationship_id)
    pub predicate_index: HashMap<String, Vec<(String, String, String)>>,
    /// surface string -> (subject, predicate, relationship_id)
    pub object_index: HashMap<String, Vec<(String, String, String)>>,
}

impl SPOIndex {
    pub fn insert(&mut self, subject: &str, predicate: &str, object: &str, relationship_id: &str) {
        self.subject_index
            .entry(subject.to_string())
            .or_default()
            .push((predicate.to_string(), object.to_string(), relationship_id.to_string()));
        self.predicate_index
            .entry(predicate.to_string())
            .or_default()
            .push((subject.to_string(), object.to_string(), relationship_id.to_string()));
        self.object_index
            .entry(object.to_string())
            .or_default()
            .push((subject.to_string(), predicate.to_string(), relationship_id.to_string()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Vector,
    Bm25,
    Graph,
    GraphVector,
    DirectEntity,
    FullText,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    DocumentChunk,
    Bm25Chunk,
    Entity,
    Relationship,
    Triple,
    Community,
    GreetingResponse,
    HelpResponse,
    FallbackHelp,
}

/// Single piece of retrieved evidence. One tagged shape for every source,
/// per-source threshold discipline applied by the caller before fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub score: f64,
    pub metadata: HashMap<String, String>,
    pub source: Option<SearchSource>,
    pub chunk_id: Option<String>,
    pub result_type: Option<ResultType>,
}

impl RetrievalResult {
    pub fn new(content: impl Into<String>, score: f64) -> Self {
        Self {
            content: content.into(),
            score,
            metadata: HashMap::new(),
            source: None,
            chunk_id: None,
            result_type: None,
        }
    }

    pub fn with_source(mut self, source: SearchSource) -> Self {
        self.source = Some(source);
        self.metadata
            .insert("search_source".to_string(), format!("{:?}", source).to_lowercase());
        self
    }

    pub fn with_type(mut self, result_type: ResultType) -> Self {
        self.result_type = Some(result_type);
        self
    }

    pub fn with_chunk_id(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Definition,
    Evaluation,
    Method,
    Function,
    Feature,
    Reason,
    General,
    Greeting,
    Meaningless,
    SpecificInquiry,
    CommitmentInquiry,
    Enumeration,
    Classification,
    ServiceInquiry,
    Unknown,
}

/// Output of the query analyzer (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedQuery {
    pub original: String,
    pub normalized: String,
    pub keywords: Vec<String>,
    pub entities: Vec<String>,
    pub expanded_terms: Vec<String>,
    pub query_type: QueryType,
    pub confidence: f32,
}

/// One rung of the fallback ladder (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    pub name: String,
    pub vector_threshold: f32,
    pub graph_threshold: f32,
    pub bm25_min_score: f32,
    pub top_k: usize,
    pub description: String,
}

/// Emitted alongside every `retrieve` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub original_query: String,
    pub processed_query: Option<ProcessedQuery>,
    pub search_queries: Vec<String>,
    pub strategy_used: String,
    pub total_results: usize,
    pub success: bool,
    pub error: Option<String>,
}

/// Cumulative usage statistics exposed via `AdaptiveFallbackRetriever::get_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieverStats {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub strategy_usage: HashMap<String, u64>,
    pub avg_results_per_query: f64,
}

impl RetrieverStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.successful_queries as f64 / self.total_queries as f64
        }
    }

    pub fn most_used_strategy(&self) -> Option<&str> {
        self.strategy_usage
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(name, _)| name.as_str())
    }
}

/// Stats persisted into the KV store at `graph_stats` after a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub entity_types: HashMap<String, usize>,
    pub relationship_types: HashMap<String, usize>,
    pub build_time: String,
}

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

/// Per-step outcome inside a `BuildReport`. A failed step does not abort
/// the build — later steps run where semantically possible and record
/// their own status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStepStatus {
    pub step: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Returned by `Orchestrator::build`. One entry per build step (in
/// `build`/`full` mode) or per consistency check (in `qa` mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub mode: RunMode,
    pub documents_processed: usize,
    pub steps: Vec<BuildStepStatus>,
    pub success: bool,
}

impl BuildReport {
    pub fn new(mode: RunMode, documents_processed: usize) -> Self {
        Self {
            mode,
            documents_processed,
            steps: Vec::new(),
            success: true,
        }
    }

    pub fn step_ok(&mut self, step: impl Into<String>) {
        self.steps.push(BuildStepStatus {
            step: step.into(),
            success: true,
            error: None,
        });
    }

    pub fn step_err(&mut self, step: impl Into<String>, error: impl std::fmt::Display) {
        self.success = false;
        self.steps.push(BuildStepStatus {
            step: step.into(),
            success: false,
            error: Some(error.to_string()),
        });
    }
}
