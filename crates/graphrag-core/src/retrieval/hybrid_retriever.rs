use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::{Bm25Config as Bm25ConfigT, GraphRetrievalConfig, HybridConfig, VectorRetrievalConfig};
use crate::error::{GraphRagError, Result};
use crate::graph::{GraphQuery, GraphStore, KnowledgeGraph};
use crate::search::bm25::Bm25Index;
use crate::search::hybrid::{weighted_rrf_fusion, FusionWeights, SourceRanking};
use crate::storage::VectorStore;
use crate::types::{ResultType, RetrievalResult, SearchSource};

/// Per-call override of the per-source thresholds, supplied by the
/// fallback ladder as it relaxes from strict to aggressive.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub vector_threshold: f32,
    pub graph_threshold: f32,
    pub bm25_min_score: f32,
    pub top_k: usize,
}

pub struct HybridRetrieverConfig {
    pub vector: VectorRetrievalConfig,
    pub graph: GraphRetrievalConfig,
    pub bm25: Bm25ConfigT,
    pub hybrid: HybridConfig,
    /// Whole-call budget; exceeding it surfaces `GraphRagError::Timeout`
    /// rather than hanging a caller that fans this out per query.
    pub timeout: Duration,
}

/// Concurrently queries the vector index, the BM25 index, and the
/// knowledge graph for one query, tags each hit with its source, and
/// fuses the three ranked lists with `weighted_rrf_fusion`. A source that
/// errors or times out contributes an empty list rather than failing the
/// whole call — partial results beat no results.
pub struct HybridRetriever {
    vector_store: Arc<dyn VectorStore>,
    bm25_index: Arc<Bm25Index>,
    graph_store: Arc<dyn GraphStore>,
    graph: Arc<RwLock<KnowledgeGraph>>,
    /// Entity/relationship embedding collection, present only when
    /// `retrieval.graph.enable_vector_indexing` is on. Shares the same
    /// query embedding as the document-chunk search — one embed call
    /// covers both collections.
    graph_vector_store: Option<Arc<dyn VectorStore>>,
    config: HybridRetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        bm25_index: Arc<Bm25Index>,
        graph_store: Arc<dyn GraphStore>,
        graph: Arc<RwLock<KnowledgeGraph>>,
        graph_vector_store: Option<Arc<dyn VectorStore>>,
        config: HybridRetrieverConfig,
    ) -> Self {
        Self {
            vector_store,
            bm25_index,
            graph_store,
            graph,
            graph_vector_store,
            config,
        }
    }

    pub fn default_thresholds(&self, top_k: usize) -> Thresholds {
        Thresholds {
            vector_threshold: self.config.vector.similarity_threshold,
            graph_threshold: self.config.graph.similarity_threshold,
            bm25_min_score: 0.0,
            top_k,
        }
    }

    pub async fn retrieve(&self, query_text: &str, query_vector: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        self.retrieve_with_thresholds(query_text, query_vector, &self.default_thresholds(top_k))
            .await
    }

    pub async fn retrieve_with_thresholds(
        &self,
        query_text: &str,
        query_vector: &[f32],
        thresholds: &Thresholds,
    ) -> Result<Vec<RetrievalResult>> {
        tokio::time::timeout(
            self.config.timeout,
            self.retrieve_inner(query_text, query_vector, thresholds),
        )
        .await
        .map_err(|_| GraphRagError::Timeout(self.config.timeout))?
    }

    async fn retrieve_inner(
        &self,
        query_text: &str,
        query_vector: &[f32],
        thresholds: &Thresholds,
    ) -> Result<Vec<RetrievalResult>> {
        let (vector_results, bm25_results, graph_results, graph_vector_results) = tokio::join!(
            self.search_vector(query_vector, thresholds),
            self.search_bm25(query_text, thresholds),
            self.search_graph(query_text, thresholds),
            self.search_graph_vector(query_vector, thresholds),
        );

        let vector_results = vector_results.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "vector search failed, continuing without it");
            Vec::new()
        });
        let bm25_results = bm25_results.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "bm25 search failed, continuing without it");
            Vec::new()
        });
        let mut graph_results = graph_results.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "graph search failed, continuing without it");
            Vec::new()
        });
        let graph_vector_results = graph_vector_results.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "graph vector search failed, continuing without it");
            Vec::new()
        });
        graph_results.extend(graph_vector_results);

        if vector_results.is_empty() && bm25_results.is_empty() && graph_results.is_empty() {
            return Err(GraphRagError::Empty);
        }

        Ok(self.fuse(vector_results, bm25_results, graph_results, thresholds.top_k))
    }

    async fn search_vector(&self, query_vector: &[f32], thresholds: &Thresholds) -> Result<Vec<RetrievalResult>> {
        let records = self.vector_store.search(query_vector, thresholds.top_k, None).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let score: f64 = record
                    .metadata
                    .get("score")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                if score < thresholds.vector_threshold as f64 {
                    return None;
                }
                Some(
                    RetrievalResult::new(record.content, score)
                        .with_source(SearchSource::Vector)
                        .with_type(ResultType::DocumentChunk)
                        .with_chunk_id(record.id),
                )
            })
            .collect())
    }

    async fn search_bm25(&self, query_text: &str, thresholds: &Thresholds) -> Result<Vec<RetrievalResult>> {
        let hits = self.bm25_index.search(query_text, thresholds.top_k, thresholds.bm25_min_score);
        Ok(hits
            .into_iter()
            .map(|(id, score)| {
                RetrievalResult::new(String::new(), score as f64)
                    .with_source(SearchSource::Bm25)
                    .with_type(ResultType::Bm25Chunk)
                    .with_chunk_id(id)
            })
            .collect())
    }

    async fn search_graph(&self, query_text: &str, thresholds: &Thresholds) -> Result<Vec<RetrievalResult>> {
        if query_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let graph = self.graph.read();
        let entities = self
            .graph_store
            .execute_query(&graph, &GraphQuery::NameContains(query_text.to_string()))
            .await?;

        Ok(entities
            .into_iter()
            .filter(|e| e.confidence >= thresholds.graph_threshold)
            .take(thresholds.top_k)
            .map(|entity| {
                RetrievalResult::new(entity.description.clone(), entity.confidence as f64)
                    .with_source(SearchSource::Graph)
                    .with_type(ResultType::Entity)
                    .with_chunk_id(entity.id)
            })
            .collect())
    }

    /// Node-embedding search over the graph-embedding collection (§3:
    /// entity_{uuid}/relation_{uuid} records), the "optional node-embedding
    /// search" path in the graph sub-retriever. A no-op when
    /// `enable_vector_indexing` is off — there is no collection to query.
    async fn search_graph_vector(&self, query_vector: &[f32], thresholds: &Thresholds) -> Result<Vec<RetrievalResult>> {
        let Some(store) = &self.graph_vector_store else {
            return Ok(Vec::new());
        };
        let records = store.search(query_vector, thresholds.top_k, None).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let score: f64 = record
                    .metadata
                    .get("score")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                if score < thresholds.graph_threshold as f64 {
                    return None;
                }
                let result_type = if record.id.starts_with("relation_") {
                    ResultType::Relationship
                } else {
                    ResultType::Entity
                };
                Some(
                    RetrievalResult::new(record.content, score)
                        .with_source(SearchSource::GraphVector)
                        .with_type(result_type)
                        .with_chunk_id(record.id),
                )
            })
            .collect())
    }

    fn fuse(
        &self,
        vector_results: Vec<RetrievalResult>,
        bm25_results: Vec<RetrievalResult>,
        graph_results: Vec<RetrievalResult>,
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        let mut by_id: HashMap<String, RetrievalResult> = HashMap::new();
        let vector_ids = collect_ids(&vector_results, &mut by_id);
        let bm25_ids = collect_ids(&bm25_results, &mut by_id);
        let graph_ids = collect_ids(&graph_results, &mut by_id);

        let weights = FusionWeights {
            vector: self.config.hybrid.vector_weight,
            bm25: self.config.hybrid.bm25_weight,
            graph: self.config.hybrid.graph_weight,
            rrf_k: self.config.hybrid.rrf_k,
        };

        let fused = weighted_rrf_fusion(
            &[
                SourceRanking { source: SearchSource::Vector, ranked_ids: &vector_ids },
                SourceRanking { source: SearchSource::Bm25, ranked_ids: &bm25_ids },
                SourceRanking { source: SearchSource::Graph, ranked_ids: &graph_ids },
            ],
            weights,
            top_k,
        );

        fused
            .into_iter()
            .filter_map(|(id, score, sources)| {
                let mut result = by_id.remove(&id)?;
                result.score = score as f64;
                result.metadata.insert(
                    "fused_sources".to_string(),
                    sources.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>().join(","),
                );
                Some(result)
            })
            .collect()
    }
}

fn collect_ids(results: &[RetrievalResult], by_id: &mut HashMap<String, RetrievalResult>) -> Vec<String> {
    let mut ids = Vec::with_capacity(results.len());
    for result in results {
        let id = result
            .chunk_id
            .clone()
            .unwrap_or_else(|| format!("anon_{}", by_id.len()));
        ids.push(id.clone());
        by_id.entry(id).or_insert_with(|| result.clone());
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Bm25Config;
    use crate::types::VectorRecord;
    use async_trait::async_trait;

    struct StubVectorStore;

    #[async_trait]
    impl VectorStore for StubVectorStore {
        async fn add(&self, _records: Vec<VectorRecord>) -> Result<()> {
            Ok(())
        }
        async fn search(&self, _query: &[f32], _top_k: usize, _filter: Option<&str>) -> Result<Vec<VectorRecord>> {
            let mut metadata = HashMap::new();
            metadata.insert("score".to_string(), "0.9".to_string());
            Ok(vec![VectorRecord {
                id: "chunk_1".to_string(),
                vector: vec![],
                content: "vector hit".to_string(),
                metadata,
            }])
        }
        async fn delete_by_metadata(&self, _key: &str, _value: &str) -> Result<usize> {
            Ok(0)
        }
        async fn status(&self) -> Result<crate::storage::VectorStoreStatus> {
            Ok(Default::default())
        }
        async fn recreate_if_exists(&self) -> Result<()> {
            Ok(())
        }
        fn dimension(&self) -> usize {
            4
        }
        fn collection_name(&self) -> &str {
            "test"
        }
    }

    fn config() -> HybridRetrieverConfig {
        HybridRetrieverConfig {
            vector: VectorRetrievalConfig { top_k: 10, similarity_threshold: 0.0 },
            graph: GraphRetrievalConfig { max_nodes: 100, similarity_threshold: 0.0, max_hops: 1, enable_vector_indexing: false },
            bm25: Bm25Config { k1: 1.2, b: 0.75 },
            hybrid: HybridConfig { vector_weight: 0.5, bm25_weight: 0.3, graph_weight: 0.2, rrf_k: 60 },
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn returns_vector_hit_when_other_sources_are_empty() {
        let bm25 = Arc::new(Bm25Index::new(Bm25Config { k1: 1.2, b: 0.75 }));
        let graph_store = Arc::new(crate::graph::KvGraphStore::new(
            crate::storage::SledKvStore::open(tempfile::tempdir().unwrap().path()).unwrap(),
        ));
        let graph = Arc::new(RwLock::new(KnowledgeGraph::new(100)));

        let retriever = HybridRetriever::new(Arc::new(StubVectorStore), bm25, graph_store, graph, None, config());
        let results = retriever.retrieve("test query", &[0.1, 0.2, 0.3, 0.4], 5).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "vector hit");
    }

    #[tokio::test]
    async fn all_sources_empty_yields_empty_error() {
        let bm25 = Arc::new(Bm25Index::new(Bm25Config { k1: 1.2, b: 0.75 }));
        let graph_store = Arc::new(crate::graph::KvGraphStore::new(
            crate::storage::SledKvStore::open(tempfile::tempdir().unwrap().path()).unwrap(),
        ));
        let graph = Arc::new(RwLock::new(KnowledgeGraph::new(100)));

        struct EmptyVectorStore;
        #[async_trait]
        impl VectorStore for EmptyVectorStore {
            async fn add(&self, _records: Vec<VectorRecord>) -> Result<()> {
                Ok(())
            }
            async fn search(&self, _query: &[f32], _top_k: usize, _filter: Option<&str>) -> Result<Vec<VectorRecord>> {
                Ok(vec![])
            }
            async fn delete_by_metadata(&self, _key: &str, _value: &str) -> Result<usize> {
                Ok(0)
            }
            async fn status(&self) -> Result<crate::storage::VectorStoreStatus> {
                Ok(Default::default())
            }
            async fn recreate_if_exists(&self) -> Result<()> {
                Ok(())
            }
            fn dimension(&self) -> usize {
                4
            }
            fn collection_name(&self) -> &str {
                "test"
            }
        }

        let retriever = HybridRetriever::new(Arc::new(EmptyVectorStore), bm25, graph_store, graph, None, config());
        let result = retriever.retrieve("nothing matches", &[0.1, 0.2, 0.3, 0.4], 5).await;
        assert!(matches!(result, Err(GraphRagError::Empty)));
    }

    #[tokio::test]
    async fn graph_vector_store_hits_are_tagged_and_surfaced() {
        struct EmptyVectorStore;
        #[async_trait]
        impl VectorStore for EmptyVectorStore {
            async fn add(&self, _records: Vec<VectorRecord>) -> Result<()> {
                Ok(())
            }
            async fn search(&self, _query: &[f32], _top_k: usize, _filter: Option<&str>) -> Result<Vec<VectorRecord>> {
                Ok(vec![])
            }
            async fn delete_by_metadata(&self, _key: &str, _value: &str) -> Result<usize> {
                Ok(0)
            }
            async fn status(&self) -> Result<crate::storage::VectorStoreStatus> {
                Ok(Default::default())
            }
            async fn recreate_if_exists(&self) -> Result<()> {
                Ok(())
            }
            fn dimension(&self) -> usize {
                4
            }
            fn collection_name(&self) -> &str {
                "test"
            }
        }

        struct StubGraphVectorStore;
        #[async_trait]
        impl VectorStore for StubGraphVectorStore {
            async fn add(&self, _records: Vec<VectorRecord>) -> Result<()> {
                Ok(())
            }
            async fn search(&self, _query: &[f32], _top_k: usize, _filter: Option<&str>) -> Result<Vec<VectorRecord>> {
                let mut metadata = HashMap::new();
                metadata.insert("score".to_string(), "0.8".to_string());
                Ok(vec![VectorRecord {
                    id: "relation_rel_1".to_string(),
                    vector: vec![],
                    content: "Ada Lovelace designed Analytical Engine".to_string(),
                    metadata,
                }])
            }
            async fn delete_by_metadata(&self, _key: &str, _value: &str) -> Result<usize> {
                Ok(0)
            }
            async fn status(&self) -> Result<crate::storage::VectorStoreStatus> {
                Ok(Default::default())
            }
            async fn recreate_if_exists(&self) -> Result<()> {
                Ok(())
            }
            fn dimension(&self) -> usize {
                4
            }
            fn collection_name(&self) -> &str {
                "test-graph"
            }
        }

        let bm25 = Arc::new(Bm25Index::new(Bm25Config { k1: 1.2, b: 0.75 }));
        let graph_store = Arc::new(crate::graph::KvGraphStore::new(
            crate::storage::SledKvStore::open(tempfile::tempdir().unwrap().path()).unwrap(),
        ));
        let graph = Arc::new(RwLock::new(KnowledgeGraph::new(100)));

        let retriever = HybridRetriever::new(
            Arc::new(EmptyVectorStore),
            bm25,
            graph_store,
            graph,
            Some(Arc::new(StubGraphVectorStore)),
            config(),
        );
        let results = retriever.retrieve("Ada Lovelace", &[0.1, 0.2, 0.3, 0.4], 5).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, Some(SearchSource::GraphVector));
        assert_eq!(results[0].result_type, Some(ResultType::Relationship));
    }
}
