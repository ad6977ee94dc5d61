use async_trait::async_trait;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{GraphRagError, Result};
use crate::graph::knowledge_graph::KnowledgeGraph;
use crate::storage::kv_store::KvStore;
use crate::types::{Entity, Relationship};

/// The four query shapes the adaptive fallback retriever's direct-entity
/// and full-text escape hatches issue against the graph. This is not a
/// general Cypher subset — just the handful of lookups the fallback
/// ladder needs when vector/BM25 search comes up empty.
#[derive(Debug, Clone)]
pub enum GraphQuery {
    ExactName(String),
    NameContains(String),
    NameRegexInsensitive(String),
    DescriptionContains(String),
    AnyNode { limit: usize },
}

#[derive(Serialize, Deserialize)]
struct GraphSnapshot {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
}

/// Persists and serves a `KnowledgeGraph`. `store_graph`/`load_graph` round
/// trip through the KV store as a single JSON blob under `graph_snapshot`
/// — there is no separate graph database in this crate's scope.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn store_graph(&self, graph: &KnowledgeGraph) -> Result<()>;
    async fn load_graph(&self, max_nodes: usize) -> Result<KnowledgeGraph>;
    async fn execute_query(&self, graph: &KnowledgeGraph, query: &GraphQuery) -> Result<Vec<Entity>>;
    async fn close(&self) -> Result<()>;
}

const SNAPSHOT_KEY: &str = "graph_snapshot";

pub struct KvGraphStore<K: KvStore> {
    kv: K,
}

impl<K: KvStore> KvGraphStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl<K: KvStore> GraphStore for KvGraphStore<K> {
    async fn store_graph(&self, graph: &KnowledgeGraph) -> Result<()> {
        let snapshot = GraphSnapshot {
            entities: graph.entities().cloned().collect(),
            relationships: graph.relationships().cloned().collect(),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("serialize graph snapshot: {e}")))?;
        self.kv.set(SNAPSHOT_KEY, &bytes).await
    }

    async fn load_graph(&self, max_nodes: usize) -> Result<KnowledgeGraph> {
        let mut graph = KnowledgeGraph::new(max_nodes);
        let Some(bytes) = self.kv.get(SNAPSHOT_KEY).await? else {
            return Ok(graph);
        };
        let snapshot: GraphSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| GraphRagError::StorageQueryFailed(format!("deserialize graph snapshot: {e}")))?;

        for entity in snapshot.entities {
            graph.upsert_entity(entity);
        }
        for relationship in snapshot.relationships {
            // Endpoints were valid when written; a failure here means the
            // snapshot predates a since-merged entity id and is dropped
            // rather than aborting the whole load.
            let _ = graph.add_relationship(relationship);
        }
        Ok(graph)
    }

    async fn execute_query(&self, graph: &KnowledgeGraph, query: &GraphQuery) -> Result<Vec<Entity>> {
        let results = match query {
            GraphQuery::ExactName(name) => graph.find_by_name_exact(name).into_iter().cloned().collect(),
            GraphQuery::NameContains(term) => {
                graph.find_by_name_contains(term).into_iter().cloned().collect()
            }
            GraphQuery::NameRegexInsensitive(pattern) => {
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| GraphRagError::Validation(format!("invalid graph query pattern: {e}")))?;
                graph
                    .entities()
                    .filter(|e| re.is_match(&e.name))
                    .cloned()
                    .collect()
            }
            GraphQuery::DescriptionContains(term) => {
                graph.find_by_description_contains(term).into_iter().cloned().collect()
            }
            GraphQuery::AnyNode { limit } => graph.entities().take(*limit).cloned().collect(),
        };
        Ok(results)
    }

    async fn close(&self) -> Result<()> {
        self.kv.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv_store::SledKvStore;
    use crate::types::new_id;

    fn entity(name: &str, description: &str) -> Entity {
        Entity {
            id: new_id("entity"),
            name: name.to_string(),
            entity_type: "person".to_string(),
            description: description.to_string(),
            confidence: 0.9,
            source_chunk_ids: vec![],
        }
    }

    #[tokio::test]
    async fn round_trips_graph_through_kv_store() {
        let dir = tempfile::tempdir().unwrap();
        let kv = SledKvStore::open(dir.path().join("kv")).unwrap();
        let store = KvGraphStore::new(kv);

        let mut graph = KnowledgeGraph::new(100);
        graph.upsert_entity(entity("Ada Lovelace", "mathematician"));
        store.store_graph(&graph).await.unwrap();

        let loaded = store.load_graph(100).await.unwrap();
        assert_eq!(loaded.node_count(), 1);
    }

    #[tokio::test]
    async fn exact_name_query_is_case_insensitive_to_stored_value() {
        let dir = tempfile::tempdir().unwrap();
        let kv = SledKvStore::open(dir.path().join("kv")).unwrap();
        let store = KvGraphStore::new(kv);

        let mut graph = KnowledgeGraph::new(100);
        graph.upsert_entity(entity("Ada Lovelace", "mathematician"));

        let results = store
            .execute_query(&graph, &GraphQuery::ExactName("ada lovelace".to_string()))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn description_contains_supports_full_text_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let kv = SledKvStore::open(dir.path().join("kv")).unwrap();
        let store = KvGraphStore::new(kv);

        let mut graph = KnowledgeGraph::new(100);
        graph.upsert_entity(entity("Ada Lovelace", "pioneer of computer programming"));

        let results = store
            .execute_query(&graph, &GraphQuery::DescriptionContains("programming".to_string()))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
