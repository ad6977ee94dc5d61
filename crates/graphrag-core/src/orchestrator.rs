use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{RAGConfig, RunMode};
use crate::context::ContextAssembler;
use crate::embeddings::EmbeddingRouter;
use crate::error::Result;
use crate::graph::{GraphBuilder, GraphStore, KnowledgeGraph, KvGraphStore};
use crate::llm::LLMProvider;
use crate::processing::TextChunker;
use crate::retrieval::{AdaptiveFallbackRetriever, HybridRetriever, HybridRetrieverConfig};
use crate::search::bm25::Bm25Index;
use crate::storage::{KvStore, LanceVectorStore, SledKvStore, VectorStore};
use crate::types::{BuildReport, Document, RetrievalReport, RetrievalResult, SPOIndex, VectorRecord};

use std::time::Duration;

/// Owns the storage handles for a single run and drives the three run
/// modes. `Build` indexes documents; `Qa` only opens existing storage for
/// retrieval; `Full` does both in sequence. One `LanceVectorStore` handle
/// per collection is constructed here and reused for the orchestrator's
/// lifetime — opening a fresh handle per call would re-run `ensure_table`
/// needlessly.
pub struct Orchestrator {
    config: RAGConfig,
    embeddings: Arc<EmbeddingRouter>,
    llm: Option<Arc<dyn LLMProvider>>,
    vector_store: Arc<dyn VectorStore>,
    graph_vector_store: Option<Arc<dyn VectorStore>>,
    bm25_index: Arc<Bm25Index>,
    graph_store: Arc<dyn GraphStore>,
    graph: Arc<RwLock<KnowledgeGraph>>,
    kv: Arc<dyn KvStore>,
    context_assembler: ContextAssembler,
}

impl Orchestrator {
    pub async fn open(config: RAGConfig, embeddings: Arc<EmbeddingRouter>, llm: Option<Arc<dyn LLMProvider>>) -> Result<Self> {
        config.validate()?;

        let vector_store: Arc<dyn VectorStore> = Arc::new(
            LanceVectorStore::open(
                &config.storage.vector.path,
                config.storage.vector.collection_name.clone(),
                config.embedding.dimension,
            )
            .await?,
        );

        let graph_vector_store: Option<Arc<dyn VectorStore>> = if config.retrieval.graph.enable_vector_indexing {
            Some(Arc::new(
                LanceVectorStore::open(
                    &config.storage.vector.path,
                    config.storage.vector.graph_collection_name.clone(),
                    config.embedding.dimension,
                )
                .await?,
            ))
        } else {
            None
        };

        let kv: Arc<dyn KvStore> = Arc::new(SledKvStore::open(&config.storage.kv_path)?);
        let graph_store: Arc<dyn GraphStore> = Arc::new(KvGraphStore::new(SledKvStore::open(&config.storage.kv_path)?));
        let graph = Arc::new(RwLock::new(
            graph_store.load_graph(config.storage.graph.max_nodes).await?,
        ));

        let bm25_index = Arc::new(Bm25Index::new(config.retrieval.bm25.clone()));
        if let Some(bytes) = kv.get("bm25_snapshot").await? {
            if let Ok(docs) = serde_json::from_slice::<Vec<(String, String, std::collections::HashMap<String, String>)>>(&bytes) {
                bm25_index.add_documents(docs);
            }
        }

        let context_assembler = ContextAssembler::new(config.rag.clone());

        Ok(Self {
            config,
            embeddings,
            llm,
            vector_store,
            graph_vector_store,
            bm25_index,
            graph_store,
            graph,
            kv,
            context_assembler,
        })
    }

    /// Chunks, embeds, and persists one document across the vector,
    /// BM25, and graph indexes. The three chunking profiles run
    /// independently — graph/vector/bm25 chunks do not share ids.
    pub async fn build_document(&self, doc: &Document) -> Result<()> {
        let vector_chunker = TextChunker::new(self.config.chunking.vector.clone());
        let bm25_chunker = TextChunker::new(self.config.chunking.bm25.clone());
        let graph_chunker = TextChunker::new(self.config.chunking.graph.clone());

        let vector_chunks = vector_chunker.chunk_document(doc, Some(&self.embeddings), self.llm.as_deref()).await?;
        let bm25_chunks = bm25_chunker.chunk_document(doc, Some(&self.embeddings), self.llm.as_deref()).await?;
        let graph_chunks = graph_chunker.chunk_document(doc, Some(&self.embeddings), self.llm.as_deref()).await?;

        let texts: Vec<String> = vector_chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;

        let records: Vec<VectorRecord> = vector_chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id.clone(),
                vector,
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
            })
            .collect();
        self.vector_store.add(records).await?;

        let bm25_docs: Vec<(String, String, std::collections::HashMap<String, String>)> = bm25_chunks
            .iter()
            .map(|c| (c.id.clone(), c.content.clone(), c.metadata.clone()))
            .collect();
        self.bm25_index.add_documents(bm25_docs);

        if let Some(provider) = &self.llm {
            let builder = GraphBuilder::new(provider.clone(), self.config.graph_builder.clone());
            let doc_graph = builder.build(&graph_chunks, self.config.storage.graph.max_nodes).await?;

            let mut graph = self.graph.write();
            for entity in doc_graph.entities() {
                graph.upsert_entity(entity.clone());
            }
            for relationship in doc_graph.relationships() {
                let _ = graph.add_relationship(relationship.clone());
            }
        }

        Ok(())
    }

    /// Flushes the in-memory graph and BM25 index to durable storage.
    /// Call once after a batch of `build_document` calls, not per
    /// document — each flush serializes the whole index.
    pub async fn flush(&self) -> Result<()> {
        self.graph_store.store_graph(&self.graph.read()).await?;

        let snapshot = self.bm25_index.snapshot();
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| crate::error::GraphRagError::StorageQueryFailed(format!("serialize bm25 snapshot: {e}")))?;
        self.kv.set("bm25_snapshot", &bytes).await?;

        let spo_index = self.graph.read().to_spo_index();
        let spo_bytes = serde_json::to_vec(&spo_index)
            .map_err(|e| crate::error::GraphRagError::StorageQueryFailed(format!("serialize spo index: {e}")))?;
        self.kv.set("spo_index", &spo_bytes).await?;

        self.persist_graph_stats().await?;

        self.kv.flush().await?;

        self.graph_store.close().await
    }

    /// Serializes `KnowledgeGraph::stats` into the KV store under
    /// `graph_stats` with an ISO-8601 UTC build timestamp.
    async fn persist_graph_stats(&self) -> Result<()> {
        let build_time = chrono::Utc::now().to_rfc3339();
        let stats = self.graph.read().stats(build_time);
        let bytes = serde_json::to_vec(&stats)
            .map_err(|e| crate::error::GraphRagError::StorageQueryFailed(format!("serialize graph stats: {e}")))?;
        self.kv.set("graph_stats", &bytes).await
    }

    /// Full index build per §4.10: dispatches on `config.mode`. `Build`
    /// runs the eight build steps against fresh (recreated) collections;
    /// `Qa` re-opens existing storage and runs lightweight consistency
    /// checks instead; `Full` runs both in sequence.
    pub async fn build(&self, docs: &[Document]) -> Result<BuildReport> {
        match self.config.mode {
            RunMode::Qa => self.run_qa().await,
            RunMode::Build => self.run_build(docs).await,
            RunMode::Full => {
                let mut report = self.run_build(docs).await?;
                let qa = self.run_qa().await?;
                report.steps.extend(qa.steps);
                report.success = report.success && qa.success;
                Ok(report)
            }
        }
    }

    /// Build order is strict: any step's failure is logged into the
    /// report and the next step still runs where semantically possible
    /// (e.g. the SPO index can still be serialized even if the document
    /// vector index failed to recreate).
    async fn run_build(&self, docs: &[Document]) -> Result<BuildReport> {
        let mut report = BuildReport::new(RunMode::Build, docs.len());

        let graph_chunker = TextChunker::new(self.config.chunking.graph.clone());
        let mut graph_chunks = Vec::new();
        let mut chunking_failed = false;
        for doc in docs {
            match graph_chunker.chunk_document(doc, Some(&self.embeddings), self.llm.as_deref()).await {
                Ok(mut chunks) => graph_chunks.append(&mut chunks),
                Err(e) => {
                    chunking_failed = true;
                    tracing::warn!(doc_id = %doc.id, error = %e, "graph chunking failed for document");
                }
            }
        }
        if chunking_failed {
            report.step_err("chunker-graph-pass", "one or more documents failed graph chunking");
        } else {
            report.step_ok("chunker-graph-pass");
        }

        let extracted_graph = if let Some(provider) = &self.llm {
            let builder = GraphBuilder::new(provider.clone(), self.config.graph_builder.clone());
            match builder.build(&graph_chunks, self.config.storage.graph.max_nodes).await {
                Ok(graph) => {
                    report.step_ok("entity-relation-extraction");
                    graph
                }
                Err(e) => {
                    report.step_err("entity-relation-extraction", &e);
                    KnowledgeGraph::new(self.config.storage.graph.max_nodes)
                }
            }
        } else {
            report.step_err("entity-relation-extraction", "no LLM provider configured");
            KnowledgeGraph::new(self.config.storage.graph.max_nodes)
        };

        *self.graph.write() = extracted_graph;
        match self.graph_store.store_graph(&self.graph.read()).await {
            Ok(()) => report.step_ok("graph-persist"),
            Err(e) => report.step_err("graph-persist", e),
        }

        let vector_chunker = TextChunker::new(self.config.chunking.vector.clone());
        let mut vector_chunks = Vec::new();
        for doc in docs {
            match vector_chunker.chunk_document(doc, Some(&self.embeddings), self.llm.as_deref()).await {
                Ok(mut chunks) => vector_chunks.append(&mut chunks),
                Err(e) => tracing::warn!(doc_id = %doc.id, error = %e, "vector chunking failed for document"),
            }
        }
        match self.build_document_vector_index(&vector_chunks).await {
            Ok(()) => report.step_ok("document-chunk-vector-index"),
            Err(e) => report.step_err("document-chunk-vector-index", e),
        }

        if let Some(graph_vector_store) = &self.graph_vector_store {
            match self.build_graph_vector_index(graph_vector_store).await {
                Ok(()) => report.step_ok("graph-embedding-vector-index"),
                Err(e) => report.step_err("graph-embedding-vector-index", e),
            }
        }

        let bm25_chunker = TextChunker::new(self.config.chunking.bm25.clone());
        let mut bm25_failed = false;
        self.bm25_index.clear();
        for doc in docs {
            match bm25_chunker.chunk_document(doc, Some(&self.embeddings), self.llm.as_deref()).await {
                Ok(chunks) => {
                    let bm25_docs: Vec<(String, String, std::collections::HashMap<String, String>)> = chunks
                        .iter()
                        .map(|c| (c.id.clone(), c.content.clone(), c.metadata.clone()))
                        .collect();
                    self.bm25_index.add_documents(bm25_docs);
                }
                Err(e) => {
                    bm25_failed = true;
                    tracing::warn!(doc_id = %doc.id, error = %e, "bm25 chunking failed for document");
                }
            }
        }
        if bm25_failed {
            report.step_err("bm25-ingest", "one or more documents failed bm25 chunking");
        } else {
            report.step_ok("bm25-ingest");
        }

        let spo_index = self.graph.read().to_spo_index();
        match serde_json::to_vec(&spo_index) {
            Ok(bytes) => match self.kv.set("spo_index", &bytes).await {
                Ok(()) => report.step_ok("spo-index-serialization"),
                Err(e) => report.step_err("spo-index-serialization", e),
            },
            Err(e) => report.step_err("spo-index-serialization", e),
        }

        match self.persist_graph_stats().await {
            Ok(()) => report.step_ok("stats-caching"),
            Err(e) => report.step_err("stats-caching", e),
        }

        Ok(report)
    }

    async fn build_document_vector_index(&self, chunks: &[crate::types::Chunk]) -> Result<()> {
        self.vector_store.recreate_if_exists().await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id.clone(),
                vector,
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
            })
            .collect();
        self.vector_store.add(records).await
    }

    /// Embeds every entity and relationship in the freshly built graph
    /// into the graph-embedding collection. IDs follow §3:
    /// `entity_{uuid}` (the entity's own id, already in that shape) and
    /// `relation_{relationship_id}`.
    async fn build_graph_vector_index(&self, graph_vector_store: &Arc<dyn VectorStore>) -> Result<()> {
        graph_vector_store.recreate_if_exists().await?;

        let graph = self.graph.read();
        let mut texts = Vec::new();
        let mut ids = Vec::new();
        let mut metadata = Vec::new();

        for entity in graph.entities() {
            texts.push(format!("{} ({}): {}", entity.name, entity.entity_type, entity.description));
            ids.push(entity.id.clone());
            let mut m = std::collections::HashMap::new();
            m.insert("entity_type".to_string(), entity.entity_type.clone());
            metadata.push(m);
        }
        for relationship in graph.relationships() {
            let source = graph.entity_by_id(&relationship.source_entity_id);
            let target = graph.entity_by_id(&relationship.target_entity_id);
            let (source_name, target_name) = match (source, target) {
                (Some(s), Some(t)) => (s.name.clone(), t.name.clone()),
                _ => continue,
            };
            texts.push(format!("{source_name} {} {target_name}", relationship.relation_type));
            ids.push(format!("relation_{}", relationship.id));
            let mut m = std::collections::HashMap::new();
            m.insert("relation_type".to_string(), relationship.relation_type.clone());
            metadata.push(m);
        }
        drop(graph);

        if texts.is_empty() {
            return Ok(());
        }

        let vectors = self.embeddings.embed_batch(&texts).await?;
        let records: Vec<VectorRecord> = ids
            .into_iter()
            .zip(texts)
            .zip(vectors)
            .zip(metadata)
            .map(|(((id, content), vector), metadata)| VectorRecord { id, vector, content, metadata })
            .collect();
        graph_vector_store.add(records).await
    }

    /// `qa` mode consistency check per §4.10: collection non-empty,
    /// dimension matches the embedding router, SPO index parses. No
    /// clear/recreate calls are issued.
    async fn run_qa(&self) -> Result<BuildReport> {
        let mut report = BuildReport::new(RunMode::Qa, 0);

        match self.vector_store.status().await {
            Ok(status) if status.row_count > 0 => report.step_ok("document_collection_non_empty"),
            Ok(_) => report.step_err("document_collection_non_empty", "document-chunk collection is empty"),
            Err(e) => report.step_err("document_collection_non_empty", e),
        }

        if self.vector_store.dimension() == self.config.embedding.dimension {
            report.step_ok("document_collection_dimension_matches_router");
        } else {
            report.step_err(
                "document_collection_dimension_matches_router",
                format!(
                    "store dimension {} != router dimension {}",
                    self.vector_store.dimension(),
                    self.config.embedding.dimension
                ),
            );
        }

        match self.kv.get("spo_index").await {
            Ok(Some(bytes)) => match serde_json::from_slice::<SPOIndex>(&bytes) {
                Ok(_) => report.step_ok("spo_index_parses"),
                Err(e) => report.step_err("spo_index_parses", e),
            },
            Ok(None) => report.step_err("spo_index_parses", "no spo_index persisted in the kv store"),
            Err(e) => report.step_err("spo_index_parses", e),
        }

        if let Some(graph_vector_store) = &self.graph_vector_store {
            match graph_vector_store.status().await {
                Ok(status) if status.row_count > 0 => report.step_ok("graph_vector_collection_non_empty"),
                Ok(_) => report.step_err("graph_vector_collection_non_empty", "graph-embedding collection is empty"),
                Err(e) => report.step_err("graph_vector_collection_non_empty", e),
            }
            if graph_vector_store.dimension() == self.config.embedding.dimension {
                report.step_ok("graph_vector_collection_dimension_matches_router");
            } else {
                report.step_err(
                    "graph_vector_collection_dimension_matches_router",
                    format!(
                        "store dimension {} != router dimension {}",
                        graph_vector_store.dimension(),
                        self.config.embedding.dimension
                    ),
                );
            }
        }

        Ok(report)
    }

    pub fn retriever(&self) -> AdaptiveFallbackRetriever {
        let hybrid = HybridRetriever::new(
            self.vector_store.clone(),
            self.bm25_index.clone(),
            self.graph_store.clone(),
            self.graph.clone(),
            self.graph_vector_store.clone(),
            HybridRetrieverConfig {
                vector: self.config.retrieval.vector.clone(),
                graph: self.config.retrieval.graph.clone(),
                bm25: self.config.retrieval.bm25.clone(),
                hybrid: self.config.retrieval.hybrid.clone(),
                timeout: Duration::from_secs(30),
            },
        );
        AdaptiveFallbackRetriever::new(hybrid, self.embeddings.clone(), self.graph_store.clone(), self.graph.clone())
    }

    pub async fn retrieve(&self, query: &str) -> (Vec<RetrievalResult>, RetrievalReport) {
        self.retriever().retrieve_with_fallback(query).await
    }

    pub fn assemble_context(&self, results: &[RetrievalResult]) -> crate::context::AssembledContext {
        self.context_assembler.assemble(results)
    }

    pub fn graph_vector_store(&self) -> Option<&Arc<dyn VectorStore>> {
        self.graph_vector_store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{KvStore, SledKvStore};
    use crate::types::{new_id, Relationship, SPOIndex};

    /// Exercises the same persist shape `flush()` uses for the SPO index,
    /// without needing the vector/embedding stack a full `Orchestrator`
    /// requires: build a graph, derive its index, write it through
    /// `SledKvStore`, read it back, and check every relationship survived
    /// the round trip in all three maps.
    #[tokio::test]
    async fn spo_index_survives_a_kv_round_trip() {
        let mut graph = crate::graph::KnowledgeGraph::new(100);
        let a = graph
            .upsert_entity(crate::types::Entity {
                id: new_id("entity"),
                name: "Ada Lovelace".to_string(),
                entity_type: "person".to_string(),
                description: String::new(),
                confidence: 0.9,
                source_chunk_ids: vec![],
            })
            .unwrap();
        let b = graph
            .upsert_entity(crate::types::Entity {
                id: new_id("entity"),
                name: "Analytical Engine".to_string(),
                entity_type: "artifact".to_string(),
                description: String::new(),
                confidence: 0.9,
                source_chunk_ids: vec![],
            })
            .unwrap();
        let rel = Relationship {
            id: new_id("rel"),
            source_entity_id: a,
            target_entity_id: b,
            relation_type: "designed".to_string(),
            confidence: 0.9,
        };
        graph.add_relationship(rel.clone()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let kv = SledKvStore::open(dir.path()).unwrap();

        let spo_index = graph.to_spo_index();
        let bytes = serde_json::to_vec(&spo_index).unwrap();
        kv.set("spo_index", &bytes).await.unwrap();

        let loaded_bytes = kv.get("spo_index").await.unwrap().unwrap();
        let loaded: SPOIndex = serde_json::from_slice(&loaded_bytes).unwrap();

        let in_subject = loaded.subject_index.get("Ada Lovelace").unwrap().iter().any(|(_, _, id)| *id == rel.id);
        let in_predicate = loaded.predicate_index.get("designed").unwrap().iter().any(|(_, _, id)| *id == rel.id);
        let in_object = loaded.object_index.get("Analytical Engine").unwrap().iter().any(|(_, _, id)| *id == rel.id);
        assert!(in_subject && in_predicate && in_object);
    }

    /// Same shape as the SPO round trip above, for the `graph_stats` blob
    /// `persist_graph_stats` writes during `flush`/`run_build`.
    #[tokio::test]
    async fn graph_stats_survive_a_kv_round_trip() {
        let mut graph = crate::graph::KnowledgeGraph::new(100);
        graph
            .upsert_entity(crate::types::Entity {
                id: new_id("entity"),
                name: "Grace Hopper".to_string(),
                entity_type: "person".to_string(),
                description: String::new(),
                confidence: 0.9,
                source_chunk_ids: vec![],
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let kv = SledKvStore::open(dir.path()).unwrap();

        let stats = graph.stats("2026-07-28T00:00:00+00:00".to_string());
        let bytes = serde_json::to_vec(&stats).unwrap();
        kv.set("graph_stats", &bytes).await.unwrap();

        let loaded_bytes = kv.get("graph_stats").await.unwrap().unwrap();
        let loaded: crate::types::GraphStats = serde_json::from_slice(&loaded_bytes).unwrap();

        assert_eq!(loaded.entity_count, 1);
        assert_eq!(loaded.entity_types.get("person").copied(), Some(1));
        assert_eq!(loaded.build_time, "2026-07-28T00:00:00+00:00");
    }

    /// `BuildReport` accounting: a failed step flips `success` to false and
    /// is recorded with its error message; subsequent `step_ok` calls don't
    /// revert `success` back to true.
    #[test]
    fn build_report_tracks_step_failures() {
        let mut report = crate::types::BuildReport::new(crate::config::RunMode::Build, 3);
        report.step_ok("chunker-graph-pass");
        report.step_err("entity-relation-extraction", "no LLM provider configured");
        report.step_ok("graph-persist");

        assert!(!report.success);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.documents_processed, 3);
        assert!(!report.steps[1].success);
        assert_eq!(report.steps[1].error.as_deref(), Some("no LLM provider configured"));
        assert!(report.steps[0].success && report.steps[2].success);
    }

    /// `Orchestrator::build` in `Full` mode must run both passes and fold
    /// the qa steps onto the build steps, with `success` taking the
    /// logical AND of both reports.
    #[test]
    fn full_mode_report_folds_qa_steps_onto_build_steps() {
        let mut build_report = crate::types::BuildReport::new(crate::config::RunMode::Build, 1);
        build_report.step_ok("chunker-graph-pass");
        let mut qa_report = crate::types::BuildReport::new(crate::config::RunMode::Qa, 0);
        qa_report.step_err("spo_index_parses", "no spo_index persisted in the kv store");

        let mut folded = build_report.clone();
        folded.steps.extend(qa_report.steps.clone());
        folded.success = folded.success && qa_report.success;

        assert_eq!(folded.steps.len(), 2);
        assert!(!folded.success);
    }
}
