use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GraphRagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Build,
    Qa,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    FixedSize,
    Semantic,
    Agentic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingProfile {
    pub strategy: ChunkStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// Used by the `semantic` strategy only.
    pub similarity_threshold: f32,
}

impl ChunkingProfile {
    fn validate(&self, label: &str) -> Result<()> {
        if self.chunk_size < 50 {
            return Err(GraphRagError::ConfigInvalid(format!(
                "chunking.{label}.chunk_size must be >= 50"
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(GraphRagError::ConfigInvalid(format!(
                "chunking.{label}.chunk_overlap must be < chunk_size"
            )));
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(GraphRagError::ConfigInvalid(format!(
                "chunking.{label}.min_chunk_size must be <= chunk_size"
            )));
        }
        Ok(())
    }
}

/// The chunker runs up to three times per build with disjoint configs;
/// resulting chunk id-spaces never collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub graph: ChunkingProfile,
    pub vector: ChunkingProfile,
    pub bm25: ChunkingProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    pub batch_size: usize,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStorageConfig {
    pub path: PathBuf,
    pub collection_name: String,
    pub graph_collection_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStorageConfig {
    pub max_nodes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub vector: VectorStorageConfig,
    pub graph: GraphStorageConfig,
    pub kv_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRetrievalConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRetrievalConfig {
    pub max_nodes: usize,
    pub similarity_threshold: f32,
    pub max_hops: usize,
    pub enable_vector_indexing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub vector_weight: f32,
    pub bm25_weight: f32,
    pub graph_weight: f32,
    pub rrf_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub vector: VectorRetrievalConfig,
    pub graph: GraphRetrievalConfig,
    pub bm25: Bm25Config,
    pub hybrid: HybridConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAssemblyConfig {
    pub default_top_k: usize,
    pub max_context_length: usize,
    pub max_content_per_item: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphBuilderConfig {
    pub spo_batch_size: usize,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RAGConfig {
    pub mode: RunMode,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub rag: RagAssemblyConfig,
    pub graph_builder: GraphBuilderConfig,
}

impl RAGConfig {
    /// Validate config values, returning errors for clearly broken
    /// configurations. Only `ConfigInvalid` at init is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(GraphRagError::ConfigInvalid(
                "embedding.dimension must be > 0".into(),
            ));
        }
        if self.storage.vector.collection_name == self.storage.vector.graph_collection_name {
            return Err(GraphRagError::ConfigInvalid(
                "storage.vector.collection_name and graph_collection_name must differ".into(),
            ));
        }
        self.chunking.graph.validate("graph")?;
        self.chunking.vector.validate("vector")?;
        self.chunking.bm25.validate("bm25")?;

        if self.retrieval.graph.enable_vector_indexing
            && self.storage.vector.graph_collection_name.trim().is_empty()
        {
            return Err(GraphRagError::ConfigInvalid(
                "retrieval.graph.enable_vector_indexing requires storage.vector.graph_collection_name".into(),
            ));
        }
        if self.retrieval.hybrid.vector_weight < 0.0
            || self.retrieval.hybrid.bm25_weight < 0.0
            || self.retrieval.hybrid.graph_weight < 0.0
        {
            return Err(GraphRagError::ConfigInvalid(
                "retrieval.hybrid.* weights must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Load config from a JSON file. No YAML/env loading lives in this
    /// crate — that belongs to the interactive shell.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraphRagError::ConfigInvalid(format!("failed to read {path:?}: {e}")))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| GraphRagError::ConfigInvalid(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

fn default_profile(chunk_size: usize, overlap: usize, min: usize, max: usize) -> ChunkingProfile {
    ChunkingProfile {
        strategy: ChunkStrategy::FixedSize,
        chunk_size,
        chunk_overlap: overlap,
        min_chunk_size: min,
        max_chunk_size: max,
        similarity_threshold: 0.75,
    }
}

impl Default for RAGConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("graphrag-core");

        Self {
            mode: RunMode::Build,
            chunking: ChunkingConfig {
                graph: default_profile(3000, 300, 200, 6000),
                vector: default_profile(1750, 200, 100, 3500),
                bm25: default_profile(500, 50, 50, 1000),
            },
            embedding: EmbeddingConfig {
                dimension: 768,
                batch_size: 32,
                cache_size: 1000,
            },
            storage: StorageConfig {
                vector: VectorStorageConfig {
                    path: data_dir.join("vectors"),
                    collection_name: "document-chunk".to_string(),
                    graph_collection_name: "graph-embedding".to_string(),
                },
                graph: GraphStorageConfig { max_nodes: 100_000 },
                kv_path: data_dir.join("kv"),
                data_dir,
            },
            retrieval: RetrievalConfig {
                vector: VectorRetrievalConfig {
                    top_k: 10,
                    similarity_threshold: 0.2,
                },
                graph: GraphRetrievalConfig {
                    max_nodes: 100_000,
                    similarity_threshold: 0.1,
                    max_hops: 2,
                    enable_vector_indexing: false,
                },
                bm25: Bm25Config { k1: 1.2, b: 0.75 },
                hybrid: HybridConfig {
                    vector_weight: 0.5,
                    bm25_weight: 0.3,
                    graph_weight: 0.2,
                    rrf_k: 60,
                },
            },
            rag: RagAssemblyConfig {
                default_top_k: 10,
                max_context_length: 8000,
                max_content_per_item: 1000,
            },
            graph_builder: GraphBuilderConfig {
                spo_batch_size: 8,
                max_retries: 3,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        RAGConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_dimension() {
        let mut cfg = RAGConfig::default();
        cfg.embedding.dimension = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_same_collection_names() {
        let mut cfg = RAGConfig::default();
        cfg.storage.vector.graph_collection_name = cfg.storage.vector.collection_name.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_vector_indexing_without_graph_collection() {
        let mut cfg = RAGConfig::default();
        cfg.retrieval.graph.enable_vector_indexing = true;
        cfg.storage.vector.graph_collection_name = String::new();
        assert!(cfg.validate().is_err());
    }
}
