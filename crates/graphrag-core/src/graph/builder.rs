use std::sync::Arc;

use serde::Deserialize;

use crate::config::GraphBuilderConfig;
use crate::error::Result;
use crate::graph::knowledge_graph::KnowledgeGraph;
use crate::llm::json_repair::parse_json_response;
use crate::llm::LLMProvider;
use crate::types::{new_id, Chunk, Entity, Relationship};

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelationship {
    source: String,
    target: String,
    relation_type: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    0.7
}

#[derive(Debug, Deserialize)]
struct ExtractionResult {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relationships: Vec<ExtractedRelationship>,
}

/// Builds a `KnowledgeGraph` from graph-profile chunks by prompting an LLM
/// for subject-predicate-object triples per chunk (batched per
/// `spo_batch_size`), then merging surface forms during canonicalization.
/// Retries a failed-to-parse batch up to `max_retries` times before
/// dropping it — a dropped batch only loses that batch's entities, the
/// rest of the build still completes.
pub struct GraphBuilder {
    llm: Arc<dyn LLMProvider>,
    config: GraphBuilderConfig,
}

impl GraphBuilder {
    pub fn new(llm: Arc<dyn LLMProvider>, config: GraphBuilderConfig) -> Self {
        Self { llm, config }
    }

    pub async fn build(&self, chunks: &[Chunk], max_nodes: usize) -> Result<KnowledgeGraph> {
        let mut graph = KnowledgeGraph::new(max_nodes);

        for batch in chunks.chunks(self.config.spo_batch_size.max(1)) {
            if let Some(extraction) = self.extract_batch(batch).await {
                self.merge_into_graph(&mut graph, batch, extraction);
            }
        }

        Ok(graph)
    }

    async fn extract_batch(&self, batch: &[Chunk]) -> Option<ExtractionResult> {
        let prompt = build_extraction_prompt(batch);

        for attempt in 0..=self.config.max_retries {
            match self.llm.invoke(&prompt).await {
                Ok(raw) => match parse_json_response(&raw) {
                    Ok(value) => match serde_json::from_value::<ExtractionResult>(value) {
                        Ok(parsed) => return Some(parsed),
                        Err(e) => {
                            tracing::warn!(attempt, error = %e, "SPO extraction result did not match schema");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "failed to parse SPO extraction output");
                    }
                },
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "SPO extraction LLM call failed");
                }
            }
        }

        tracing::error!(
            chunks = batch.len(),
            retries = self.config.max_retries,
            "giving up on SPO extraction for this batch"
        );
        None
    }

    fn merge_into_graph(&self, graph: &mut KnowledgeGraph, batch: &[Chunk], extraction: ExtractionResult) {
        let chunk_ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
        let mut name_to_id = std::collections::HashMap::new();

        for extracted in extraction.entities {
            let entity = Entity {
                id: new_id("entity"),
                name: extracted.name.clone(),
                entity_type: extracted.entity_type,
                description: extracted.description,
                confidence: default_confidence(),
                source_chunk_ids: chunk_ids.clone(),
            };
            if let Some(id) = graph.upsert_entity(entity) {
                name_to_id.insert(extracted.name.to_lowercase(), id);
            }
        }

        for rel in extraction.relationships {
            let (Some(source_id), Some(target_id)) = (
                name_to_id.get(&rel.source.to_lowercase()),
                name_to_id.get(&rel.target.to_lowercase()),
            ) else {
                tracing::debug!(
                    source = %rel.source,
                    target = %rel.target,
                    "skipping relationship referencing an entity not extracted in this batch"
                );
                continue;
            };

            let relationship = Relationship {
                id: new_id("rel"),
                source_entity_id: source_id.clone(),
                target_entity_id: target_id.clone(),
                relation_type: rel.relation_type,
                confidence: rel.confidence,
            };
            if let Err(e) = graph.add_relationship(relationship) {
                tracing::warn!(error = %e, "dropping relationship with dangling endpoint");
            }
        }
    }
}

fn build_extraction_prompt(batch: &[Chunk]) -> String {
    let joined = batch
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[chunk {i}]\n{}", c.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Extract entities and relationships from the text below. Respond with JSON only: \
         {{\"entities\": [{{\"name\": str, \"type\": str, \"description\": str}}], \
         \"relationships\": [{{\"source\": str, \"target\": str, \"relation_type\": str, \"confidence\": float}}]}}\n\n{joined}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct ScriptedLlm {
        response: String,
    }

    #[async_trait]
    impl LLMProvider for ScriptedLlm {
        async fn invoke(&self, _prompt: &str) -> Result<String> {
            Ok(self.response.clone())
        }
    }

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            parent_id: "doc_1".to_string(),
            chunk_index: 0,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn builds_graph_from_valid_extraction() {
        let llm = Arc::new(ScriptedLlm {
            response: r#"{"entities": [{"name": "Ada Lovelace", "type": "person", "description": "mathematician"}, {"name": "Analytical Engine", "type": "invention", "description": ""}], "relationships": [{"source": "Ada Lovelace", "target": "Analytical Engine", "relation_type": "designed_notes_for", "confidence": 0.9}]}"#.to_string(),
        });
        let builder = GraphBuilder::new(llm, GraphBuilderConfig { spo_batch_size: 4, max_retries: 1 });
        let graph = builder
            .build(&[chunk("c1", "Ada Lovelace wrote notes on the Analytical Engine.")], 1000)
            .await
            .unwrap();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn unparseable_batch_is_dropped_not_fatal() {
        let llm = Arc::new(ScriptedLlm {
            response: "not json".to_string(),
        });
        let builder = GraphBuilder::new(llm, GraphBuilderConfig { spo_batch_size: 4, max_retries: 0 });
        let graph = builder.build(&[chunk("c1", "some text")], 1000).await.unwrap();
        assert_eq!(graph.node_count(), 0);
    }
}
