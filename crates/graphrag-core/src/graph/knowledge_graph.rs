use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{GraphRagError, Result};
use crate::types::{Entity, GraphStats, Relationship, SPOIndex};

/// In-memory property graph built during a run and handed to the graph
/// store for persistence. Node identity for dedup purposes is
/// `Entity::normalized_key()`, not `Entity::id` — callers that re-extract
/// the same surface form across chunks merge into one node.
pub struct KnowledgeGraph {
    graph: DiGraph<Entity, Relationship>,
    key_to_node: HashMap<(String, String), NodeIndex>,
    id_to_node: HashMap<String, NodeIndex>,
    max_nodes: usize,
}

impl KnowledgeGraph {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            graph: DiGraph::new(),
            key_to_node: HashMap::new(),
            id_to_node: HashMap::new(),
            max_nodes,
        }
    }

    /// Insert or merge an entity. Merging an existing (name, type) pair
    /// unions `source_chunk_ids` and keeps the higher confidence score.
    /// Returns `None` once `max_nodes` is reached and the entity is new.
    pub fn upsert_entity(&mut self, entity: Entity) -> Option<String> {
        let key = entity.normalized_key();
        if let Some(&idx) = self.key_to_node.get(&key) {
            let existing = self.graph.node_weight_mut(idx).expect("node exists");
            for chunk_id in entity.source_chunk_ids {
                if !existing.source_chunk_ids.contains(&chunk_id) {
                    existing.source_chunk_ids.push(chunk_id);
                }
            }
            existing.confidence = existing.confidence.max(entity.confidence);
            if existing.description.is_empty() {
                existing.description = entity.description;
            }
            return Some(existing.id.clone());
        }

        if self.graph.node_count() >= self.max_nodes {
            return None;
        }

        let id = entity.id.clone();
        let idx = self.graph.add_node(entity);
        self.key_to_node.insert(key, idx);
        self.id_to_node.insert(id.clone(), idx);
        Some(id)
    }

    /// Insert a relationship. Both endpoints must already exist as
    /// entities in this graph; a dangling reference is rejected rather
    /// than silently dropped so the caller can surface a build warning.
    pub fn add_relationship(&mut self, relationship: Relationship) -> Result<()> {
        let &source_idx = self
            .id_to_node
            .get(&relationship.source_entity_id)
            .ok_or_else(|| {
                GraphRagError::Validation(format!(
                    "relationship {} references unknown source entity {}",
                    relationship.id, relationship.source_entity_id
                ))
            })?;
        let &target_idx = self
            .id_to_node
            .get(&relationship.target_entity_id)
            .ok_or_else(|| {
                GraphRagError::Validation(format!(
                    "relationship {} references unknown target entity {}",
                    relationship.id, relationship.target_entity_id
                ))
            })?;

        self.graph.add_edge(source_idx, target_idx, relationship);
        Ok(())
    }

    pub fn entity_by_id(&self, id: &str) -> Option<&Entity> {
        self.id_to_node.get(id).and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.graph.node_weights()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.graph.edge_weights()
    }

    /// BFS out to `max_hops`, weighting traversal by relationship
    /// confidence — edges below `min_confidence` are not followed.
    /// Returns entities in visitation order (start excluded).
    pub fn neighbors(&self, entity_id: &str, max_hops: usize, min_confidence: f32) -> Vec<&Entity> {
        let Some(&start) = self.id_to_node.get(entity_id) else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        visited.insert(start);
        queue.push_back((start, 0usize));

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_hops {
                continue;
            }
            for edge in self.graph.edges(node) {
                if edge.weight().confidence < min_confidence {
                    continue;
                }
                let next = edge.target();
                if visited.insert(next) {
                    if let Some(entity) = self.graph.node_weight(next) {
                        result.push(entity);
                    }
                    queue.push_back((next, depth + 1));
                }
            }
        }

        result
    }

    /// Case-insensitive substring scan over entity names, used by the
    /// direct-entity fallback path.
    pub fn find_by_name_contains(&self, needle: &str) -> Vec<&Entity> {
        let needle = needle.to_lowercase();
        self.graph
            .node_weights()
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn find_by_name_exact(&self, name: &str) -> Option<&Entity> {
        let target = name.to_lowercase();
        self.graph.node_weights().find(|e| e.name.to_lowercase() == target)
    }

    /// Scan entity descriptions for a substring match, used by the
    /// full-text fallback path when no entity name matches.
    pub fn find_by_description_contains(&self, needle: &str) -> Vec<&Entity> {
        let needle = needle.to_lowercase();
        self.graph
            .node_weights()
            .filter(|e| e.description.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.key_to_node.clear();
        self.id_to_node.clear();
    }

    /// Derives the subject/predicate/object index from the current graph
    /// contents — entity names as subject/object surface forms,
    /// `relation_type` as the predicate. Rebuilt from scratch on every
    /// flush rather than maintained incrementally, same tradeoff as the
    /// graph's own JSON snapshot.
    pub fn to_spo_index(&self) -> SPOIndex {
        let mut index = SPOIndex::default();
        for edge in self.graph.edge_references() {
            let relationship = edge.weight();
            let source = self.graph.node_weight(edge.source()).expect("edge source node exists");
            let target = self.graph.node_weight(edge.target()).expect("edge target node exists");
            index.insert(&source.name, &relationship.relation_type, &target.name, &relationship.id);
        }
        index
    }

    pub fn stats(&self, build_time: impl Into<String>) -> GraphStats {
        let mut entity_types = HashMap::new();
        for entity in self.graph.node_weights() {
            *entity_types.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }
        let mut relationship_types = HashMap::new();
        for rel in self.graph.edge_weights() {
            *relationship_types.entry(rel.relation_type.clone()).or_insert(0) += 1;
        }
        GraphStats {
            entity_count: self.graph.node_count(),
            relationship_count: self.graph.edge_count(),
            entity_types,
            relationship_types,
            build_time: build_time.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_id;

    fn entity(name: &str) -> Entity {
        Entity {
            id: new_id("entity"),
            name: name.to_string(),
            entity_type: "person".to_string(),
            description: String::new(),
            confidence: 0.9,
            source_chunk_ids: vec!["chunk_1".to_string()],
        }
    }

    #[test]
    fn upserting_same_surface_form_merges_chunk_ids() {
        let mut graph = KnowledgeGraph::new(100);
        let id1 = graph.upsert_entity(entity("Ada Lovelace")).unwrap();
        let mut second = entity("ada lovelace");
        second.source_chunk_ids = vec!["chunk_2".to_string()];
        let id2 = graph.upsert_entity(second).unwrap();

        assert_eq!(id1, id2);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.entity_by_id(&id1).unwrap().source_chunk_ids.len(), 2);
    }

    #[test]
    fn relationship_with_unknown_endpoint_is_rejected() {
        let mut graph = KnowledgeGraph::new(100);
        let a = graph.upsert_entity(entity("A")).unwrap();
        let rel = Relationship {
            id: new_id("rel"),
            source_entity_id: a,
            target_entity_id: "missing".to_string(),
            relation_type: "knows".to_string(),
            confidence: 0.8,
        };
        assert!(graph.add_relationship(rel).is_err());
    }

    #[test]
    fn neighbors_respects_confidence_floor() {
        let mut graph = KnowledgeGraph::new(100);
        let a = graph.upsert_entity(entity("A")).unwrap();
        let b = graph.upsert_entity(entity("B")).unwrap();
        graph
            .add_relationship(Relationship {
                id: new_id("rel"),
                source_entity_id: a.clone(),
                target_entity_id: b,
                relation_type: "knows".to_string(),
                confidence: 0.3,
            })
            .unwrap();

        assert!(graph.neighbors(&a, 1, 0.5).is_empty());
        assert_eq!(graph.neighbors(&a, 1, 0.1).len(), 1);
    }

    #[test]
    fn max_nodes_caps_new_entities() {
        let mut graph = KnowledgeGraph::new(1);
        assert!(graph.upsert_entity(entity("A")).is_some());
        assert!(graph.upsert_entity(entity("B")).is_none());
    }

    #[test]
    fn every_relationship_round_trips_into_all_three_spo_indices() {
        let mut graph = KnowledgeGraph::new(100);
        let a = graph.upsert_entity(entity("Ada Lovelace")).unwrap();
        let b = graph.upsert_entity(entity("Analytical Engine")).unwrap();
        let rel = Relationship {
            id: new_id("rel"),
            source_entity_id: a,
            target_entity_id: b,
            relation_type: "designed".to_string(),
            confidence: 0.9,
        };
        graph.add_relationship(rel.clone()).unwrap();

        let spo = graph.to_spo_index();

        let in_subject = spo.subject_index.get("Ada Lovelace").unwrap().iter().any(|(_, _, id)| *id == rel.id);
        let in_predicate = spo.predicate_index.get("designed").unwrap().iter().any(|(_, _, id)| *id == rel.id);
        let in_object = spo.object_index.get("Analytical Engine").unwrap().iter().any(|(_, _, id)| *id == rel.id);

        assert!(in_subject && in_predicate && in_object);
    }
}
