use std::collections::HashMap;

use chrono::Utc;
use common::domain::architect::{ArchitectRelationship, EntityRef, NewNode};
use common::domain::node::Node;
use common::domain::polarity::Polarity;
use common::domain::vector::{VectorCollection, VectorRecord};
use common::error::BrainError;
use common::storage::interfaces::{Embedder, GraphStore, VectorStore};
use tracing::instrument;
use uuid::Uuid;

/// Embeds and persists a chunk's resolved entities and edges, grounded on
/// `original_source/src/core/saving/ingestion_manager.py`'s
/// `process_node_vectors`/`process_rel_vectors` plus the graph-write MERGE
/// upsert + RELATE flow. One instance is scoped to a single ingestion run:
/// `resolved_cache` only dedupes within that run, never across runs.
pub struct IngestionManager<'a> {
    graph: &'a dyn GraphStore,
    vectors: &'a dyn VectorStore,
    embedder: &'a dyn Embedder,
    resolved_cache: HashMap<String, String>,
}

impl<'a> IngestionManager<'a> {
    #[must_use]
    pub fn new(graph: &'a dyn GraphStore, vectors: &'a dyn VectorStore, embedder: &'a dyn Embedder) -> Self {
        Self { graph, vectors, embedder, resolved_cache: HashMap::new() }
    }

    /// Embeds an entity name into the `nodes` vector collection and returns
    /// the uuid the caller should persist the node under. A name already
    /// resolved earlier in this run is returned from cache without
    /// re-embedding.
    pub async fn process_node_vectors(&mut self, entity_name: &str, entity_uuid: &str) -> Result<String, BrainError> {
        if let Some(existing) = self.resolved_cache.get(entity_name) {
            return Ok(existing.clone());
        }
        let embedding = self.embedder.embed(entity_name).await?;
        self.vectors
            .store(
                VectorCollection::Nodes,
                VectorRecord {
                    id: entity_uuid.to_string(),
                    created_at: Utc::now(),
                    source_id: entity_uuid.to_string(),
                    text: entity_name.to_string(),
                    embedding,
                },
            )
            .await?;
        self.resolved_cache.insert(entity_name.to_string(), entity_uuid.to_string());
        Ok(entity_uuid.to_string())
    }

    /// Embeds an edge's description into the `relationships` vector
    /// collection, returning `(relationship_uuid, vector_record_id)`.
    pub async fn process_rel_vectors(&self, relationship: &ArchitectRelationship) -> Result<(String, String), BrainError> {
        let embedding = self.embedder.embed(&relationship.description).await?;
        let v_rel_id = Uuid::new_v4().to_string();
        self.vectors
            .store(
                VectorCollection::Relationships,
                VectorRecord {
                    id: v_rel_id.clone(),
                    created_at: Utc::now(),
                    source_id: relationship.uuid.clone(),
                    text: relationship.description.clone(),
                    embedding,
                },
            )
            .await?;
        Ok((relationship.uuid.clone(), v_rel_id))
    }

    /// Persists one Architect output end to end: embeds and MERGE-upserts
    /// every tail/tip node, then adds each edge unless an exact duplicate
    /// already exists or its description is a near-duplicate (cosine over
    /// `duplicate_edge_threshold`) of an edge already connecting the same
    /// pair of nodes. Re-running the same batch is a no-op: `upsert_node`
    /// resolves to the same node by identity and `edge_exists` blocks the
    /// re-create.
    #[instrument(skip(self, entities, new_nodes, relationships))]
    pub async fn commit(
        &mut self,
        entities: &[EntityRef],
        new_nodes: &[NewNode],
        relationships: &[ArchitectRelationship],
        duplicate_edge_threshold: f32,
    ) -> Result<Vec<String>, BrainError> {
        let mut resolved_ids: HashMap<String, String> = HashMap::new();

        for entity in entities {
            self.process_node_vectors(&entity.name, &entity.uuid).await?;
            let node = Node::new(vec![entity.entity_type.clone()], entity.name.clone(), String::new(), Polarity::Neutral);
            let stored = self.graph.upsert_node(node).await?;
            resolved_ids.insert(entity.uuid.clone(), stored.id);
        }

        for node in new_nodes {
            self.process_node_vectors(&node.name, &node.uuid).await?;
            let mut stored_node =
                Node::new(vec![node.node_type.clone()], node.name.clone(), node.description.clone(), Polarity::Neutral);
            stored_node.properties = node.properties.clone();
            let stored = self.graph.upsert_node(stored_node).await?;
            resolved_ids.insert(node.uuid.clone(), stored.id);
        }

        let mut committed = Vec::new();
        for rel in relationships {
            let (Some(tail_id), Some(tip_id)) = (resolved_ids.get(&rel.tail), resolved_ids.get(&rel.tip)) else {
                continue;
            };

            if self.graph.edge_exists(tail_id, tip_id, &rel.name).await? {
                continue;
            }

            let existing_edges = self.graph.edges_between(tail_id, tip_id).await?;
            if !existing_edges.is_empty() {
                let embedding = self.embedder.embed(&rel.description).await?;
                let mut near_duplicate = false;
                for edge in &existing_edges {
                    let other_embedding = self.embedder.embed(&edge.description).await?;
                    if cosine_similarity(&embedding, &other_embedding) >= duplicate_edge_threshold {
                        near_duplicate = true;
                        break;
                    }
                }
                if near_duplicate {
                    continue;
                }
            }

            let mut predicate = common::domain::predicate::Predicate::new(
                tail_id.clone(),
                tip_id.clone(),
                rel.name.clone(),
                rel.description.clone(),
                rel.flow_key.clone(),
            );
            predicate.properties = rel.properties.clone();
            predicate.amount = rel.properties.get("amount").and_then(serde_json::Value::as_f64);
            self.graph.create_edge(predicate).await?;
            self.process_rel_vectors(rel).await?;
            committed.push(rel.uuid.clone());
        }

        Ok(committed)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::db::SurrealDbClient;

    struct StubEmbedder;

    #[async_trait::async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, input: &str) -> Result<Vec<f32>, BrainError> {
            // A description that mentions "friend" embeds near others that do,
            // giving the near-duplicate test a deterministic signal without a
            // real model.
            if input.contains("friend") {
                Ok(vec![1.0, 0.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0, input.len() as f32])
            }
        }

        fn dimension(&self) -> u32 {
            3
        }
    }

    fn entity(uuid: &str, name: &str) -> EntityRef {
        EntityRef { uuid: uuid.into(), name: name.into(), entity_type: "PERSON".into(), flow_key: "f".into(), happened_at: None }
    }

    #[tokio::test]
    async fn commit_is_idempotent_when_the_same_batch_runs_twice() {
        let db = SurrealDbClient::memory("ingestion_manager_test").await.expect("db");
        let embedder = StubEmbedder;
        let entities = vec![entity("a", "John"), entity("b", "KNEW")];
        let rel = ArchitectRelationship::propose("a".into(), "MADE".into(), "John made a friend".into(), "b".into());

        let mut manager = IngestionManager::new(&db, &db, &embedder);
        let first = manager.commit(&entities, &[], &[rel.clone()], 0.9).await.expect("first commit");
        assert_eq!(first.len(), 1);

        let mut manager2 = IngestionManager::new(&db, &db, &embedder);
        let second = manager2.commit(&entities, &[], &[rel], 0.9).await.expect("second commit");
        assert!(second.is_empty(), "re-running the same batch must not create a duplicate edge");
    }

    #[tokio::test]
    async fn near_duplicate_edge_between_same_pair_is_suppressed() {
        let db = SurrealDbClient::memory("ingestion_manager_dup_test").await.expect("db");
        let embedder = StubEmbedder;
        let entities = vec![entity("a", "John"), entity("b", "KNEW")];
        let first_rel = ArchitectRelationship::propose("a".into(), "MADE".into(), "John made a friend".into(), "b".into());
        let second_rel =
            ArchitectRelationship::propose("a".into(), "ACCOMPLISHED_ACTION".into(), "John made a friend too".into(), "b".into());

        let mut manager = IngestionManager::new(&db, &db, &embedder);
        manager.commit(&entities, &[], &[first_rel], 0.9).await.expect("first commit");
        let second = manager.commit(&entities, &[], &[second_rel], 0.9).await.expect("second commit");
        assert!(second.is_empty(), "near-duplicate description between the same endpoints must be suppressed");
    }
}
