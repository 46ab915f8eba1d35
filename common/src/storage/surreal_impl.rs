use async_trait::async_trait;
use serde_json::Value;

use crate::domain::kg_change::{KGChange, KGChangeKind};
use crate::domain::node::Node;
use crate::domain::predicate::Predicate;
use crate::domain::text_chunk::{StructuredData, TextChunk};
use crate::domain::vector::{self, VectorCollection, VectorMatch, VectorRecord};
use crate::error::BrainError;
use crate::storage::db::SurrealDbClient;
use crate::storage::interfaces::{Cache, DocStore, GraphStore, VectorStore};

/// A cache row keyed by an opaque string, stored in its own table so the
/// same per-brain SurrealDB instance can serve as the `Cache` capability
/// without a separate Redis deployment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
struct CacheEntry {
    id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    value: Value,
}

impl crate::storage::types::StoredObject for CacheEntry {
    fn table_name() -> &'static str {
        "cache_entry"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl GraphStore for SurrealDbClient {
    async fn upsert_node(&self, node: Node) -> Result<Node, BrainError> {
        node.merge_upsert(self).await
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>, BrainError> {
        self.get_item::<Node>(id).await
    }

    async fn find_node_by_identity(&self, name: &str, labels: &[String]) -> Result<Option<Node>, BrainError> {
        Node::find_by_identity(self, name, labels).await
    }

    async fn create_edge(&self, edge: Predicate) -> Result<(), BrainError> {
        edge.store(self).await
    }

    async fn edge_exists(&self, tail_uuid: &str, tip_uuid: &str, name: &str) -> Result<bool, BrainError> {
        Predicate::exact_duplicate_exists(self, tail_uuid, tip_uuid, name).await
    }

    async fn deprecate_edge(&self, edge: &Predicate, reason: &str) -> Result<(), BrainError> {
        edge.deprecate(self, reason).await
    }

    async fn neighbors(&self, node_id: &str) -> Result<Vec<Node>, BrainError> {
        Node::neighbors(self, node_id).await
    }

    async fn edges_between(&self, a_id: &str, b_id: &str) -> Result<Vec<Predicate>, BrainError> {
        Predicate::between(self, a_id, b_id).await
    }

    async fn merge_nodes(&self, survivor_id: &str, absorbed_id: &str) -> Result<(), BrainError> {
        Node::merge_into(self, survivor_id, absorbed_id).await
    }

    async fn rename_edge(&self, edge_id: &str, new_name: &str) -> Result<(), BrainError> {
        Predicate::rename(self, edge_id, new_name).await
    }

    async fn deprecate_edge_by_id(&self, edge_id: &str) -> Result<(), BrainError> {
        Predicate::deprecate_by_id(self, edge_id).await
    }

    async fn update_node_properties(&self, node_id: &str, set: serde_json::Map<String, Value>, unset: &[String]) -> Result<(), BrainError> {
        Node::update_properties(self, node_id, set, unset).await
    }

    async fn record_change(&self, task_id: &str, reason: &str, change: KGChangeKind) -> Result<(), BrainError> {
        self.store_item(KGChange::record(task_id.to_string(), reason.to_string(), change))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl VectorStore for SurrealDbClient {
    async fn store(&self, collection: VectorCollection, record: VectorRecord) -> Result<(), BrainError> {
        vector::store_vector(self, collection, record).await
    }

    async fn knn_search(
        &self,
        collection: VectorCollection,
        query_embedding: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<VectorMatch>, BrainError> {
        vector::knn_search(self, collection, query_embedding, k, ef).await
    }
}

#[async_trait]
impl DocStore for SurrealDbClient {
    async fn store_chunk(&self, chunk: TextChunk) -> Result<TextChunk, BrainError> {
        self.store_item(chunk)
            .await?
            .ok_or_else(|| BrainError::Internal("chunk store returned nothing".into()))
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<TextChunk>, BrainError> {
        self.get_item::<TextChunk>(id).await
    }

    async fn store_structured_data(&self, data: StructuredData) -> Result<StructuredData, BrainError> {
        self.store_item(data)
            .await?
            .ok_or_else(|| BrainError::Internal("structured data store returned nothing".into()))
    }
}

#[async_trait]
impl Cache for SurrealDbClient {
    async fn get(&self, key: &str) -> Result<Option<Value>, BrainError> {
        Ok(self.get_item::<CacheEntry>(key).await?.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BrainError> {
        let now = chrono::Utc::now();
        let entry = CacheEntry {
            id: key.to_string(),
            created_at: now,
            updated_at: now,
            value,
        };
        self.delete_item::<CacheEntry>(key).await?;
        self.store_item(entry).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BrainError> {
        self.delete_item::<CacheEntry>(key).await?;
        Ok(())
    }

    async fn decrement(&self, key: &str) -> Result<i64, BrainError> {
        #[derive(serde::Deserialize)]
        struct Row {
            value: i64,
        }

        let now = chrono::Utc::now();
        let mut result = self
            .client
            .query(
                "UPSERT type::thing('cache_entry', $id) SET
                    value = (value ?? 0) - 1,
                    created_at = created_at ?? $now,
                    updated_at = $now
                 RETURN AFTER",
            )
            .bind(("id", key.to_string()))
            .bind(("now", now))
            .await?;
        let rows: Vec<Row> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.value)
            .ok_or_else(|| BrainError::Internal("session counter decrement returned nothing".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::polarity::Polarity;

    #[tokio::test]
    async fn cache_roundtrip_via_graphstore_backing_db() {
        let db = SurrealDbClient::memory("cache_test").await.expect("db");
        Cache::set(&db, "session:flow-1", serde_json::json!({"used": ["a", "b"]}))
            .await
            .expect("set");

        let fetched = Cache::get(&db, "session:flow-1").await.expect("get");
        assert_eq!(fetched, Some(serde_json::json!({"used": ["a", "b"]})));

        Cache::delete(&db, "session:flow-1").await.expect("delete");
        assert_eq!(Cache::get(&db, "session:flow-1").await.expect("get after delete"), None);
    }

    #[tokio::test]
    async fn decrement_reaches_zero_exactly_once_for_the_session_counter() {
        let db = SurrealDbClient::memory("fan_in_test").await.expect("db");
        Cache::set(&db, "session:s1:pending_tasks", serde_json::json!(4)).await.expect("init counter");

        let mut hit_zero = 0;
        for _ in 0..4 {
            let remaining = Cache::decrement(&db, "session:s1:pending_tasks").await.expect("decrement");
            if remaining == 0 {
                hit_zero += 1;
            }
        }
        assert_eq!(hit_zero, 1);
    }

    #[tokio::test]
    async fn graphstore_trait_object_upserts_and_resolves_nodes() {
        let db = SurrealDbClient::memory("graphstore_test").await.expect("db");
        let graph: &dyn GraphStore = &db;

        let node = Node::new(vec!["PERSON".into()], "Ada".into(), String::new(), Polarity::Neutral);
        let stored = graph.upsert_node(node).await.expect("upsert");

        let found = graph
            .find_node_by_identity("Ada", &["PERSON".to_string()])
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.id, stored.id);
    }
}
