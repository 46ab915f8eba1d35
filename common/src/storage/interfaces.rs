use async_trait::async_trait;
use serde_json::Value;

use crate::domain::kg_change::KGChangeKind;
use crate::domain::node::Node;
use crate::domain::predicate::Predicate;
use crate::domain::text_chunk::{StructuredData, TextChunk};
use crate::domain::token_detail::TokenDetail;
use crate::domain::vector::{VectorCollection, VectorMatch, VectorRecord};
use crate::error::BrainError;

/// Node/edge persistence surface the agent layer programs against, so the
/// Scout/Architect/Janitor/consolidation code never reaches for a
/// `SurrealDbClient` directly. `SurrealDbClient` itself is the
/// only production implementor.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, node: Node) -> Result<Node, BrainError>;
    async fn get_node(&self, id: &str) -> Result<Option<Node>, BrainError>;
    async fn find_node_by_identity(&self, name: &str, labels: &[String]) -> Result<Option<Node>, BrainError>;
    async fn create_edge(&self, edge: Predicate) -> Result<(), BrainError>;
    async fn edge_exists(&self, tail_uuid: &str, tip_uuid: &str, name: &str) -> Result<bool, BrainError>;
    async fn deprecate_edge(&self, edge: &Predicate, reason: &str) -> Result<(), BrainError>;
    async fn neighbors(&self, node_id: &str) -> Result<Vec<Node>, BrainError>;
    async fn edges_between(&self, a_id: &str, b_id: &str) -> Result<Vec<Predicate>, BrainError>;
    async fn merge_nodes(&self, survivor_id: &str, absorbed_id: &str) -> Result<(), BrainError>;
    async fn rename_edge(&self, edge_id: &str, new_name: &str) -> Result<(), BrainError>;
    async fn deprecate_edge_by_id(&self, edge_id: &str) -> Result<(), BrainError>;
    async fn update_node_properties(&self, node_id: &str, set: serde_json::Map<String, Value>, unset: &[String]) -> Result<(), BrainError>;
    /// Appends one entry to the append-only consolidation audit trail.
    async fn record_change(&self, task_id: &str, reason: &str, change: KGChangeKind) -> Result<(), BrainError>;
}

/// Embedding storage/search surface over the four named vector collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn store(&self, collection: VectorCollection, record: VectorRecord) -> Result<(), BrainError>;
    async fn knn_search(
        &self,
        collection: VectorCollection,
        query_embedding: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<VectorMatch>, BrainError>;
}

/// Document/chunk persistence surface for the ingestion pipeline's
/// chunking stage.
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn store_chunk(&self, chunk: TextChunk) -> Result<TextChunk, BrainError>;
    async fn get_chunk(&self, id: &str) -> Result<Option<TextChunk>, BrainError>;
    async fn store_structured_data(&self, data: StructuredData) -> Result<StructuredData, BrainError>;
}

/// Key/value cache used for short-lived agent scratch state (e.g. the
/// Architect's used-entities set across tool calls). Backed by the same
/// SurrealDB instance rather than Redis: the design's non-goal on "implementing
/// the underlying databases ourselves" scopes out building a cache engine,
/// not substituting a different concrete store behind this capability.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, BrainError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), BrainError>;
    async fn delete(&self, key: &str) -> Result<(), BrainError>;
    /// Atomically decrements an integer counter stored under `key`,
    /// creating it at `0` first if absent, and returns the value after the
    /// decrement. Backs the session fan-in counter ingestion uses to know
    /// when every fanned-out chunk of a session has committed.
    async fn decrement(&self, key: &str) -> Result<i64, BrainError>;
}

/// Chat-completion surface every agent (Scout/Architect/Janitor/KG) calls
/// through, so prompt assembly and usage accounting are uniform regardless
/// of which agent is talking.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<(String, TokenDetail), BrainError>;
}

/// Text-to-vector surface. Implemented by both
/// `OpenAiEmbedder` and `FastEmbedEmbedder`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, BrainError>;
    fn dimension(&self) -> u32;
}

/// Bundles the capability traits an ingestion worker needs, so call sites
/// take one `Arc<dyn Services>` instead of five separate trait objects.
pub trait Services: Send + Sync {
    fn graph(&self) -> &dyn GraphStore;
    fn vectors(&self) -> &dyn VectorStore;
    fn docs(&self) -> &dyn DocStore;
    fn cache(&self) -> &dyn Cache;
    fn llm(&self) -> &dyn Llm;
    fn embedder(&self) -> &dyn Embedder;
}
