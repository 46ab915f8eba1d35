use common::domain::architect::ConsolidationTask;
use common::domain::kg_change::KGChangeKind;
use common::domain::token_detail::TokenDetail;
use common::error::BrainError;
use common::storage::interfaces::{Cache, Embedder, GraphStore};
use retrieval_pipeline::graph::neighborhood_snapshot;
use tracing::instrument;
use uuid::Uuid;

use crate::agents::janitor::GraphConsolidatorJanitor;

pub const RELATIONSHIP_BATCH_SIZE: usize = 20;
const CONSOLIDATION_HOP_BUDGET: usize = 2;

/// Runs the post-ingestion graph consolidation pass for one session: drains
/// the session's aggregated edge-endpoint set from cache, splits it into
/// fixed-size batches, assembles a 2-hop neighborhood snapshot per batch,
/// hands each snapshot to the Graph Consolidator Janitor, and executes the
/// resulting tasks. Grounded on
/// `original_source/src/core/layers/graph_consolidation/graph_consolidation.py`.
pub struct ConsolidationOrchestrator<'a> {
    graph: &'a dyn GraphStore,
    cache: &'a dyn Cache,
    embedder: &'a dyn Embedder,
}

impl<'a> ConsolidationOrchestrator<'a> {
    #[must_use]
    pub fn new(graph: &'a dyn GraphStore, cache: &'a dyn Cache, embedder: &'a dyn Embedder) -> Self {
        Self { graph, cache, embedder }
    }

    /// Consolidates every node touched by `session_id`'s ingestion run, then
    /// deletes the session's cached node-id set and pending-task counter.
    #[instrument(skip(self))]
    pub async fn consolidate_session(&self, session_id: &str) -> Result<TokenDetail, BrainError> {
        let touched_key = format!("session:{session_id}:touched_nodes");
        let pending_key = format!("session:{session_id}:pending_tasks");

        let node_ids: Vec<String> = match self.cache.get(&touched_key).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => Vec::new(),
        };

        let mut task_details = Vec::new();
        for batch in node_ids.chunks(RELATIONSHIP_BATCH_SIZE) {
            let tasks = self.consolidate_batch(batch).await?;
            for task in tasks {
                self.execute(task).await?;
            }
            task_details.push(TokenDetail::zero());
        }

        self.cache.delete(&touched_key).await?;
        self.cache.delete(&pending_key).await?;

        Ok(TokenDetail::merge(&task_details))
    }

    /// Assembles a 2-hop neighborhood snapshot around `node_ids` and hands it
    /// to the Graph Consolidator Janitor for similarity-threshold-gated
    /// co-reference resolution and duplicate-edge cleanup.
    async fn consolidate_batch(&self, node_ids: &[String]) -> Result<Vec<ConsolidationTask>, BrainError> {
        let neighborhood = neighborhood_snapshot(self.graph, node_ids, CONSOLIDATION_HOP_BUDGET).await?;
        const IDENTITY_SIMILARITY_THRESHOLD: f32 = 0.35;
        GraphConsolidatorJanitor::consolidate(self.embedder, self.graph, &neighborhood, IDENTITY_SIMILARITY_THRESHOLD).await
    }

    /// Applies one task against the graph, then appends an audit entry so a
    /// consolidation run can be replayed or reviewed after the fact.
    async fn execute(&self, task: ConsolidationTask) -> Result<(), BrainError> {
        let task_id = Uuid::new_v4().to_string();

        let (reason, change) = match &task {
            ConsolidationTask::MergeNodes { keep, discard, reason } => {
                self.graph.merge_nodes(keep, discard).await?;
                (reason.clone(), KGChangeKind::NodesMerged { keep: keep.clone(), discard: discard.clone() })
            }
            ConsolidationTask::DeprecateEdge { edge_id, reason } => {
                self.graph.deprecate_edge_by_id(edge_id).await?;
                (reason.clone(), KGChangeKind::EdgeDeprecated { edge_id: edge_id.clone() })
            }
            ConsolidationTask::RenameEdge { edge_id, new_name } => {
                self.graph.rename_edge(edge_id, new_name).await?;
                (
                    String::new(),
                    KGChangeKind::EdgeRenamed { edge_id: edge_id.clone(), from: String::new(), to: new_name.clone() },
                )
            }
            ConsolidationTask::UpdateNodeProperties { node_id, properties } => {
                self.graph.update_node_properties(node_id, properties.clone(), &[]).await?;
                (
                    String::new(),
                    KGChangeKind::NodePropertiesUpdated { node_id: node_id.clone(), properties: properties.clone() },
                )
            }
        };

        self.graph.record_change(&task_id, &reason, change).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::node::Node;
    use common::domain::polarity::Polarity;
    use common::storage::db::SurrealDbClient;

    struct StubEmbedder;

    #[async_trait::async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _input: &str) -> Result<Vec<f32>, BrainError> {
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> u32 {
            2
        }
    }

    #[tokio::test]
    async fn consolidate_session_clears_cache_even_with_no_touched_nodes() {
        let db = SurrealDbClient::memory("consolidation_test").await.expect("db");
        let embedder = StubEmbedder;
        Cache::set(&db, "session:s1:pending_tasks", serde_json::json!(0)).await.expect("seed counter");

        let orchestrator = ConsolidationOrchestrator::new(&db, &db, &embedder);
        orchestrator.consolidate_session("s1").await.expect("consolidate");

        assert_eq!(Cache::get(&db, "session:s1:pending_tasks").await.expect("get"), None);
    }

    #[tokio::test]
    async fn consolidate_batch_merges_near_identical_nodes_in_the_neighborhood() {
        let db = SurrealDbClient::memory("consolidation_merge_test").await.expect("db");
        let embedder = StubEmbedder;

        let a = Node::new(vec!["PERSON".into()], "John".into(), String::new(), Polarity::Neutral)
            .merge_upsert(&db)
            .await
            .expect("store a");
        let b = Node::new(vec!["PERSON".into()], "Johnny".into(), String::new(), Polarity::Neutral)
            .merge_upsert(&db)
            .await
            .expect("store b");
        let event = Node::new(vec!["EVENT".into()], "MET".into(), String::new(), Polarity::Neutral)
            .merge_upsert(&db)
            .await
            .expect("store event");
        common::domain::predicate::Predicate::new(a.id.clone(), event.id.clone(), "MADE".into(), String::new(), "f1".into())
            .store(&db)
            .await
            .expect("edge a->event");
        common::domain::predicate::Predicate::new(b.id.clone(), event.id.clone(), "MADE".into(), String::new(), "f2".into())
            .store(&db)
            .await
            .expect("edge b->event");

        let orchestrator = ConsolidationOrchestrator::new(&db, &db, &embedder);
        let tasks = orchestrator.consolidate_batch(&[a.id.clone()]).await.expect("consolidate batch");

        assert!(
            tasks.iter().any(|t| matches!(t, ConsolidationTask::MergeNodes { .. })),
            "expected a merge task for two nodes embedding to identical vectors"
        );
    }
}
