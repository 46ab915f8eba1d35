#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod agents;
pub mod consolidation;
pub mod ingestion_manager;

use std::sync::Arc;

use chrono::Utc;
use common::domain::architect::{ArchitectRelationship, EntityRef};
use common::error::BrainError;
use common::storage::db::SurrealDbClient;
use common::storage::interfaces::{Cache, Services};
use common::storage::types::ingestion_task::{IngestionPayload, IngestionTask, TaskErrorInfo, DEFAULT_LEASE_SECS};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use agents::architect::{ArchitectAgent, ArchitectMode};
use agents::scout::ScoutAgent;
use consolidation::ConsolidationOrchestrator;
use ingestion_manager::IngestionManager;

/// Tuning knobs the worker loop and the dispatch functions below need,
/// pulled out of `AppConfig` so tests can construct a minimal instance.
#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub agent_retry_attempts: usize,
    pub duplicate_edge_threshold: f32,
}

/// Claims and processes `IngestionTask`s until cancelled, following the base
/// crate's `run_worker_loop` claim/backoff shape, generalized to dispatch on
/// `IngestionPayload` variant rather than call a single pipeline type.
pub async fn run_worker_loop(
    services: Arc<dyn Services>,
    db: Arc<SurrealDbClient>,
    tuning: IngestionTuning,
) -> Result<(), BrainError> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS as u64);
    let idle_backoff = Duration::from_millis(500);

    loop {
        match IngestionTask::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(%worker_id, %task_id, attempt = task.attempts, "claimed ingestion task");
                match process_task(services.as_ref(), &task.payload, &tuning).await {
                    Ok(()) => {
                        if let Err(err) = task.mark_succeeded(&db).await {
                            error!(%worker_id, %task_id, error = %err, "failed to mark task succeeded");
                        }
                    }
                    Err(err) => {
                        warn!(%worker_id, %task_id, error = %err, "ingestion task failed, scheduling retry");
                        let info = TaskErrorInfo { code: "processing_error".into(), message: err.to_string() };
                        if let Err(mark_err) = task.mark_failed(&db, info, Duration::from_secs(30)).await {
                            error!(%worker_id, %task_id, error = %mark_err, "failed to mark task failed");
                        }
                    }
                }
            }
            Ok(None) => sleep(idle_backoff).await,
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim ingestion task");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Dispatches one claimed task to the stage its payload names.
pub async fn process_task(
    services: &dyn Services,
    payload: &IngestionPayload,
    tuning: &IngestionTuning,
) -> Result<(), BrainError> {
    match payload {
        IngestionPayload::IngestData { brain_id, text, session_id } => {
            ingest_data(services, brain_id, text, session_id, tuning).await
        }
        IngestionPayload::IngestStructuredData { brain_id, document_id, payload, session_id } => {
            ingest_structured_data(services, brain_id, document_id, payload, session_id).await
        }
        IngestionPayload::ProcessArchitectRelationships { brain_id, session_id, relationships } => {
            process_architect_relationships(services, brain_id, session_id, relationships, tuning).await
        }
        IngestionPayload::ConsolidateGraphAsync { brain_id: _, session_id } => {
            consolidate_graph_async(services, session_id).await
        }
    }
}

/// Scout extracts entities, Architect builds the Triangle of Attribution,
/// and the result is committed immediately through the
/// `IngestionManager` — the single-worker-step shape the fan-in counter
/// (`process_architect_relationships`) exists to support for the
/// multi-chunk case.
async fn ingest_data(
    services: &dyn Services,
    brain_id: &str,
    text: &str,
    session_id: &str,
    tuning: &IngestionTuning,
) -> Result<(), BrainError> {
    let scout = ScoutAgent::new(services.llm(), tuning.agent_retry_attempts);
    let (scout_entities, _scout_tokens) = scout.extract(text, None, brain_id).await?;

    let entity_refs: Vec<EntityRef> = scout_entities
        .iter()
        .map(|e| EntityRef {
            uuid: Uuid::new_v4().to_string(),
            name: e.name.clone(),
            entity_type: e.entity_type.clone(),
            flow_key: Uuid::new_v4().to_string(),
            happened_at: e.happened_at,
        })
        .collect();

    let architect = ArchitectAgent::new(services.llm(), tuning.agent_retry_attempts);
    let (relationships, new_nodes, _architect_tokens) = architect
        .build(ArchitectMode::SingleShot, text, &entity_refs, None, brain_id)
        .await?;

    let mut manager = IngestionManager::new(services.graph(), services.vectors(), services.embedder());
    manager
        .commit(&entity_refs, &new_nodes, &relationships, tuning.duplicate_edge_threshold)
        .await?;

    record_touched_nodes(services, session_id, &entity_refs).await?;
    maybe_enqueue_consolidation(services, brain_id, session_id).await
}

async fn ingest_structured_data(
    services: &dyn Services,
    _brain_id: &str,
    document_id: &str,
    payload: &serde_json::Map<String, serde_json::Value>,
    _session_id: &str,
) -> Result<(), BrainError> {
    let data = common::domain::text_chunk::StructuredData::new(document_id.to_string(), payload.clone());
    services.docs().store_structured_data(data).await?;
    Ok(())
}

/// Applied after a fanned-out chunk's Architect run completes: commits its
/// relationships, decrements the session's pending counter, and enqueues
/// consolidation the moment it hits zero.
async fn process_architect_relationships(
    services: &dyn Services,
    _brain_id: &str,
    session_id: &str,
    relationships: &[ArchitectRelationship],
    tuning: &IngestionTuning,
) -> Result<(), BrainError> {
    let mut manager = IngestionManager::new(services.graph(), services.vectors(), services.embedder());
    manager.commit(&[], &[], relationships, tuning.duplicate_edge_threshold).await?;

    let remaining = services.cache().decrement(&format!("session:{session_id}:pending_tasks")).await?;
    if remaining <= 0 {
        let orchestrator = ConsolidationOrchestrator::new(services.graph(), services.cache(), services.embedder());
        orchestrator.consolidate_session(session_id).await?;
    }
    Ok(())
}

async fn consolidate_graph_async(services: &dyn Services, session_id: &str) -> Result<(), BrainError> {
    let orchestrator = ConsolidationOrchestrator::new(services.graph(), services.cache(), services.embedder());
    orchestrator.consolidate_session(session_id).await?;
    Ok(())
}

async fn record_touched_nodes(services: &dyn Services, session_id: &str, entities: &[EntityRef]) -> Result<(), BrainError> {
    let key = format!("session:{session_id}:touched_nodes");
    let mut touched: Vec<String> = match services.cache().get(&key).await? {
        Some(value) => serde_json::from_value(value).unwrap_or_default(),
        None => Vec::new(),
    };
    touched.extend(entities.iter().map(|e| e.uuid.clone()));
    services.cache().set(&key, serde_json::json!(touched)).await
}

async fn maybe_enqueue_consolidation(services: &dyn Services, _brain_id: &str, session_id: &str) -> Result<(), BrainError> {
    let key = format!("session:{session_id}:pending_tasks");
    let remaining = services.cache().decrement(&key).await?;
    if remaining <= 0 {
        let orchestrator = ConsolidationOrchestrator::new(services.graph(), services.cache(), services.embedder());
        orchestrator.consolidate_session(session_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::domain::token_detail::TokenDetail;
    use common::storage::db::SurrealDbClient;
    use common::storage::interfaces::{Cache as _, DocStore, Embedder, GraphStore, Llm, VectorStore};

    struct StubLlm;

    #[async_trait]
    impl Llm for StubLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<(String, TokenDetail), BrainError> {
            Ok(("[]".to_string(), TokenDetail::zero()))
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _input: &str) -> Result<Vec<f32>, BrainError> {
            Ok(vec![0.1, 0.2])
        }

        fn dimension(&self) -> u32 {
            2
        }
    }

    struct TestServices {
        db: SurrealDbClient,
        llm: StubLlm,
        embedder: StubEmbedder,
    }

    impl Services for TestServices {
        fn graph(&self) -> &dyn GraphStore {
            &self.db
        }
        fn vectors(&self) -> &dyn VectorStore {
            &self.db
        }
        fn docs(&self) -> &dyn DocStore {
            &self.db
        }
        fn cache(&self) -> &dyn Cache {
            &self.db
        }
        fn llm(&self) -> &dyn Llm {
            &self.llm
        }
        fn embedder(&self) -> &dyn Embedder {
            &self.embedder
        }
    }

    #[tokio::test]
    async fn ingest_data_with_empty_scout_result_is_a_graceful_no_op() {
        let services = TestServices { db: SurrealDbClient::memory("lib_test").await.expect("db"), llm: StubLlm, embedder: StubEmbedder };
        let tuning = IngestionTuning { agent_retry_attempts: 1, duplicate_edge_threshold: 0.9 };

        let payload = IngestionPayload::IngestData {
            brain_id: "brain-1".into(),
            text: String::new(),
            session_id: "session-1".into(),
        };
        process_task(&services, &payload, &tuning).await.expect("process");
    }

    #[tokio::test]
    async fn session_fan_in_triggers_consolidation_exactly_once_at_zero() {
        let services = TestServices { db: SurrealDbClient::memory("lib_fanin_test").await.expect("db"), llm: StubLlm, embedder: StubEmbedder };
        let tuning = IngestionTuning { agent_retry_attempts: 1, duplicate_edge_threshold: 0.9 };
        services.cache().set("session:s1:pending_tasks", serde_json::json!(1)).await.expect("seed counter");

        let payload = IngestionPayload::ProcessArchitectRelationships {
            brain_id: "brain-1".into(),
            session_id: "s1".into(),
            relationships: vec![],
        };
        process_task(&services, &payload, &tuning).await.expect("process");

        assert_eq!(services.cache().get("session:s1:pending_tasks").await.expect("get"), None);
    }
}
