use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{storage::types::StoredObject, stored_object};

/// A single committed mutation applied by graph consolidation, persisted as
/// an append-only audit trail of what a `ConsolidationTask` actually did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KGChangeKind {
    NodesMerged { keep: String, discard: String },
    EdgeDeprecated { edge_id: String },
    EdgeRenamed { edge_id: String, from: String, to: String },
    NodePropertiesUpdated { node_id: String, properties: Map<String, Value> },
}

stored_object!(KGChange, "kg_change", {
    task_id: String,
    reason: String,
    change: KGChangeKind
});

impl KGChange {
    #[must_use]
    pub fn record(task_id: String, reason: String, change: KGChangeKind) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            task_id,
            reason,
            change,
        }
    }
}
