use uuid::Uuid;

use crate::{storage::types::StoredObject, stored_object};

/// A standalone factual statement extracted from a chunk that doesn't reduce
/// cleanly to a graph edge, kept searchable via the
/// `vector_observations`/FTS indexes rather than folded into the graph.
stored_object!(Observation, "observation", {
    node_uuid: String,
    text: String,
    source_chunk_id: String
});

impl Observation {
    #[must_use]
    pub fn new(node_uuid: String, text: String, source_chunk_id: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            node_uuid,
            text,
            source_chunk_id,
        }
    }
}
