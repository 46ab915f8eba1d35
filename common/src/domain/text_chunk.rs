use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{storage::types::StoredObject, stored_object};

/// A token-bounded slice of an ingested document, the unit the Scout/
/// Architect pipeline operates over.
stored_object!(TextChunk, "text_chunk", {
    document_id: String,
    chunk: String,
    sequence: u32
});

impl TextChunk {
    #[must_use]
    pub fn new(document_id: String, chunk: String, sequence: u32) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            chunk,
            sequence,
        }
    }
}

/// Pre-structured, non-prose payload (e.g. a parsed JSON/CSV record) ingested
/// alongside free text, bypassing chunking and indexed directly in
/// `vector_data`.
stored_object!(StructuredData, "structured_data", {
    document_id: String,
    payload: Map<String, Value>
});

impl StructuredData {
    #[must_use]
    pub fn new(document_id: String, payload: Map<String, Value>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            payload,
        }
    }
}
