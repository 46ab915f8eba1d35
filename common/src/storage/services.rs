use std::sync::Arc;

use crate::storage::db::SurrealDbClient;
use crate::storage::interfaces::{Cache, DocStore, Embedder, GraphStore, Llm, Services, VectorStore};

/// The production `Services` bundle: one per-brain `SurrealDbClient` backing
/// `GraphStore`/`VectorStore`/`DocStore`/`Cache`, plus the LLM and embedding
/// adapters shared across every brain (they carry no per-tenant state).
pub struct BrainServices {
    db: Arc<SurrealDbClient>,
    llm: Arc<dyn Llm>,
    embedder: Arc<dyn Embedder>,
}

impl BrainServices {
    #[must_use]
    pub fn new(db: Arc<SurrealDbClient>, llm: Arc<dyn Llm>, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, llm, embedder }
    }
}

impl Services for BrainServices {
    fn graph(&self) -> &dyn GraphStore {
        self.db.as_ref()
    }

    fn vectors(&self) -> &dyn VectorStore {
        self.db.as_ref()
    }

    fn docs(&self) -> &dyn DocStore {
        self.db.as_ref()
    }

    fn cache(&self) -> &dyn Cache {
        self.db.as_ref()
    }

    fn llm(&self) -> &dyn Llm {
        self.llm.as_ref()
    }

    fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }
}
