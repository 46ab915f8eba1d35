use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::{error::BrainError, storage::db::SurrealDbClient};

/// One of the four named embedding collections, each backed by its own
/// HNSW-indexed table (see `storage::indexes`). Kept as a closed enum rather
/// than a free-form table-name string so every call site is limited to the
/// four collections the index bootstrap actually builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorCollection {
    Nodes,
    Relationships,
    Observations,
    Data,
}

impl VectorCollection {
    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            VectorCollection::Nodes => "vector_nodes",
            VectorCollection::Relationships => "vector_relationships",
            VectorCollection::Observations => "vector_observations",
            VectorCollection::Data => "vector_data",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    #[must_use]
    pub fn new(source_id: String, text: String, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            source_id,
            text,
            embedding,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorMatch {
    pub record: VectorRecord,
    pub distance: f32,
}

/// Inserts an embedding row into the given collection's table.
#[instrument(skip(db, record))]
pub async fn store_vector(
    db: &SurrealDbClient,
    collection: VectorCollection,
    record: VectorRecord,
) -> Result<(), BrainError> {
    let id = record.id.clone();
    db.client
        .create::<Option<VectorRecord>>((collection.table_name(), id))
        .content(record)
        .await?;
    Ok(())
}

/// Approximate k-nearest-neighbor lookup against one collection's HNSW
/// index, using SurrealDB's `<|k,ef|>` KNN operator. The table name comes
/// only from the closed `VectorCollection` enum, never from caller-supplied
/// text, so it is safe to interpolate into the query string.
#[instrument(skip(db, query_embedding))]
pub async fn knn_search(
    db: &SurrealDbClient,
    collection: VectorCollection,
    query_embedding: &[f32],
    k: usize,
    ef: usize,
) -> Result<Vec<VectorMatch>, BrainError> {
    let table = collection.table_name();
    let query = format!(
        "SELECT *, vector::distance::knn() AS distance FROM {table} \
         WHERE embedding <|{k},{ef}|> $query_embedding ORDER BY distance"
    );

    #[derive(Deserialize)]
    struct Row {
        #[serde(flatten)]
        record: VectorRecord,
        distance: f32,
    }

    let mut result = db.client.query(query).bind(("query_embedding", query_embedding.to_vec())).await?;
    let rows: Vec<Row> = result.take(0)?;

    Ok(rows.into_iter().map(|row| VectorMatch { record: row.record, distance: row.distance }).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_match_index_bootstrap() {
        assert_eq!(VectorCollection::Nodes.table_name(), "vector_nodes");
        assert_eq!(VectorCollection::Relationships.table_name(), "vector_relationships");
        assert_eq!(VectorCollection::Observations.table_name(), "vector_observations");
        assert_eq!(VectorCollection::Data.table_name(), "vector_data");
    }
}
