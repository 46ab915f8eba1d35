use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    error::BrainError,
    storage::db::SurrealDbClient,
    storage::types::StoredObject,
    stored_object,
};

use super::polarity::Polarity;

stored_object!(Node, "node", {
    labels: Vec<String>,
    name: String,
    description: String,
    properties: Map<String, Value>,
    polarity: Polarity
});

impl Node {
    #[must_use]
    pub fn new(labels: Vec<String>, name: String, description: String, polarity: Polarity) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            labels,
            name,
            description,
            properties: Map::new(),
            polarity,
        }
    }

    /// Secondary identity used for MERGE-like upserts: `(name, sorted labels)`.
    #[must_use]
    pub fn identity_key(&self) -> (String, Vec<String>) {
        let mut labels = self.labels.clone();
        labels.sort();
        (self.name.clone(), labels)
    }

    /// Looks a node up by its secondary identity `(name, labels)` within a
    /// brain's graph. Used by the IngestionManager before minting a new node.
    #[instrument(skip(db))]
    pub async fn find_by_identity(
        db: &SurrealDbClient,
        name: &str,
        labels: &[String],
    ) -> Result<Option<Self>, BrainError> {
        let mut result = db
            .client
            .query("SELECT * FROM node WHERE name = $name AND labels CONTAINSALL $labels")
            .bind(("name", name.to_string()))
            .bind(("labels", labels.to_vec()))
            .await?;
        let nodes: Vec<Self> = result.take(0)?;
        Ok(nodes.into_iter().next())
    }

    /// MERGE-upserts a node by `(name, labels)` identity: returns the
    /// existing node unchanged if found, otherwise stores and returns `self`.
    #[instrument(skip(db, self))]
    pub async fn merge_upsert(self, db: &SurrealDbClient) -> Result<Self, BrainError> {
        if let Some(existing) = Self::find_by_identity(db, &self.name, &self.labels).await? {
            return Ok(existing);
        }
        let stored = db.store_item(self).await?;
        stored.ok_or_else(|| BrainError::Internal("node upsert returned nothing".into()))
    }

    /// Rewrites every `relates_to` edge pointing at `absorbed` to point at
    /// `survivor` instead, then deletes the absorbed node. Used by graph
    /// consolidation's co-reference merge; never applied to Event nodes,
    /// which are instance-unique and therefore never a merge candidate.
    #[instrument(skip(db))]
    pub async fn merge_into(db: &SurrealDbClient, survivor_id: &str, absorbed_id: &str) -> Result<(), BrainError> {
        db.client
            .query(
                r"BEGIN TRANSACTION;
                UPDATE relates_to SET in = type::thing('node', $survivor) WHERE in = type::thing('node', $absorbed);
                UPDATE relates_to SET out = type::thing('node', $survivor) WHERE out = type::thing('node', $absorbed);
                DELETE type::thing('node', $absorbed);
                COMMIT TRANSACTION;",
            )
            .bind(("survivor", survivor_id.to_string()))
            .bind(("absorbed", absorbed_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    #[instrument(skip(db))]
    pub async fn update_properties(
        db: &SurrealDbClient,
        node_id: &str,
        set: Map<String, Value>,
        unset: &[String],
    ) -> Result<(), BrainError> {
        db.client
            .query("UPDATE type::thing('node', $id) MERGE $set")
            .bind(("id", node_id.to_string()))
            .bind(("set", Value::Object(set)))
            .await?
            .check()?;
        for key in unset {
            db.client
                .query("UPDATE type::thing('node', $id) UNSET properties.$key")
                .bind(("id", node_id.to_string()))
                .bind(("key", key.clone()))
                .await?
                .check()?;
        }
        Ok(())
    }

    #[instrument(skip(db))]
    pub async fn delete(db: &SurrealDbClient, node_id: &str) -> Result<(), BrainError> {
        db.client
            .query("DELETE type::thing('node', $id)")
            .bind(("id", node_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    /// One-hop neighbor fetch, the building block the 2-hop consolidation
    /// snapshot calls twice.
    #[instrument(skip(db))]
    pub async fn neighbors(db: &SurrealDbClient, node_id: &str) -> Result<Vec<Self>, BrainError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM node WHERE id IN (
                    SELECT VALUE out FROM relates_to WHERE in = type::thing('node', $id)
                    UNION
                    SELECT VALUE in FROM relates_to WHERE out = type::thing('node', $id)
                )",
            )
            .bind(("id", node_id.to_string()))
            .await?;
        Ok(result.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_upsert_is_idempotent_by_identity() {
        let db = SurrealDbClient::memory("node_test").await.expect("db");

        let a = Node::new(
            vec!["PERSON".into()],
            "John".into(),
            String::new(),
            Polarity::Neutral,
        );
        let stored_a = a.clone().merge_upsert(&db).await.expect("first upsert");

        let b = Node::new(
            vec!["PERSON".into()],
            "John".into(),
            "duplicate insert".into(),
            Polarity::Neutral,
        );
        let stored_b = b.merge_upsert(&db).await.expect("second upsert");

        assert_eq!(stored_a.id, stored_b.id);
        let all: Vec<Node> = db.get_all_stored_items().await.expect("list");
        assert_eq!(all.len(), 1);
    }
}
