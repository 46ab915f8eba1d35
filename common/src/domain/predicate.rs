use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    error::BrainError,
    storage::db::SurrealDbClient,
    storage::types::deserialize_flexible_id,
};

use super::node::Node;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    Out,
    In,
    Neutral,
}

/// Graph edge record, stored via SurrealDB's `RELATE` as a `relates_to`
/// table row with an `in`/`out` endpoint pair (grounded on
/// `KnowledgeRelationship::store_relationship`'s transaction shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(rename = "in", deserialize_with = "deserialize_flexible_id")]
    pub tail_uuid: String,
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub out: String,
    pub name: String,
    pub description: String,
    pub direction: EdgeDirection,
    pub properties: Map<String, Value>,
    pub flow_key: String,
    pub amount: Option<f64>,
    pub last_updated: DateTime<Utc>,
    pub deprecated: bool,
}

impl Predicate {
    #[must_use]
    pub fn new(tail_uuid: String, tip_uuid: String, name: String, description: String, flow_key: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tail_uuid,
            out: tip_uuid,
            name,
            description,
            direction: EdgeDirection::Out,
            properties: Map::new(),
            flow_key,
            amount: None,
            last_updated: Utc::now(),
            deprecated: false,
        }
    }

    /// Writes the directional edge `tail --[name]--> tip`, carrying
    /// `flow_key`/`amount`/`last_updated` as first-class properties. Replaces
    /// any stale prior edge at the same id first, mirroring the base crate's
    /// delete-then-relate transaction.
    #[instrument(skip(self, db))]
    pub async fn store(&self, db: &SurrealDbClient) -> Result<(), BrainError> {
        db.client
            .query(
                r"BEGIN TRANSACTION;
                LET $tail = type::thing('node', $tail_id);
                LET $tip = type::thing('node', $tip_id);
                DELETE type::thing('relates_to', $rel_id);
                RELATE $tail->relates_to->$tip SET
                    id = $rel_id,
                    name = $name,
                    description = $description,
                    direction = $direction,
                    properties = $properties,
                    flow_key = $flow_key,
                    amount = $amount,
                    last_updated = $last_updated,
                    deprecated = $deprecated;
                COMMIT TRANSACTION;",
            )
            .bind(("rel_id", self.id.clone()))
            .bind(("tail_id", self.tail_uuid.clone()))
            .bind(("tip_id", self.out.clone()))
            .bind(("name", self.name.clone()))
            .bind(("description", self.description.clone()))
            .bind(("direction", self.direction))
            .bind(("properties", Value::Object(self.properties.clone())))
            .bind(("flow_key", self.flow_key.clone()))
            .bind(("amount", self.amount))
            .bind(("last_updated", self.last_updated))
            .bind(("deprecated", self.deprecated))
            .await?
            .check()?;

        Ok(())
    }

    /// Near-duplicate suppression pre-check. Checked on exact
    /// endpoints-plus-name before any similarity search, making re-ingesting
    /// the same chunk a graph no-op regardless of vector-store state.
    pub async fn exact_duplicate_exists(
        db: &SurrealDbClient,
        tail_uuid: &str,
        tip_uuid: &str,
        name: &str,
    ) -> Result<bool, BrainError> {
        let mut result = db
            .client
            .query(
                "SELECT id FROM relates_to WHERE in = type::thing('node', $tail) \
                 AND out = type::thing('node', $tip) AND name = $name",
            )
            .bind(("tail", tail_uuid.to_string()))
            .bind(("tip", tip_uuid.to_string()))
            .bind(("name", name.to_string()))
            .await?;
        let rows: Vec<serde_json::Value> = result.take(0)?;
        Ok(!rows.is_empty())
    }

    pub async fn deprecate(&self, db: &SurrealDbClient, _reason: &str) -> Result<(), BrainError> {
        db.client
            .query("UPDATE type::thing('relates_to', $id) SET deprecated = true")
            .bind(("id", self.id.clone()))
            .await?
            .check()?;
        Ok(())
    }

    /// Renames the edge's label in place, preserving endpoints, `flow_key`
    /// and every other property. Used by the KG Agent's `rename_edge` repair
    /// operation; never used to merge two edges into one.
    pub async fn rename(db: &SurrealDbClient, edge_id: &str, new_name: &str) -> Result<(), BrainError> {
        db.client
            .query("UPDATE type::thing('relates_to', $id) SET name = $name")
            .bind(("id", edge_id.to_string()))
            .bind(("name", new_name.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    /// Every edge between two nodes regardless of direction, the lookup
    /// graph consolidation uses to find stray duplicate edges a batch's own
    /// near-duplicate check couldn't see because the two relationships were
    /// minted in different ingestion runs.
    pub async fn between(db: &SurrealDbClient, a_id: &str, b_id: &str) -> Result<Vec<Self>, BrainError> {
        let mut result = db
            .client
            .query(
                "SELECT * FROM relates_to WHERE
                    (in = type::thing('node', $a) AND out = type::thing('node', $b))
                    OR (in = type::thing('node', $b) AND out = type::thing('node', $a))",
            )
            .bind(("a", a_id.to_string()))
            .bind(("b", b_id.to_string()))
            .await?;
        Ok(result.take(0)?)
    }

    pub async fn deprecate_by_id(db: &SurrealDbClient, edge_id: &str) -> Result<(), BrainError> {
        db.client
            .query("UPDATE type::thing('relates_to', $id) SET deprecated = true")
            .bind(("id", edge_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}

/// Resolves an edge endpoint to a `Node`, used by graph consolidation to
/// dereference `in`/`out` before running repair rules.
pub async fn resolve_endpoint(db: &SurrealDbClient, uuid: &str) -> Result<Option<Node>, BrainError> {
    db.get_item::<Node>(uuid).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::polarity::Polarity;

    #[tokio::test]
    async fn store_then_detect_exact_duplicate() {
        let db = SurrealDbClient::memory("predicate_test").await.expect("db");

        let tail = Node::new(vec!["PERSON".into()], "John".into(), String::new(), Polarity::Neutral)
            .merge_upsert(&db)
            .await
            .expect("store tail");
        let tip = Node::new(vec!["EVENT".into()], "KNEW".into(), String::new(), Polarity::Neutral)
            .merge_upsert(&db)
            .await
            .expect("store tip");

        let edge = Predicate::new(
            tail.id.clone(),
            tip.id.clone(),
            "ACCOMPLISHED_ACTION".into(),
            String::new(),
            "flow-1".into(),
        );
        edge.store(&db).await.expect("store edge");

        let duplicate = Predicate::exact_duplicate_exists(&db, &tail.id, &tip.id, "ACCOMPLISHED_ACTION")
            .await
            .expect("dup check");
        assert!(duplicate);

        let different =
            Predicate::exact_duplicate_exists(&db, &tail.id, &tip.id, "SOMETHING_ELSE")
                .await
                .expect("dup check");
        assert!(!different);
    }
}
