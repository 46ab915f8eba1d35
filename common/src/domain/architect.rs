use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::token_detail::TokenDetail;

/// A single entity the Scout agent found while reading a chunk, already
/// resolved to its graph identity (or marked as new) before being handed to
/// the Architect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRef {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub flow_key: String,
    pub happened_at: Option<DateTime<Utc>>,
}

/// A brand new node the Architect decided to mint, prior to it being
/// persisted as a `Node`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewNode {
    pub uuid: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub reason: String,
    pub properties: Map<String, Value>,
    pub description: String,
}

impl NewNode {
    #[must_use]
    pub fn mint(node_type: String, name: String, reason: String, description: String) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            node_type,
            name,
            reason,
            properties: Map::new(),
            description,
        }
    }
}

/// A candidate edge proposed by the Architect's create-relationship tool,
/// before the Janitor has verified it. `flow_key` is minted fresh per tool
/// call (never reused across calls), mirroring
/// `ArchitectAgentCreateRelationshipTool`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchitectRelationship {
    pub uuid: String,
    pub tail: String,
    pub name: String,
    pub properties: Map<String, Value>,
    pub description: String,
    pub tip: String,
    pub flow_key: String,
}

impl ArchitectRelationship {
    #[must_use]
    pub fn propose(tail: String, name: String, description: String, tip: String) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            tail,
            name,
            properties: Map::new(),
            description,
            tip,
            flow_key: Uuid::new_v4().to_string(),
        }
    }
}

/// The Architect's full response for a single chunk: newly minted nodes plus
/// proposed relationships, carrying its own token usage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchitectResponse {
    pub new_nodes: Vec<NewNode>,
    pub relationships: Vec<ArchitectRelationship>,
    pub token_detail: TokenDetail,
}

/// A relationship the atomic Janitor judged invalid, with the reason and
/// corrective instructions fed back to the Architect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WrongRelationship {
    pub relationship: ArchitectRelationship,
    pub reason: String,
    pub instructions: String,
}

/// Outcome of a single atomic Janitor check: either the relationship passes
/// through unchanged (`Ok`) or comes back with replacements and a rejection
/// list (`Error`), mirroring `AtomicJanitorAgentInputOutput`'s
/// `status: OK|ERROR` discriminant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status")]
pub enum JanitorResult {
    #[serde(rename = "OK")]
    Ok { fixed_relationships: Vec<ArchitectRelationship> },
    #[serde(rename = "ERROR")]
    Error {
        fixed_relationships: Vec<ArchitectRelationship>,
        wrong_relationships: Vec<WrongRelationship>,
    },
}

impl JanitorResult {
    #[must_use]
    pub fn accepted(&self) -> &[ArchitectRelationship] {
        match self {
            JanitorResult::Ok { fixed_relationships } | JanitorResult::Error { fixed_relationships, .. } => {
                fixed_relationships
            }
        }
    }

    #[must_use]
    pub fn rejected(&self) -> &[WrongRelationship] {
        match self {
            JanitorResult::Ok { .. } => &[],
            JanitorResult::Error { wrong_relationships, .. } => wrong_relationships,
        }
    }
}

/// A single repair operation the graph-consolidation KG agent decided to
/// execute over the 2-hop neighborhood snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConsolidationTask {
    MergeNodes { keep: String, discard: String, reason: String },
    DeprecateEdge { edge_id: String, reason: String },
    RenameEdge { edge_id: String, new_name: String },
    UpdateNodeProperties { node_id: String, properties: Map<String, Value> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn janitor_ok_has_no_rejected_relationships() {
        let rel = ArchitectRelationship::propose("a".into(), "KNOWS".into(), String::new(), "b".into());
        let result = JanitorResult::Ok {
            fixed_relationships: vec![rel.clone()],
        };
        assert_eq!(result.accepted(), &[rel]);
        assert!(result.rejected().is_empty());
    }

    #[test]
    fn architect_relationship_mints_a_fresh_flow_key_per_call() {
        let a = ArchitectRelationship::propose("a".into(), "KNOWS".into(), String::new(), "b".into());
        let b = ArchitectRelationship::propose("a".into(), "KNOWS".into(), String::new(), "b".into());
        assert_ne!(a.flow_key, b.flow_key);
    }
}
