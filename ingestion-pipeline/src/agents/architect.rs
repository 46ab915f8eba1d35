use std::collections::{HashMap, HashSet};

use common::domain::architect::{ArchitectRelationship, EntityRef, NewNode};
use common::domain::node::Node;
use common::domain::token_detail::TokenDetail;
use common::error::BrainError;
use common::storage::interfaces::Llm;
use common::utils::resilience::with_agent_retry;
use serde::Deserialize;
use tracing::{instrument, warn};

use super::janitor::AtomicJanitor;

const SINGLE_SHOT_MAX_ITERATIONS: usize = 3;
const TOOLER_MAX_RECURSION: usize = 100;
const HISTORY_MAX_MESSAGES: usize = 25;
const HISTORY_MAX_MESSAGES_DELETE: usize = 8;

const SYSTEM_PROMPT: &str = "You connect entities into a knowledge graph using the Triangle of \
Attribution: an Initiation edge from the acting subject to an event hub (MADE, COVERED_ROLE, \
EXPERIENCED, ACCOMPLISHED_ACTION, INVITED, OWNS, HELD), a Target edge from the event hub to the \
affected object or recipient (TARGETED, RESULTED_IN, AFFECTED), and a Context edge from the event \
hub to the broader anchor it happened within (OCCURRED_WITHIN, HAPPENED_WITHIN). A quantity \
becomes a property on whichever edge connects to its unit, never a node of its own. Pure fact \
statements without any action get a direct edge between the two entities with no event hub. Mint \
a new node only when the text requires a concept not already in the entity list.";

#[derive(Debug, Clone, Copy)]
pub enum ArchitectMode {
    SingleShot,
    Tooler,
}

#[derive(Debug, Deserialize, Default)]
struct RawNewNode {
    #[serde(rename = "type")]
    node_type: String,
    name: String,
    reason: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawRelationship {
    tail_uuid: String,
    tip_uuid: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize, Default)]
struct SingleShotResponse {
    #[serde(default)]
    new_nodes: Vec<RawNewNode>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
enum ToolCall {
    GetRemainingEntitiesToProcess,
    CreateRelationship {
        #[serde(default)]
        new_nodes: Vec<RawNewNode>,
        #[serde(default)]
        relationships: Vec<RawRelationship>,
    },
    MarkEntitiesAsUsed {
        entity_uuids: Vec<String>,
    },
    CheckUsedEntities,
    /// Not one of the four tools the source exposes; added as the loop's
    /// only clean exit besides hitting the recursion cap.
    Finish,
}

/// Resolved entity pool the dispatch loop and the inline Atomic Janitor
/// consult to answer "is this uuid an Event" and "what's its current name",
/// covering both Scout-supplied entities and nodes the Architect minted
/// mid-loop.
struct EntityPool {
    known: HashMap<String, (String, String)>, // uuid -> (name, entity_type)
}

impl EntityPool {
    fn from_entities(entities: &[EntityRef]) -> Self {
        let known = entities
            .iter()
            .map(|e| (e.uuid.clone(), (e.name.clone(), e.entity_type.clone())))
            .collect();
        Self { known }
    }

    fn absorb_new_node(&mut self, node: &NewNode) {
        self.known.insert(node.uuid.clone(), (node.name.clone(), node.node_type.clone()));
    }

    fn name_of(&self, uuid: &str) -> Option<String> {
        self.known.get(uuid).map(|(name, _)| name.clone())
    }

    fn rename(&mut self, uuid: &str, new_name: String) {
        if let Some(entry) = self.known.get_mut(uuid) {
            entry.0 = new_name;
        }
    }

    fn is_event(&self, uuid: &str) -> bool {
        self.known.get(uuid).is_some_and(|(_, t)| t.eq_ignore_ascii_case("EVENT"))
    }
}

/// Builds the Triangle-of-Attribution edge set over a chunk's extracted
/// entities, grounded on `original_source/src/core/agents/architect_agent.py`'s
/// single-shot and tooler modes.
pub struct ArchitectAgent<'a> {
    llm: &'a dyn Llm,
    retry_attempts: usize,
}

impl<'a> ArchitectAgent<'a> {
    #[must_use]
    pub fn new(llm: &'a dyn Llm, retry_attempts: usize) -> Self {
        Self { llm, retry_attempts }
    }

    #[instrument(skip_all, fields(brain_id, mode = ?mode))]
    pub async fn build(
        &self,
        mode: ArchitectMode,
        text: &str,
        entities: &[EntityRef],
        targeting: Option<&Node>,
        brain_id: &str,
    ) -> Result<(Vec<ArchitectRelationship>, Vec<NewNode>, TokenDetail), BrainError> {
        match mode {
            ArchitectMode::SingleShot => self.build_single_shot(text, entities, targeting, brain_id).await,
            ArchitectMode::Tooler => self.build_tooler(text, entities, targeting, brain_id).await,
        }
    }

    async fn build_single_shot(
        &self,
        text: &str,
        entities: &[EntityRef],
        targeting: Option<&Node>,
        brain_id: &str,
    ) -> Result<(Vec<ArchitectRelationship>, Vec<NewNode>, TokenDetail), BrainError> {
        let mut pool = EntityPool::from_entities(entities);
        let mut pending: Vec<EntityRef> = entities.to_vec();
        let mut relationships_set: Vec<ArchitectRelationship> = Vec::new();
        let mut new_nodes: Vec<NewNode> = Vec::new();
        let mut token_details: Vec<TokenDetail> = Vec::new();

        for _ in 0..SINGLE_SHOT_MAX_ITERATIONS {
            if pending.is_empty() {
                break;
            }

            let prompt = prompt_for_iteration(text, &pending, &relationships_set, targeting);
            let response = with_agent_retry(self.retry_attempts, |attempt| {
                let prompt = prompt.clone();
                async move {
                    let (raw, tokens) = self.llm.complete(SYSTEM_PROMPT, &prompt).await?;
                    let parsed: SingleShotResponse = serde_json::from_str(raw.trim())
                        .map_err(|err| BrainError::LlmParsing(format!("architect attempt {attempt}: {err}")))?;
                    Ok((parsed, tokens))
                }
            })
            .await;

            let Ok((parsed, tokens)) = response else {
                warn!(%brain_id, "architect single-shot iteration exhausted retries, stopping early");
                break;
            };
            token_details.push(tokens);

            for raw_node in parsed.new_nodes {
                let node = NewNode::mint(raw_node.node_type, raw_node.name, raw_node.reason, raw_node.description);
                pool.absorb_new_node(&node);
                new_nodes.push(node);
            }

            let proposed: Vec<ArchitectRelationship> = parsed
                .relationships
                .into_iter()
                .map(|r| ArchitectRelationship::propose(r.tail_uuid, r.name, r.description, r.tip_uuid))
                .collect();

            let outcome = AtomicJanitor::validate(
                proposed,
                |uuid| pool.name_of(uuid),
                |uuid| pool.is_event(uuid),
            );
            for (uuid, cleaned, _) in &outcome.renamed_entities {
                pool.rename(uuid, cleaned.clone());
            }
            relationships_set.extend(outcome.result.accepted().iter().cloned());

            let used: HashSet<&str> =
                relationships_set.iter().flat_map(|r| [r.tail.as_str(), r.tip.as_str()]).collect();
            pending.retain(|e| !used.contains(e.uuid.as_str()));
        }

        Ok((relationships_set, new_nodes, TokenDetail::merge(&token_details)))
    }

    async fn build_tooler(
        &self,
        text: &str,
        entities: &[EntityRef],
        targeting: Option<&Node>,
        brain_id: &str,
    ) -> Result<(Vec<ArchitectRelationship>, Vec<NewNode>, TokenDetail), BrainError> {
        let mut pool = EntityPool::from_entities(entities);
        let mut pending_entities: Vec<EntityRef> = entities.to_vec();
        let mut used_entities: Vec<String> = Vec::new();
        let mut relationships_set: Vec<ArchitectRelationship> = Vec::new();
        let mut new_nodes: Vec<NewNode> = Vec::new();
        let mut token_details: Vec<TokenDetail> = Vec::new();
        let mut message_history: Vec<String> = vec![format!(
            "Targeting: {}\n\nText:\n{text}",
            targeting.map_or_else(|| "none".to_string(), |n| n.name.clone())
        )];

        for _ in 0..TOOLER_MAX_RECURSION {
            let prompt = message_history.join("\n---\n");
            let response = with_agent_retry(self.retry_attempts, |attempt| {
                let prompt = prompt.clone();
                async move {
                    let (raw, tokens) = self.llm.complete(SYSTEM_PROMPT, &prompt).await?;
                    let parsed: ToolCall = serde_json::from_str(raw.trim())
                        .map_err(|err| BrainError::LlmParsing(format!("architect tool turn {attempt}: {err}")))?;
                    Ok((parsed, tokens))
                }
            })
            .await;

            let Ok((tool_call, tokens)) = response else {
                warn!(%brain_id, "architect tooler loop exhausted retries, stopping early");
                break;
            };
            token_details.push(tokens);

            let stop = match tool_call {
                ToolCall::GetRemainingEntitiesToProcess => {
                    let names: Vec<&str> = pending_entities.iter().map(|e| e.name.as_str()).collect();
                    message_history.push(format!("remaining_entities: {names:?}"));
                    false
                }
                ToolCall::CreateRelationship { new_nodes: raw_new_nodes, relationships } => {
                    for raw_node in raw_new_nodes {
                        let node = NewNode::mint(raw_node.node_type, raw_node.name, raw_node.reason, raw_node.description);
                        pool.absorb_new_node(&node);
                        new_nodes.push(node);
                    }
                    let proposed: Vec<ArchitectRelationship> = relationships
                        .into_iter()
                        .map(|r| ArchitectRelationship::propose(r.tail_uuid, r.name, r.description, r.tip_uuid))
                        .collect();
                    let outcome = AtomicJanitor::validate(
                        proposed,
                        |uuid| pool.name_of(uuid),
                        |uuid| pool.is_event(uuid),
                    );
                    for (uuid, cleaned, _) in &outcome.renamed_entities {
                        pool.rename(uuid, cleaned.clone());
                    }
                    let accepted_count = outcome.result.accepted().len();
                    relationships_set.extend(outcome.result.accepted().iter().cloned());
                    message_history.push(format!("create_relationship accepted {accepted_count} edges"));
                    false
                }
                ToolCall::MarkEntitiesAsUsed { entity_uuids } => {
                    pending_entities.retain(|e| !entity_uuids.contains(&e.uuid));
                    used_entities.extend(entity_uuids);
                    message_history.push("entities marked used".to_string());
                    false
                }
                ToolCall::CheckUsedEntities => {
                    message_history.push(format!("used_entities: {used_entities:?}"));
                    false
                }
                ToolCall::Finish => true,
            };

            if message_history.len() > HISTORY_MAX_MESSAGES {
                message_history.drain(0..HISTORY_MAX_MESSAGES_DELETE);
            }

            if stop || pending_entities.is_empty() {
                break;
            }
        }

        Ok((relationships_set, new_nodes, TokenDetail::merge(&token_details)))
    }
}

fn prompt_for_iteration(
    text: &str,
    pending: &[EntityRef],
    prior_relationships: &[ArchitectRelationship],
    targeting: Option<&Node>,
) -> String {
    let pending_names: Vec<&str> = pending.iter().map(|e| e.name.as_str()).collect();
    format!(
        "Targeting: {}\n\nText:\n{text}\n\nStill unconnected entities: {pending_names:?}\n\nAlready built edges: {}",
        targeting.map_or_else(|| "none".to_string(), |n| n.name.clone()),
        prior_relationships.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::domain::token_detail::TokenDetail as TD;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedLlm {
        responses: Vec<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Llm for ScriptedLlm {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<(String, TD), BrainError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.responses.get(idx).cloned().unwrap_or_else(|| "{}".to_string());
            Ok((response, TD::from_counts(20, 10, 0, 0)))
        }
    }

    fn entity(uuid: &str, name: &str, entity_type: &str) -> EntityRef {
        EntityRef {
            uuid: uuid.to_string(),
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            flow_key: "flow".to_string(),
            happened_at: None,
        }
    }

    #[tokio::test]
    async fn single_shot_builds_triangle_edges_and_drains_pending_entities() {
        let response = serde_json::json!({
            "new_nodes": [],
            "relationships": [
                {"tail_uuid": "john", "tip_uuid": "knew", "name": "MADE", "description": ""},
                {"tail_uuid": "knew", "tip_uuid": "friends", "name": "TARGETED", "description": ""}
            ]
        })
        .to_string();
        let llm = ScriptedLlm { responses: vec![response], calls: AtomicUsize::new(0) };
        let architect = ArchitectAgent::new(&llm, 3);
        let entities = vec![
            entity("john", "John", "PERSON"),
            entity("knew", "KNEW", "EVENT"),
            entity("friends", "Friends", "UNIT"),
        ];

        let (relationships, _new_nodes, tokens) = architect
            .build(ArchitectMode::SingleShot, "John knew friends.", &entities, None, "brain-1")
            .await
            .expect("build");

        assert_eq!(relationships.len(), 2);
        assert!(tokens.grand_total > 0);
    }

    #[tokio::test]
    async fn single_shot_stops_after_max_iterations_without_looping_forever() {
        let stalled = serde_json::json!({"new_nodes": [], "relationships": []}).to_string();
        let llm = ScriptedLlm {
            responses: vec![stalled.clone(), stalled.clone(), stalled],
            calls: AtomicUsize::new(0),
        };
        let architect = ArchitectAgent::new(&llm, 1);
        let entities = vec![entity("a", "A", "PERSON")];

        let (relationships, _new_nodes, _tokens) = architect
            .build(ArchitectMode::SingleShot, "text", &entities, None, "brain-1")
            .await
            .expect("build");

        assert!(relationships.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), SINGLE_SHOT_MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn tooler_mode_finishes_on_explicit_finish_tool_call() {
        let responses = vec![
            serde_json::json!({"tool": "mark_entities_as_used", "entity_uuids": ["a"]}).to_string(),
            serde_json::json!({"tool": "finish"}).to_string(),
        ];
        let llm = ScriptedLlm { responses, calls: AtomicUsize::new(0) };
        let architect = ArchitectAgent::new(&llm, 1);
        let entities = vec![entity("a", "A", "PERSON")];

        let (relationships, _new_nodes, _tokens) = architect
            .build(ArchitectMode::Tooler, "text", &entities, None, "brain-1")
            .await
            .expect("build");

        assert!(relationships.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn entity_pool_reports_event_type_case_insensitively() {
        let pool = EntityPool::from_entities(&[entity("e", "KNEW", "event")]);
        assert!(pool.is_event("e"));
        assert!(!pool.is_event("missing"));
    }
}
