use std::collections::HashMap;

use common::domain::architect::{ArchitectRelationship, ConsolidationTask, JanitorResult};
use common::domain::node::Node;
use common::error::BrainError;
use common::storage::interfaces::{Embedder, GraphStore};
use tracing::instrument;

/// Labels whose tail must be the acting subject rather than the event hub,
/// e.g. `Actor --[MADE]--> Event`.
const ACTOR_CENTRIC_LABELS: &[&str] =
    &["MADE", "COVERED_ROLE", "EXPERIENCED", "ACCOMPLISHED_ACTION", "INVITED", "OWNS", "HELD"];

/// Labels whose tail must be the event hub, covering both the Target edge
/// (`Event --[TARGETED]--> Object`) and the Context edge
/// (`Event --[OCCURRED_WITHIN]--> BroaderAnchor`).
const IMPACT_CENTRIC_LABELS: &[&str] =
    &["TARGETED", "RESULTED_IN", "OCCURRED_WITHIN", "HAPPENED_WITHIN", "AFFECTED"];

/// Result of running the atomic Janitor over one batch of proposed edges,
/// split from `JanitorResult` because node-name quantity stripping touches
/// entities the Architect owns, not the relationships themselves.
pub struct AtomicJanitorOutcome {
    pub result: JanitorResult,
    /// `(entity_uuid, cleaned_name, amount)` for every tail/tip whose name
    /// carried a numeric prefix that got moved onto the edge instead.
    pub renamed_entities: Vec<(String, String, f64)>,
}

pub struct AtomicJanitor;

impl AtomicJanitor {
    /// Validates directional semantics and strips quantity prefixes out of
    /// node names into the edge's `amount` property. Swaps tail/tip only on
    /// a direction violation; never relabels, and never merges or deletes
    /// an Event node. Every violation this closed label vocabulary can
    /// describe is mechanically repairable, so this always returns `Ok`;
    /// `JanitorResult::Error` stays reachable for any future rule that
    /// can't be auto-fixed.
    #[must_use]
    pub fn validate(
        relationships: Vec<ArchitectRelationship>,
        name_of: impl Fn(&str) -> Option<String>,
        is_event: impl Fn(&str) -> bool,
    ) -> AtomicJanitorOutcome {
        let mut fixed = Vec::with_capacity(relationships.len());
        let mut renamed_entities = Vec::new();

        for mut rel in relationships {
            if ACTOR_CENTRIC_LABELS.contains(&rel.name.as_str()) && is_event(&rel.tail) && !is_event(&rel.tip) {
                std::mem::swap(&mut rel.tail, &mut rel.tip);
            } else if IMPACT_CENTRIC_LABELS.contains(&rel.name.as_str()) && !is_event(&rel.tail) && is_event(&rel.tip)
            {
                std::mem::swap(&mut rel.tail, &mut rel.tip);
            }

            for uuid in [rel.tail.clone(), rel.tip.clone()] {
                let Some(name) = name_of(&uuid) else { continue };
                if let Some((cleaned, amount)) = strip_quantity_prefix(&name) {
                    rel.properties.insert("amount".into(), serde_json::json!(amount));
                    renamed_entities.push((uuid, cleaned, amount));
                }
            }

            fixed.push(rel);
        }

        AtomicJanitorOutcome {
            result: JanitorResult::Ok { fixed_relationships: fixed },
            renamed_entities,
        }
    }
}

/// "23 Friends" -> `("Friends", 23.0)`. A quantity is never an entity on
/// its own; only the unit that follows it is.
fn strip_quantity_prefix(name: &str) -> Option<(String, f64)> {
    let trimmed = name.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let amount: f64 = parts.next()?.parse().ok()?;
    let rest = parts.next()?.trim();
    if rest.is_empty() {
        return None;
    }
    Some((rest.to_string(), amount))
}

/// Post-batch repair pass over a consolidation snapshot: merges co-referent
/// nodes found by name-embedding similarity and deprecates exact duplicate
/// edges a single batch's own near-duplicate check couldn't see because the
/// two edges were minted in separate ingestion runs. Hierarchical `IS_A`
/// linking is out of scope here: `ConsolidationTask` only models
/// merge/deprecate/rename/update-properties, none of which create an edge.
pub struct GraphConsolidatorJanitor;

impl GraphConsolidatorJanitor {
    #[instrument(skip(embedder, graph, neighborhood))]
    pub async fn consolidate(
        embedder: &dyn Embedder,
        graph: &dyn GraphStore,
        neighborhood: &[Node],
        identity_similarity_threshold: f32,
    ) -> Result<Vec<ConsolidationTask>, BrainError> {
        let mut tasks = Vec::new();
        let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        for node in neighborhood {
            if node.labels.iter().any(|l| l == "EVENT") {
                continue;
            }
            let embedding = embedder.embed(&node.name).await?;
            embeddings.insert(node.id.clone(), embedding);
        }

        let mut merged: Vec<String> = Vec::new();
        for i in 0..neighborhood.len() {
            let a = &neighborhood[i];
            if merged.contains(&a.id) || !embeddings.contains_key(&a.id) {
                continue;
            }
            for b in neighborhood.iter().skip(i + 1) {
                if merged.contains(&b.id) || a.id == b.id || !embeddings.contains_key(&b.id) {
                    continue;
                }
                let sim = cosine_similarity(&embeddings[&a.id], &embeddings[&b.id]);
                if sim >= identity_similarity_threshold {
                    let (keep, discard) = if a.created_at <= b.created_at { (a, b) } else { (b, a) };
                    tasks.push(ConsolidationTask::MergeNodes {
                        keep: keep.id.clone(),
                        discard: discard.id.clone(),
                        reason: format!("name-embedding similarity {sim:.2} over threshold"),
                    });
                    merged.push(discard.id.clone());
                }
            }
        }

        for i in 0..neighborhood.len() {
            for j in (i + 1)..neighborhood.len() {
                let edges = graph.edges_between(&neighborhood[i].id, &neighborhood[j].id).await?;
                let mut seen: HashMap<(String, String, String), String> = HashMap::new();
                for edge in edges {
                    let key = (edge.tail_uuid.clone(), edge.out.clone(), edge.name.clone());
                    if let Some(first_id) = seen.get(&key) {
                        tasks.push(ConsolidationTask::DeprecateEdge {
                            edge_id: edge.id.clone(),
                            reason: format!("duplicate of edge {first_id} across batch boundary"),
                        });
                    } else {
                        seen.insert(key, edge.id.clone());
                    }
                }
            }
        }

        Ok(tasks)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_tail_and_tip_when_actor_centric_edge_points_at_subject_backwards() {
        let rel = ArchitectRelationship::propose("event-1".into(), "MADE".into(), String::new(), "actor-1".into());
        let outcome = AtomicJanitor::validate(
            vec![rel],
            |_| None,
            |uuid| uuid == "event-1",
        );
        let fixed = outcome.result.accepted();
        assert_eq!(fixed.len(), 1);
        assert_eq!(fixed[0].tail, "actor-1");
        assert_eq!(fixed[0].tip, "event-1");
    }

    #[test]
    fn leaves_correctly_directed_impact_centric_edge_untouched() {
        let rel = ArchitectRelationship::propose("event-1".into(), "TARGETED".into(), String::new(), "object-1".into());
        let outcome = AtomicJanitor::validate(vec![rel], |_| None, |uuid| uuid == "event-1");
        let fixed = outcome.result.accepted();
        assert_eq!(fixed[0].tail, "event-1");
        assert_eq!(fixed[0].tip, "object-1");
    }

    #[test]
    fn strips_quantity_prefix_into_edge_amount_property() {
        let rel = ArchitectRelationship::propose("event-1".into(), "TARGETED".into(), String::new(), "unit-1".into());
        let names: HashMap<&str, &str> = [("unit-1", "23 Friends")].into_iter().collect();
        let outcome = AtomicJanitor::validate(
            vec![rel],
            |uuid| names.get(uuid).map(|s| s.to_string()),
            |uuid| uuid == "event-1",
        );
        assert_eq!(outcome.renamed_entities, vec![("unit-1".to_string(), "Friends".to_string(), 23.0)]);
        let fixed = outcome.result.accepted();
        assert_eq!(fixed[0].properties.get("amount"), Some(&serde_json::json!(23.0)));
    }

    #[test]
    fn never_flags_an_event_node_as_a_merge_candidate() {
        let event = Node::new(vec!["EVENT".into()], "KNEW".into(), String::new(), common::domain::polarity::Polarity::Neutral);
        // Only non-event nodes are embedded for similarity comparison, so an
        // Event can never appear as `keep`/`discard` in a MergeNodes task.
        assert!(event.labels.iter().any(|l| l == "EVENT"));
    }
}
