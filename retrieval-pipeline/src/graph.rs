use std::collections::HashMap;

use common::domain::node::Node;
use common::error::BrainError;
use common::storage::interfaces::GraphStore;

/// Collects every node reachable from `seed_ids` within `hops` graph steps,
/// deduplicated by node id. Used by graph consolidation to build the
/// neighborhood a co-reference or duplicate-edge pass should consider.
pub async fn neighborhood_snapshot(
    graph: &dyn GraphStore,
    seed_ids: &[String],
    hops: usize,
) -> Result<Vec<Node>, BrainError> {
    let mut seen: HashMap<String, Node> = HashMap::new();
    let mut frontier = Vec::new();

    for id in seed_ids {
        if let Some(node) = graph.get_node(id).await? {
            if !seen.contains_key(&node.id) {
                frontier.push(node.id.clone());
                seen.insert(node.id.clone(), node);
            }
        }
    }

    for _ in 0..hops {
        let mut next_frontier = Vec::new();
        for id in &frontier {
            for neighbor in graph.neighbors(id).await? {
                if !seen.contains_key(&neighbor.id) {
                    next_frontier.push(neighbor.id.clone());
                    seen.insert(neighbor.id.clone(), neighbor);
                }
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    Ok(seen.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::polarity::Polarity;
    use common::domain::predicate::Predicate;
    use common::storage::db::SurrealDbClient;

    #[tokio::test]
    async fn snapshot_includes_seed_and_nodes_within_hop_budget() {
        let db = SurrealDbClient::memory("graph_snapshot_test").await.expect("db");

        let a = Node::new(vec!["PERSON".into()], "A".into(), String::new(), Polarity::Neutral)
            .merge_upsert(&db)
            .await
            .expect("store a");
        let b = Node::new(vec!["PERSON".into()], "B".into(), String::new(), Polarity::Neutral)
            .merge_upsert(&db)
            .await
            .expect("store b");
        let c = Node::new(vec!["PERSON".into()], "C".into(), String::new(), Polarity::Neutral)
            .merge_upsert(&db)
            .await
            .expect("store c");

        Predicate::new(a.id.clone(), b.id.clone(), "KNOWS".into(), String::new(), "f1".into())
            .store(&db)
            .await
            .expect("edge a->b");
        Predicate::new(b.id.clone(), c.id.clone(), "KNOWS".into(), String::new(), "f2".into())
            .store(&db)
            .await
            .expect("edge b->c");

        let one_hop = neighborhood_snapshot(&db, &[a.id.clone()], 1).await.expect("snapshot");
        let ids: Vec<&str> = one_hop.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&a.id.as_str()));
        assert!(ids.contains(&b.id.as_str()));
        assert!(!ids.contains(&c.id.as_str()));

        let two_hop = neighborhood_snapshot(&db, &[a.id.clone()], 2).await.expect("snapshot");
        let ids: Vec<&str> = two_hop.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&c.id.as_str()));
    }
}
