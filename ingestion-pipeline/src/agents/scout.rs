use common::domain::node::Node;
use common::domain::scout_entity::ScoutEntity;
use common::domain::token_detail::TokenDetail;
use common::error::BrainError;
use common::storage::interfaces::Llm;
use common::utils::resilience::with_agent_retry;
use serde::Deserialize;
use tracing::{instrument, warn};

const SYSTEM_PROMPT: &str = "You decompose text into atomic entities for a knowledge graph. \
Follow three rules: static attributes (ids, emails, single-owner descriptions) are never \
entities; shared dimensions (currencies, cities, roles, units) are standalone entities; \
quantities are never entities, the number becomes a relationship property and only the unit \
is an entity. Tag every entity with a polarity: deficit verbs are negative, \
achievement/possession verbs are positive, pure location/movement facts are neutral. Dates \
normalize to DD/MM/YYYY and land in an event node's `happened_at`. Respond with a JSON array \
of objects {name, type, polarity, context, happened_at} and nothing else.";

#[derive(Debug, Deserialize)]
struct RawScoutEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    polarity: common::domain::polarity::Polarity,
    context: String,
    #[serde(default)]
    happened_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Turns free text into a flat list of atomic entities, grounded on
/// `original_source/src/core/agents/scout_agent.py`'s `extract` contract.
pub struct ScoutAgent<'a> {
    llm: &'a dyn Llm,
    retry_attempts: usize,
}

impl<'a> ScoutAgent<'a> {
    #[must_use]
    pub fn new(llm: &'a dyn Llm, retry_attempts: usize) -> Self {
        Self { llm, retry_attempts }
    }

    #[instrument(skip_all, fields(brain_id))]
    pub async fn extract(
        &self,
        text: &str,
        targeting: Option<&Node>,
        brain_id: &str,
    ) -> Result<(Vec<ScoutEntity>, TokenDetail), BrainError> {
        if text.trim().is_empty() {
            return Ok((Vec::new(), TokenDetail::zero()));
        }

        let user_prompt = match targeting {
            Some(node) => format!("Targeting node: {} ({:?})\n\nText:\n{text}", node.name, node.labels),
            None => format!("Text:\n{text}"),
        };

        let result = with_agent_retry(self.retry_attempts, |attempt| {
            let user_prompt = user_prompt.clone();
            async move {
                let (raw, tokens) = self.llm.complete(SYSTEM_PROMPT, &user_prompt).await?;
                let parsed: Vec<RawScoutEntity> = serde_json::from_str(raw.trim())
                    .map_err(|err| BrainError::LlmParsing(format!("scout attempt {attempt}: {err}")))?;
                Ok((parsed, tokens))
            }
        })
        .await;

        match result {
            Ok((parsed, tokens)) => {
                let entities = parsed
                    .into_iter()
                    .filter(|e| !e.name.trim().is_empty())
                    .map(|e| {
                        let mut entity = ScoutEntity::new(e.name, e.entity_type, e.polarity, e.context);
                        entity.happened_at = e.happened_at;
                        entity
                    })
                    .collect();
                Ok((entities, tokens))
            }
            Err(err) => {
                warn!(%brain_id, error = %err, "scout extraction exhausted retries, returning empty result");
                Ok((Vec::new(), TokenDetail::zero()))
            }
        }
    }
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
            let response = self.responses.get(idx).cloned().unwrap_or_default();
            Ok((response, TD::from_counts(10, 5, 0, 0)))
        }
    }

    #[tokio::test]
    async fn extract_returns_empty_entities_for_empty_text() {
        let llm = ScriptedLlm { responses: vec![], calls: AtomicUsize::new(0) };
        let scout = ScoutAgent::new(&llm, 5);
        let (entities, tokens) = scout.extract("", None, "brain-1").await.expect("extract");
        assert!(entities.is_empty());
        assert_eq!(tokens.grand_total, 0);
    }

    #[tokio::test]
    async fn extract_parses_entities_and_drops_quantity_nodes() {
        let llm = ScriptedLlm {
            responses: vec![serde_json::json!([
                {"name": "John", "type": "PERSON", "polarity": "neutral", "context": "subject"},
                {"name": "KNEW", "type": "EVENT", "polarity": "positive", "context": "action"},
                {"name": "Friends", "type": "UNIT", "polarity": "neutral", "context": "count unit"},
                {"name": "New York City", "type": "CITY", "polarity": "neutral", "context": "location"}
            ])
            .to_string()],
            calls: AtomicUsize::new(0),
        };
        let scout = ScoutAgent::new(&llm, 5);
        let (entities, _) = scout
            .extract("John knew 12 new friends in New York City.", None, "brain-1")
            .await
            .expect("extract");

        assert_eq!(entities.len(), 4);
        assert!(entities.iter().all(|e| !e.name.trim().is_empty()));
        assert!(!entities.iter().any(|e| e.name == "12"));
    }

    #[tokio::test]
    async fn extract_retries_malformed_json_and_eventually_returns_empty() {
        let llm = ScriptedLlm {
            responses: vec!["not json".into(), "still not json".into(), "nope".into()],
            calls: AtomicUsize::new(0),
        };
        let scout = ScoutAgent::new(&llm, 3);
        let (entities, tokens) = scout.extract("some text", None, "brain-1").await.expect("extract");
        assert!(entities.is_empty());
        assert_eq!(tokens.grand_total, 0);
    }
}
