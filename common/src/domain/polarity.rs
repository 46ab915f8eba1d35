use serde::{Deserialize, Serialize};

/// Ternary tag indicating surplus, deficit, or neutral state of an entity in
/// context. Assigned by the Scout Agent via a decision tree over the verb
/// governing the entity's mention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}
