use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::polarity::Polarity;

/// An entity mention as the Scout agent extracts it from a chunk, before the
/// Architect resolves it against the graph. Not a
/// `StoredObject`: these are ephemeral, scoped to a single ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoutEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub polarity: Polarity,
    pub happened_at: Option<DateTime<Utc>>,
    pub context: String,
}

impl ScoutEntity {
    #[must_use]
    pub fn new(name: String, entity_type: String, polarity: Polarity, context: String) -> Self {
        Self {
            name,
            entity_type,
            polarity,
            happened_at: None,
            context,
        }
    }
}
