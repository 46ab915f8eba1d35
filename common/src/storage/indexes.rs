use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{error::BrainError, storage::db::SurrealDbClient};

/// Reference-deployment vector dimension. Overridable per brain via `AppConfig::embedding_dimensions`.
pub const DEFAULT_VECTOR_DIMENSION: usize = 3072;

const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FTS_ANALYZER_NAME: &str = "brain_en_fts_analyzer";

#[derive(Clone, Copy)]
struct HnswIndexSpec {
    index_name: &'static str,
    table: &'static str,
    options: &'static str,
}

/// One HNSW index per named vector collection (`nodes`, `relationships`, `observations`, `data`).
const fn hnsw_index_specs() -> [HnswIndexSpec; 4] {
    const OPTS: &str = "DIST COSINE TYPE F32 EFC 100 M 8 CONCURRENTLY";
    [
        HnswIndexSpec {
            index_name: "idx_embedding_vector_nodes",
            table: "vector_nodes",
            options: OPTS,
        },
        HnswIndexSpec {
            index_name: "idx_embedding_vector_relationships",
            table: "vector_relationships",
            options: OPTS,
        },
        HnswIndexSpec {
            index_name: "idx_embedding_vector_observations",
            table: "vector_observations",
            options: OPTS,
        },
        HnswIndexSpec {
            index_name: "idx_embedding_vector_data",
            table: "vector_data",
            options: OPTS,
        },
    ]
}

const fn fts_index_specs() -> [FtsIndexSpec; 4] {
    [
        FtsIndexSpec {
            index_name: "node_fts_name_idx",
            table: "node",
            field: "name",
            method: "BM25",
        },
        FtsIndexSpec {
            index_name: "node_fts_description_idx",
            table: "node",
            field: "description",
            method: "BM25",
        },
        FtsIndexSpec {
            index_name: "text_chunk_fts_chunk_idx",
            table: "text_chunk",
            field: "chunk",
            method: "BM25",
        },
        FtsIndexSpec {
            index_name: "observation_fts_text_idx",
            table: "observation",
            field: "text",
            method: "BM25",
        },
    ]
}

impl HnswIndexSpec {
    fn definition_if_not_exists(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
            options = self.options,
        )
    }

    fn definition_overwrite(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX OVERWRITE {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
            options = self.options,
        )
    }
}

#[derive(Clone, Copy)]
struct FtsIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
    method: &'static str,
}

impl FtsIndexSpec {
    fn definition(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} FIELDS {field} \
             SEARCH ANALYZER {analyzer} {method} CONCURRENTLY;",
            index = self.index_name,
            table = self.table,
            field = self.field,
            analyzer = FTS_ANALYZER_NAME,
            method = self.method,
        )
    }
}

/// Builds runtime Surreal indexes (FTS + HNSW) for a brain's database, with
/// readiness polling. Idempotent: safe to call on every worker boot, and
/// will overwrite HNSW definitions when the embedding dimension changes
/// (e.g. after a deployment-wide embedding model migration).
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), BrainError> {
    ensure_runtime_indexes_inner(db, embedding_dimension)
        .await
        .map_err(|err| BrainError::Internal(err.to_string()))
}

async fn ensure_runtime_indexes_inner(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<()> {
    create_fts_analyzer(db).await?;

    for spec in fts_index_specs() {
        if index_exists(db, spec.table, spec.index_name).await? {
            continue;
        }
        create_index_with_polling(db, spec.definition(), spec.index_name, spec.table).await?;
    }

    let hnsw_tasks = hnsw_index_specs().into_iter().map(|spec| async move {
        match hnsw_index_state(db, &spec, embedding_dimension).await? {
            HnswIndexState::Missing => {
                create_index_with_polling(
                    db,
                    spec.definition_if_not_exists(embedding_dimension),
                    spec.index_name,
                    spec.table,
                )
                .await
            }
            HnswIndexState::Matches => Ok(()),
            HnswIndexState::Different(existing) => {
                info!(
                    index = spec.index_name,
                    table = spec.table,
                    existing_dimension = existing,
                    target_dimension = embedding_dimension,
                    "overwriting HNSW index to match new embedding dimension"
                );
                create_index_with_polling(
                    db,
                    spec.definition_overwrite(embedding_dimension),
                    spec.index_name,
                    spec.table,
                )
                .await
            }
        }
    });

    try_join_all(hnsw_tasks).await.map(|_| ())?;

    Ok(())
}

async fn existing_hnsw_dimension(
    db: &SurrealDbClient,
    spec: &HnswIndexSpec,
) -> Result<Option<usize>> {
    let Some(indexes) = table_index_definitions(db, spec.table).await? else {
        return Ok(None);
    };

    let Some(definition) = indexes
        .get(spec.index_name)
        .and_then(|details| details.get("Strand"))
        .and_then(|v| v.as_str())
    else {
        return Ok(None);
    };

    Ok(extract_dimension(definition).and_then(|d| usize::try_from(d).ok()))
}

async fn hnsw_index_state(
    db: &SurrealDbClient,
    spec: &HnswIndexSpec,
    expected_dimension: usize,
) -> Result<HnswIndexState> {
    match existing_hnsw_dimension(db, spec).await? {
        None => Ok(HnswIndexState::Missing),
        Some(current_dimension) if current_dimension == expected_dimension => {
            Ok(HnswIndexState::Matches)
        }
        Some(current_dimension) => Ok(HnswIndexState::Different(current_dimension as u64)),
    }
}

enum HnswIndexState {
    Missing,
    Matches,
    Different(u64),
}

fn extract_dimension(definition: &str) -> Option<u64> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<u64>().ok())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<()> {
    let query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball(english);",
        analyzer = FTS_ANALYZER_NAME
    );

    if let Ok(res) = db.client.query(query).await {
        if res.check().is_ok() {
            return Ok(());
        }
    }

    let fallback_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS class
            FILTERS lowercase, ascii;",
        analyzer = FTS_ANALYZER_NAME
    );

    db.client
        .query(fallback_query)
        .await
        .context("creating fallback FTS analyzer")?
        .check()
        .context("fallback FTS analyzer definition failed")?;

    warn!(
        "snowball analyzer unavailable; using fallback analyzer {} with lowercase+ascii only",
        FTS_ANALYZER_NAME
    );

    Ok(())
}

async fn create_index_with_polling(
    db: &SurrealDbClient,
    definition: String,
    index_name: &str,
    table: &str,
) -> Result<()> {
    let expected_total = count_table_rows(db, table)
        .await
        .with_context(|| format!("counting rows in {table} for index {index_name} progress"))?;

    let mut attempts = 0;
    const MAX_ATTEMPTS: usize = 3;
    loop {
        attempts += 1;
        let res = db
            .client
            .query(definition.clone())
            .await
            .with_context(|| format!("creating index {index_name} on table {table}"))?;
        match res.check() {
            Ok(_) => break,
            Err(err) => {
                let conflict = err.to_string().contains("read or write conflict");
                warn!(index = %index_name, table = %table, error = ?err, attempt = attempts, "index definition failed");
                if conflict && attempts < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                return Err(err).with_context(|| {
                    format!("index definition failed for {index_name} on {table}")
                });
            }
        }
    }

    poll_index_build_status(db, index_name, table, expected_total, INDEX_POLL_INTERVAL).await
}

async fn poll_index_build_status(
    db: &SurrealDbClient,
    index_name: &str,
    table: &str,
    total_rows: u64,
    poll_every: Duration,
) -> Result<()> {
    loop {
        tokio::time::sleep(poll_every).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut info_res = db.client.query(info_query).await.with_context(|| {
            format!("checking index build status for {index_name} on {table}")
        })?;

        let info: Option<Value> = info_res
            .take(0)
            .context("failed to deserialize INFO FOR INDEX result")?;

        let Some(snapshot) = parse_index_build_info(info, Some(total_rows)) else {
            break;
        };

        debug!(
            index = %index_name,
            table = %table,
            status = snapshot.status,
            processed = snapshot.processed,
            "index build status"
        );

        if snapshot.is_ready() || snapshot.status.eq_ignore_ascii_case("error") {
            break;
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
struct IndexBuildSnapshot {
    status: String,
    processed: u64,
}

impl IndexBuildSnapshot {
    fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("ready")
    }
}

fn parse_index_build_info(info: Option<Value>, _total_rows: Option<u64>) -> Option<IndexBuildSnapshot> {
    let info = info?;
    let building = info.get("building");

    let status = building
        .and_then(|b| b.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("ready")
        .to_string();

    let initial = building.and_then(|b| b.get("initial")).and_then(Value::as_u64).unwrap_or(0);
    let updated = building.and_then(|b| b.get("updated")).and_then(Value::as_u64).unwrap_or(0);

    Some(IndexBuildSnapshot {
        status,
        processed: initial.saturating_add(updated),
    })
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

async fn count_table_rows(db: &SurrealDbClient, table: &str) -> Result<u64> {
    let query = format!("SELECT count() AS count FROM {table} GROUP ALL;");
    let mut response = db
        .client
        .query(query)
        .await
        .with_context(|| format!("counting rows in {table}"))?;
    let rows: Vec<CountRow> = response
        .take(0)
        .context("failed to deserialize count() response")?;
    Ok(rows.first().map_or(0, |r| r.count))
}

async fn table_index_definitions(db: &SurrealDbClient, table: &str) -> Result<Option<Map<String, Value>>> {
    let info_query = format!("INFO FOR TABLE {table};");
    let mut response = db
        .client
        .query(info_query)
        .await
        .with_context(|| format!("fetching table info for {table}"))?;

    let info: surrealdb::Value = response.take(0).context("failed to take table info response")?;
    let info_json: Value = serde_json::to_value(info).context("serializing table info")?;

    Ok(info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.as_object())
        .cloned())
}

async fn index_exists(db: &SurrealDbClient, table: &str, index_name: &str) -> Result<bool> {
    let Some(indexes) = table_index_definitions(db, table).await? else {
        return Ok(false);
    };
    Ok(indexes.contains_key(index_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_index_build_info_reports_progress() {
        let info = json!({"building": {"initial": 10, "pending": 0, "status": "indexing", "updated": 2}});
        let snapshot = parse_index_build_info(Some(info), Some(12)).expect("snapshot");
        assert_eq!(snapshot.processed, 12);
        assert!(!snapshot.is_ready());
    }

    #[test]
    fn parse_index_build_info_defaults_to_ready_without_building_block() {
        let snapshot = parse_index_build_info(Some(json!({})), Some(10)).expect("snapshot");
        assert!(snapshot.is_ready());
    }

    #[test]
    fn extract_dimension_parses_value() {
        let definition = "DEFINE INDEX idx_embedding_vector_nodes ON TABLE vector_nodes FIELDS embedding HNSW DIMENSION 3072 DIST COSINE TYPE F32 EFC 100 M 8;";
        assert_eq!(extract_dimension(definition), Some(3072));
    }

    #[tokio::test]
    async fn ensure_runtime_indexes_is_idempotent() {
        let db = SurrealDbClient::memory("indexes_test").await.expect("in-memory db");

        ensure_runtime_indexes(&db, 1536).await.expect("initial index creation");
        ensure_runtime_indexes(&db, 1536).await.expect("second index creation is a no-op");
    }

    #[tokio::test]
    async fn ensure_hnsw_index_overwrites_dimension() {
        let db = SurrealDbClient::memory("indexes_dim_test").await.expect("in-memory db");

        ensure_runtime_indexes(&db, 1536).await.expect("initial index creation");
        ensure_runtime_indexes(&db, 128).await.expect("overwritten index creation");
    }
}
