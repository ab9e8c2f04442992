//! SQLite edge storage
//!
//! One row per directed edge. The hop histogram is stored as a JSON object and
//! timestamps as unix milliseconds so the schema needs no sqlx type features.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use meshroute_core::{EdgeKey, EdgeRecord, EdgeStorage, NodePrefix, PublicKey};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{Result, StateError};

const CREATE_EDGES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS mesh_edges (
        from_prefix TEXT NOT NULL,
        to_prefix TEXT NOT NULL,
        from_public_key TEXT,
        to_public_key TEXT,
        observation_count INTEGER NOT NULL,
        first_seen INTEGER NOT NULL,
        last_observed INTEGER NOT NULL,
        hop_histogram TEXT NOT NULL DEFAULT '{}',
        geographic_distance REAL,
        PRIMARY KEY (from_prefix, to_prefix)
    )
"#;

const CREATE_LAST_OBSERVED_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_mesh_edges_last_observed ON mesh_edges (last_observed)";

// Stored keys are write-once and a stale snapshot never lowers the count.
const UPSERT_EDGE: &str = r#"
    INSERT INTO mesh_edges (
        from_prefix, to_prefix, from_public_key, to_public_key,
        observation_count, first_seen, last_observed, hop_histogram, geographic_distance
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (from_prefix, to_prefix) DO UPDATE SET
        from_public_key = COALESCE(mesh_edges.from_public_key, excluded.from_public_key),
        to_public_key = COALESCE(mesh_edges.to_public_key, excluded.to_public_key),
        hop_histogram = CASE
            WHEN excluded.observation_count >= mesh_edges.observation_count
            THEN excluded.hop_histogram ELSE mesh_edges.hop_histogram END,
        observation_count = MAX(mesh_edges.observation_count, excluded.observation_count),
        first_seen = MIN(mesh_edges.first_seen, excluded.first_seen),
        last_observed = MAX(mesh_edges.last_observed, excluded.last_observed),
        geographic_distance = COALESCE(excluded.geographic_distance, mesh_edges.geographic_distance)
"#;

const SELECT_COLUMNS: &str = "SELECT from_prefix, to_prefix, from_public_key, to_public_key, \
     observation_count, first_seen, last_observed, hop_histogram, geographic_distance \
     FROM mesh_edges";

/// SQLite-backed implementation of [`EdgeStorage`]
#[derive(Debug, Clone)]
pub struct SqliteEdgeStore {
    pool: SqlitePool,
}

impl SqliteEdgeStore {
    /// Connect using a sqlx URL such as `sqlite:meshroute.db?mode=rwc`
    pub async fn new(url: &str) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(url).map_err(|e| StateError::Connection(e.to_string()))?;
        Self::connect(options, 5).await
    }

    /// Open (creating if needed) a database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::connect(options, 5).await
    }

    /// Private in-memory database; a single connection keeps every query on the same database
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StateError::Connection(e.to_string()))?;
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_EDGES_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Migration(e.to_string()))?;
        sqlx::query(CREATE_LAST_OBSERVED_INDEX)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Migration(e.to_string()))?;
        info!("Edge storage schema ready");
        Ok(())
    }

    /// Insert or update a single edge
    pub async fn upsert(&self, edge: &EdgeRecord) -> Result<()> {
        let histogram = serde_json::to_string(&edge.hop_position_histogram)?;
        sqlx::query(UPSERT_EDGE)
            .bind(edge.key.from.as_str())
            .bind(edge.key.to.as_str())
            .bind(edge.stored_from_key.as_ref().map(PublicKey::as_str))
            .bind(edge.stored_to_key.as_ref().map(PublicKey::as_str))
            .bind(edge.observation_count as i64)
            .bind(edge.first_seen.timestamp_millis())
            .bind(edge.last_observed.timestamp_millis())
            .bind(histogram)
            .bind(edge.geographic_distance_km)
            .execute(&self.pool)
            .await?;
        debug!(edge = %edge.key, count = edge.observation_count, "Upserted edge");
        Ok(())
    }

    /// Fetch one edge by key
    pub async fn fetch(&self, key: &EdgeKey) -> Result<Option<EdgeRecord>> {
        let query = format!("{SELECT_COLUMNS} WHERE from_prefix = ? AND to_prefix = ?");
        let row = sqlx::query(&query)
            .bind(key.from.as_str())
            .bind(key.to.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    /// Fetch every edge observed at or after `since`
    pub async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<EdgeRecord>> {
        let rows = match since {
            Some(cutoff) => {
                let query = format!("{SELECT_COLUMNS} WHERE last_observed >= ?");
                sqlx::query(&query)
                    .bind(cutoff.timestamp_millis())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(SELECT_COLUMNS).fetch_all(&self.pool).await?,
        };
        rows.iter().map(decode_row).collect()
    }

    /// Delete edges last observed before `older_than`
    pub async fn delete_older_than(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM mesh_edges WHERE last_observed < ?")
            .bind(older_than.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Count persisted edges
    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM mesh_edges")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_row(row: &SqliteRow) -> Result<EdgeRecord> {
    let from: String = row.try_get("from_prefix")?;
    let to: String = row.try_get("to_prefix")?;
    let key = EdgeKey::new(decode_prefix(&from)?, decode_prefix(&to)?);

    let stored_from_key = decode_key(row.try_get("from_public_key")?)?;
    let stored_to_key = decode_key(row.try_get("to_public_key")?)?;

    let count: i64 = row.try_get("observation_count")?;
    let histogram_json: String = row.try_get("hop_histogram")?;
    let hop_position_histogram: BTreeMap<u32, u64> = serde_json::from_str(&histogram_json)
        .map_err(|e| StateError::Deserialization(format!("{key}: {e}")))?;

    Ok(EdgeRecord {
        observation_count: count.max(0) as u64,
        first_seen: decode_millis(row.try_get("first_seen")?)?,
        last_observed: decode_millis(row.try_get("last_observed")?)?,
        hop_position_histogram,
        stored_from_key,
        stored_to_key,
        geographic_distance_km: row.try_get("geographic_distance")?,
        key,
    })
}

fn decode_prefix(raw: &str) -> Result<NodePrefix> {
    NodePrefix::parse_with_width(raw, raw.len())
        .map_err(|e| StateError::InvalidData(e.to_string()))
}

fn decode_key(raw: Option<String>) -> Result<Option<PublicKey>> {
    raw.map(|k| PublicKey::parse(&k).map_err(|e| StateError::InvalidData(e.to_string())))
        .transpose()
}

fn decode_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StateError::InvalidData(format!("timestamp out of range: {ms}")))
}

#[async_trait]
impl EdgeStorage for SqliteEdgeStore {
    async fn upsert_edge(&self, edge: &EdgeRecord) -> meshroute_core::Result<()> {
        Ok(self.upsert(edge).await?)
    }

    async fn load_edges(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> meshroute_core::Result<Vec<EdgeRecord>> {
        Ok(self.fetch_since(since).await?)
    }

    async fn prune_edges(&self, older_than: DateTime<Utc>) -> meshroute_core::Result<u64> {
        Ok(self.delete_older_than(older_than).await?)
    }

    async fn edge_count(&self) -> meshroute_core::Result<u64> {
        Ok(self.count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_edge(from: &str, to: &str, count: u64) -> EdgeRecord {
        let key = EdgeKey::new(NodePrefix::parse(from).unwrap(), NodePrefix::parse(to).unwrap());
        let now = Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap();
        let mut edge = EdgeRecord::empty(key, now);
        edge.observation_count = count;
        edge.hop_position_histogram.insert(1, count);
        edge
    }

    #[tokio::test]
    async fn test_upsert_and_fetch() {
        let store = SqliteEdgeStore::in_memory().await.unwrap();
        let edge = sample_edge("7e", "a1", 2);
        store.upsert(&edge).await.unwrap();

        let loaded = store.fetch(&edge.key).await.unwrap().unwrap();
        assert_eq!(loaded, edge);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stored_keys_are_write_once() {
        let store = SqliteEdgeStore::in_memory().await.unwrap();
        let first = PublicKey::parse("a1000001").unwrap();
        let second = PublicKey::parse("a1000002").unwrap();

        let mut edge = sample_edge("7e", "a1", 1);
        store.upsert(&edge).await.unwrap();

        edge.observation_count = 2;
        edge.stored_to_key = Some(first.clone());
        store.upsert(&edge).await.unwrap();

        edge.observation_count = 3;
        edge.stored_to_key = Some(second);
        store.upsert(&edge).await.unwrap();

        edge.observation_count = 4;
        edge.stored_to_key = None;
        store.upsert(&edge).await.unwrap();

        let loaded = store.fetch(&edge.key).await.unwrap().unwrap();
        assert_eq!(loaded.stored_to_key, Some(first));
        assert_eq!(loaded.observation_count, 4);
    }

    #[tokio::test]
    async fn test_stale_snapshot_never_lowers_count() {
        let store = SqliteEdgeStore::in_memory().await.unwrap();
        store.upsert(&sample_edge("7e", "a1", 9)).await.unwrap();
        store.upsert(&sample_edge("7e", "a1", 4)).await.unwrap();

        let key = sample_edge("7e", "a1", 0).key;
        let loaded = store.fetch(&key).await.unwrap().unwrap();
        assert_eq!(loaded.observation_count, 9);
        assert_eq!(loaded.hop_count_at(1), 9);
    }

    #[tokio::test]
    async fn test_fetch_since_and_prune() {
        let store = SqliteEdgeStore::in_memory().await.unwrap();
        let mut old = sample_edge("11", "22", 1);
        old.last_observed = old.last_observed - Duration::days(30);
        old.first_seen = old.last_observed;
        store.upsert(&old).await.unwrap();
        store.upsert(&sample_edge("33", "44", 1)).await.unwrap();

        let cutoff = Utc::now() - Duration::days(7);
        assert_eq!(store.fetch_since(Some(cutoff)).await.unwrap().len(), 1);
        assert_eq!(store.fetch_since(None).await.unwrap().len(), 2);

        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
