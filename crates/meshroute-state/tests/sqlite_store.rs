//! Integration tests for the SQLite edge store
//!
//! These exercise the store through the `EdgeStorage` trait, the way the graph
//! engine sees it, against a real database file.

use chrono::{Duration, TimeZone, Utc};
use meshroute_core::{EdgeKey, EdgeRecord, EdgeStorage, NodePrefix, PublicKey};
use meshroute_state::SqliteEdgeStore;
use std::sync::Arc;

fn prefix(s: &str) -> NodePrefix {
    NodePrefix::parse(s).unwrap()
}

fn millis_now() -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap()
}

fn edge(from: &str, to: &str, count: u64) -> EdgeRecord {
    let mut record = EdgeRecord::empty(EdgeKey::new(prefix(from), prefix(to)), millis_now());
    record.observation_count = count;
    record
}

#[tokio::test]
async fn test_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edges.db");

    let mut original = edge("7e", "a1", 5);
    original.hop_position_histogram.insert(1, 3);
    original.hop_position_histogram.insert(2, 2);
    original.stored_from_key = Some(PublicKey::parse("7e00aa11").unwrap());
    original.stored_to_key = Some(PublicKey::parse("a100bb22").unwrap());
    original.geographic_distance_km = Some(12.5);

    {
        let store = SqliteEdgeStore::open(&path).await.unwrap();
        store.upsert_edge(&original).await.unwrap();
        store.close().await;
    }

    let reopened = SqliteEdgeStore::open(&path).await.unwrap();
    let loaded = reopened.load_edges(None).await.unwrap();
    assert_eq!(loaded, vec![original]);
}

#[tokio::test]
async fn test_url_connection() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("url.db").display());
    let store = SqliteEdgeStore::new(&url).await.unwrap();
    store.upsert_edge(&edge("01", "02", 1)).await.unwrap();
    assert_eq!(store.edge_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_load_horizon_filters_old_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteEdgeStore::open(dir.path().join("horizon.db")).await.unwrap();

    let mut stale = edge("aa", "bb", 2);
    stale.last_observed = stale.last_observed - Duration::days(10);
    stale.first_seen = stale.last_observed;
    store.upsert_edge(&stale).await.unwrap();
    store.upsert_edge(&edge("cc", "dd", 1)).await.unwrap();

    let recent = store
        .load_edges(Some(Utc::now() - Duration::days(3)))
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].key.from.as_str(), "cc");

    let removed = store
        .prune_edges(Utc::now() - Duration::days(3))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.edge_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_keep_every_edge() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteEdgeStore::open(dir.path().join("concurrent.db"))
            .await
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for i in 0..32u32 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let from = format!("{:02x}", i);
            store.upsert_edge(&edge(&from, "ff", 1)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(store.edge_count().await.unwrap(), 32);
}

#[tokio::test]
async fn test_wider_prefixes_survive_reload() {
    let store = SqliteEdgeStore::in_memory().await.unwrap();
    let key = EdgeKey::new(
        NodePrefix::parse_with_width("7e12", 4).unwrap(),
        NodePrefix::parse_with_width("a1b2", 4).unwrap(),
    );
    let mut record = EdgeRecord::empty(key.clone(), millis_now());
    record.observation_count = 1;
    store.upsert_edge(&record).await.unwrap();

    let loaded = store.load_edges(None).await.unwrap();
    assert_eq!(loaded[0].key, key);
}
