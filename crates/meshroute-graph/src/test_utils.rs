//! Test utilities for the topology engine
//!
//! [`MemoryEdgeStorage`] stands in for durable storage. It merges upserts the
//! same way the SQLite store does and can be switched into a failing mode to
//! exercise the pending-write paths. The free functions build prefixes,
//! contacts and configurations for tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshroute_graph::test_utils::{persistence, MemoryEdgeStorage};
//!
//! let storage = Arc::new(MemoryEdgeStorage::new());
//! let store = EdgeStore::new(storage.clone(), &persistence(WritePolicy::Immediate));
//! storage.set_failing(true);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshroute_core::{
    Contact, EdgeKey, EdgeRecord, EdgeStorage, MeshrouteError, NodePrefix, PublicKey,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::{PersistenceConfig, WritePolicy};

/// In-memory [`EdgeStorage`] with a failure switch and write counters
#[derive(Debug, Default)]
pub struct MemoryEdgeStorage {
    edges: Mutex<HashMap<EdgeKey, EdgeRecord>>,
    failing: AtomicBool,
    upserts: AtomicU64,
    rejected: AtomicU64,
}

impl MemoryEdgeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StorageUnavailable` until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Stored row for `from -> to`
    pub fn stored(&self, from: &str, to: &str) -> Option<EdgeRecord> {
        let key = EdgeKey::new(prefix(from), prefix(to));
        self.edges.lock().get(&key).cloned()
    }

    /// Seed a row directly, bypassing merge rules
    pub fn insert(&self, record: EdgeRecord) {
        self.edges.lock().insert(record.key.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.edges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }

    /// Successful upserts so far
    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Calls rejected while failing
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    fn check(&self) -> meshroute_core::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(MeshrouteError::StorageUnavailable(
                "memory storage switched off".into(),
            ));
        }
        Ok(())
    }
}

/// Merge an incoming snapshot into a stored row
fn merge(existing: &mut EdgeRecord, incoming: &EdgeRecord) {
    if incoming.observation_count >= existing.observation_count {
        existing.hop_position_histogram = incoming.hop_position_histogram.clone();
    }
    existing.observation_count = existing.observation_count.max(incoming.observation_count);
    existing.first_seen = existing.first_seen.min(incoming.first_seen);
    existing.last_observed = existing.last_observed.max(incoming.last_observed);
    if existing.stored_from_key.is_none() {
        existing.stored_from_key = incoming.stored_from_key.clone();
    }
    if existing.stored_to_key.is_none() {
        existing.stored_to_key = incoming.stored_to_key.clone();
    }
    if incoming.geographic_distance_km.is_some() {
        existing.geographic_distance_km = incoming.geographic_distance_km;
    }
}

#[async_trait]
impl EdgeStorage for MemoryEdgeStorage {
    async fn upsert_edge(&self, edge: &EdgeRecord) -> meshroute_core::Result<()> {
        self.check()?;
        let mut edges = self.edges.lock();
        match edges.get_mut(&edge.key) {
            Some(existing) => merge(existing, edge),
            None => {
                edges.insert(edge.key.clone(), edge.clone());
            }
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_edges(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> meshroute_core::Result<Vec<EdgeRecord>> {
        self.check()?;
        let edges = self.edges.lock();
        let mut records: Vec<EdgeRecord> = edges
            .values()
            .filter(|record| since.map_or(true, |since| record.last_observed >= since))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn prune_edges(&self, older_than: DateTime<Utc>) -> meshroute_core::Result<u64> {
        self.check()?;
        let mut edges = self.edges.lock();
        let before = edges.len();
        edges.retain(|_, record| record.last_observed >= older_than);
        Ok((before - edges.len()) as u64)
    }

    async fn edge_count(&self) -> meshroute_core::Result<u64> {
        self.check()?;
        Ok(self.edges.lock().len() as u64)
    }
}

/// Two-character prefix fixture
pub fn prefix(hex: &str) -> NodePrefix {
    NodePrefix::parse(hex).expect("fixture prefix must be hex")
}

/// Public key fixture
pub fn key(hex: &str) -> PublicKey {
    PublicKey::parse(hex).expect("fixture key must be hex")
}

/// Contact heard just now, without a location
pub fn contact(hex: &str) -> Contact {
    Contact::new(key(hex)).with_last_seen(Utc::now())
}

/// Contact heard just now at the given position
pub fn located_contact(hex: &str, latitude: f64, longitude: f64) -> Contact {
    contact(hex).with_location(latitude, longitude)
}

/// Persistence settings with the given policy and defaults otherwise
pub fn persistence(policy: WritePolicy) -> PersistenceConfig {
    PersistenceConfig {
        write_policy: policy,
        ..PersistenceConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(from: &str, to: &str, count: u64) -> EdgeRecord {
        let mut record = EdgeRecord::empty(EdgeKey::new(prefix(from), prefix(to)), Utc::now());
        record.observation_count = count;
        record
    }

    #[tokio::test]
    async fn test_merge_keeps_first_key_and_highest_count() {
        let storage = MemoryEdgeStorage::new();
        let mut first = record("7e", "a1", 3);
        first.stored_to_key = Some(key("a1aa"));
        storage.upsert_edge(&first).await.unwrap();

        let mut stale = record("7e", "a1", 2);
        stale.stored_to_key = Some(key("a1bb"));
        storage.upsert_edge(&stale).await.unwrap();

        let stored = storage.stored("7e", "a1").unwrap();
        assert_eq!(stored.observation_count, 3);
        assert_eq!(stored.stored_to_key, Some(key("a1aa")));
        assert_eq!(storage.upsert_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_switch() {
        let storage = MemoryEdgeStorage::new();
        storage.set_failing(true);
        assert!(storage.upsert_edge(&record("01", "02", 1)).await.is_err());
        assert!(storage.load_edges(None).await.is_err());
        assert_eq!(storage.rejected_count(), 2);

        storage.set_failing(false);
        storage.upsert_edge(&record("01", "02", 1)).await.unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_load_horizon_and_prune() {
        let storage = MemoryEdgeStorage::new();
        let mut old = record("01", "02", 1);
        old.last_observed = Utc::now() - Duration::days(20);
        storage.insert(old);
        storage.insert(record("02", "03", 1));

        let cutoff = Utc::now() - Duration::days(10);
        assert_eq!(storage.load_edges(Some(cutoff)).await.unwrap().len(), 1);
        assert_eq!(storage.prune_edges(cutoff).await.unwrap(), 1);
        assert_eq!(storage.edge_count().await.unwrap(), 1);
    }
}
