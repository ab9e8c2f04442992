//! In-memory directed edge graph with a durable mirror
//!
//! The [`EdgeStore`] owns every edge the node has inferred. Structure (which
//! edges exist, adjacency in both directions) lives behind one `RwLock`; each
//! edge's counters live behind their own `Mutex`, so recording an observation on
//! an existing edge only needs the shared lock.
//!
//! Persistence follows the configured [`WritePolicy`]. Anything not written
//! immediately sits in the pending set until a flush.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use meshroute_core::{EdgeKey, EdgeRecord, EdgeStorage, NodePrefix};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::config::{PersistenceConfig, WritePolicy};
use crate::edge::{EdgeObservation, EdgeState};
use crate::error::{Result, TopologyError};
use crate::scheduler::{FlushReport, PendingWrites};

/// Capacity of the edge event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Change notification for live viewers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeEvent {
    pub key: EdgeKey,
    pub observation_count: u64,
    pub is_new: bool,
}

/// Result of recording one observation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEdge {
    /// Edge state right after the observation was applied
    pub edge: EdgeRecord,
    /// Whether this observation created the edge
    pub is_new: bool,
}

/// Graph and persistence statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub edges: usize,
    pub nodes: usize,
    pub total_observations: u64,
    pub pending_writes: usize,
    /// Edges confirmed written to storage
    pub writes: u64,
    pub failed_writes: u64,
    /// Pending edges dropped because the pending set was full
    pub evicted_writes: u64,
    pub flushes: u64,
}

/// Outcome of a compaction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub removed_from_memory: usize,
    pub removed_from_storage: u64,
}

#[derive(Default)]
struct WriteCounters {
    writes: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
    flushes: AtomicU64,
}

/// Edge table plus adjacency in both directions
#[derive(Default)]
pub(crate) struct AdjacencyIndex {
    edges: HashMap<EdgeKey, Arc<Mutex<EdgeState>>>,
    outgoing: HashMap<NodePrefix, BTreeSet<NodePrefix>>,
    incoming: HashMap<NodePrefix, BTreeSet<NodePrefix>>,
}

impl AdjacencyIndex {
    fn get(&self, key: &EdgeKey) -> Option<&Arc<Mutex<EdgeState>>> {
        self.edges.get(key)
    }

    fn insert(&mut self, state: EdgeState) -> Arc<Mutex<EdgeState>> {
        let key = state.record.key.clone();
        self.outgoing
            .entry(key.from.clone())
            .or_default()
            .insert(key.to.clone());
        self.incoming
            .entry(key.to.clone())
            .or_default()
            .insert(key.from.clone());
        let edge = Arc::new(Mutex::new(state));
        self.edges.insert(key, edge.clone());
        edge
    }

    fn remove(&mut self, key: &EdgeKey) -> bool {
        if self.edges.remove(key).is_none() {
            return false;
        }
        unlink(&mut self.outgoing, &key.from, &key.to);
        unlink(&mut self.incoming, &key.to, &key.from);
        true
    }

    fn node_count(&self) -> usize {
        self.outgoing
            .keys()
            .chain(self.incoming.keys())
            .collect::<HashSet<_>>()
            .len()
    }
}

fn unlink(
    adjacency: &mut HashMap<NodePrefix, BTreeSet<NodePrefix>>,
    node: &NodePrefix,
    neighbor: &NodePrefix,
) {
    if let Some(set) = adjacency.get_mut(node) {
        set.remove(neighbor);
        if set.is_empty() {
            adjacency.remove(node);
        }
    }
}

/// Read-only view of the graph for one scoring pass
///
/// Holds the structural read lock until dropped. Do not keep a view across an
/// `.await`.
pub struct GraphView<'a> {
    index: RwLockReadGuard<'a, AdjacencyIndex>,
}

impl GraphView<'_> {
    /// Snapshot of one edge
    pub fn edge(&self, from: &NodePrefix, to: &NodePrefix) -> Option<EdgeRecord> {
        self.index
            .get(&EdgeKey::new(from.clone(), to.clone()))
            .map(|edge| edge.lock().record.clone())
    }

    pub fn has_edge(&self, from: &NodePrefix, to: &NodePrefix) -> bool {
        self.index
            .edges
            .contains_key(&EdgeKey::new(from.clone(), to.clone()))
    }

    /// Nodes `node` has forwarded to, in prefix order
    pub fn successors(&self, node: &NodePrefix) -> impl Iterator<Item = &NodePrefix> + '_ {
        self.index.outgoing.get(node).into_iter().flatten()
    }

    /// Nodes that have forwarded to `node`, in prefix order
    pub fn predecessors(&self, node: &NodePrefix) -> impl Iterator<Item = &NodePrefix> + '_ {
        self.index.incoming.get(node).into_iter().flatten()
    }

    pub fn edge_count(&self) -> usize {
        self.index.edges.len()
    }
}

/// The shared edge graph
pub struct EdgeStore {
    index: RwLock<AdjacencyIndex>,
    storage: Arc<dyn EdgeStorage>,
    write_policy: WritePolicy,
    batch_interval: Duration,
    batch_max_pending: usize,
    pending: Mutex<PendingWrites>,
    flush_signal: Notify,
    events: broadcast::Sender<EdgeEvent>,
    counters: WriteCounters,
}

impl EdgeStore {
    /// Create an empty store mirrored to `storage`
    pub fn new(storage: Arc<dyn EdgeStorage>, config: &PersistenceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            index: RwLock::new(AdjacencyIndex::default()),
            storage,
            write_policy: config.write_policy,
            batch_interval: config.batch_interval,
            batch_max_pending: config.batch_max_pending.max(1),
            pending: Mutex::new(PendingWrites::new(config.max_pending_limit)),
            flush_signal: Notify::new(),
            events,
            counters: WriteCounters::default(),
        }
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    pub fn batch_interval(&self) -> Duration {
        self.batch_interval
    }

    /// Subscribe to edge changes
    pub fn subscribe(&self) -> broadcast::Receiver<EdgeEvent> {
        self.events.subscribe()
    }

    /// Record one sighting of an edge
    ///
    /// Never fails: a write that cannot reach storage leaves the edge pending.
    pub async fn record_observation(&self, observation: EdgeObservation) -> RecordedEdge {
        let (edge, version, is_new) = self.apply(&observation);
        let key = edge.key.clone();

        let write_now = match self.write_policy {
            WritePolicy::Immediate => true,
            WritePolicy::Batched => false,
            WritePolicy::Hybrid => is_new,
        };

        if write_now {
            match self.storage.upsert_edge(&edge).await {
                Ok(()) => {
                    self.counters.writes.fetch_add(1, Ordering::Relaxed);
                    self.mark_written(&key, version);
                    debug!(edge = %key, count = edge.observation_count, "Persisted edge");
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(edge = %key, error = %e, "Immediate edge write failed; keeping it pending");
                    self.enqueue(key.clone());
                }
            }
        } else {
            self.enqueue(key.clone());
        }

        let _ = self.events.send(EdgeEvent {
            key,
            observation_count: edge.observation_count,
            is_new,
        });

        RecordedEdge { edge, is_new }
    }

    /// Apply an observation in memory. Returns the snapshot, its version and
    /// whether the edge was created.
    fn apply(&self, observation: &EdgeObservation) -> (EdgeRecord, u64, bool) {
        let key = observation.key();
        {
            let index = self.index.read();
            if let Some(edge) = index.get(&key) {
                let mut state = edge.lock();
                state.apply(observation);
                return (state.record.clone(), state.version, false);
            }
        }

        let mut index = self.index.write();
        // Another writer may have created it between the two locks
        let (edge, is_new) = match index.get(&key).cloned() {
            Some(edge) => (edge, false),
            None => (
                index.insert(EdgeState::new(key, observation.observed_at)),
                true,
            ),
        };
        let mut state = edge.lock();
        state.apply(observation);
        (state.record.clone(), state.version, is_new)
    }

    fn mark_written(&self, key: &EdgeKey, version: u64) -> bool {
        let index = self.index.read();
        match index.get(key) {
            Some(edge) => edge.lock().mark_written(version),
            None => true,
        }
    }

    /// Queue a freshly dirtied edge, signalling the flush task at the threshold
    fn enqueue(&self, key: EdgeKey) {
        if self.push_pending(key) >= self.batch_max_pending {
            self.flush_signal.notify_one();
        }
    }

    /// Put back an edge whose write failed
    ///
    /// Does not signal: retries wait for the next interval tick or an
    /// explicit flush, so an unreachable storage is not polled in a loop.
    fn requeue(&self, key: EdgeKey) {
        self.push_pending(key);
    }

    fn push_pending(&self, key: EdgeKey) -> usize {
        let mut pending = self.pending.lock();
        if let Some(evicted) = pending.push(key) {
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            warn!(
                edge = %evicted,
                limit = pending.capacity(),
                "Pending write set full; dropped oldest pending edge (data loss risk)"
            );
        }
        pending.len()
    }

    /// Resolves when the pending count reached the batch threshold
    pub(crate) fn flush_requested(&self) -> Notified<'_> {
        self.flush_signal.notified()
    }

    /// Write every pending edge
    ///
    /// Snapshots are taken under the locks, which are released before any
    /// storage call. Each edge is written independently; failures go back to
    /// the pending set.
    pub async fn flush(&self) -> FlushReport {
        let keys = self.pending.lock().drain();
        if keys.is_empty() {
            return FlushReport::default();
        }

        let snapshots: Vec<(EdgeRecord, u64)> = {
            let index = self.index.read();
            keys.iter()
                .filter_map(|key| index.get(key))
                .map(|edge| {
                    let state = edge.lock();
                    (state.record.clone(), state.version)
                })
                .collect()
        };

        let mut report = FlushReport::default();
        for (record, version) in snapshots {
            match self.storage.upsert_edge(&record).await {
                Ok(()) => {
                    report.written += 1;
                    // A newer version re-queued itself when it was applied
                    self.mark_written(&record.key, version);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(edge = %record.key, error = %e, "Edge write failed; keeping it pending");
                    self.requeue(record.key);
                }
            }
        }

        self.counters
            .writes
            .fetch_add(report.written as u64, Ordering::Relaxed);
        self.counters
            .failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        report.remaining = self.pending.lock().len();
        report
    }

    /// Load edges observed within `horizon_days` (all when 0)
    ///
    /// Edges already in memory with at least as many observations are kept, so
    /// loading twice changes nothing.
    pub async fn load(&self, horizon_days: u32) -> Result<usize> {
        let since =
            (horizon_days > 0).then(|| Utc::now() - ChronoDuration::days(horizon_days as i64));
        let records = self
            .storage
            .load_edges(since)
            .await
            .map_err(TopologyError::LoadFailed)?;
        let total = records.len();

        let mut loaded = 0;
        {
            let mut index = self.index.write();
            for record in records {
                match index.get(&record.key).cloned() {
                    Some(existing) => {
                        let mut state = existing.lock();
                        if record.observation_count > state.record.observation_count {
                            state.absorb_persisted(record);
                            loaded += 1;
                        }
                    }
                    None => {
                        index.insert(EdgeState::from_persisted(record));
                        loaded += 1;
                    }
                }
            }
        }

        info!(loaded, stored = total, horizon_days, "Loaded edge graph");
        Ok(loaded)
    }

    /// Remove edges not observed for `older_than_days` from memory and storage
    pub async fn compact(&self, older_than_days: u32) -> Result<CompactionReport> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days as i64);
        let removed = self.remove_older_than(cutoff);
        let removed_from_storage = self.storage.prune_edges(cutoff).await?;

        let report = CompactionReport {
            removed_from_memory: removed,
            removed_from_storage,
        };
        info!(
            older_than_days,
            memory = report.removed_from_memory,
            storage = report.removed_from_storage,
            "Compacted edge graph"
        );
        Ok(report)
    }

    fn remove_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut index = self.index.write();
        let stale: Vec<EdgeKey> = index
            .edges
            .iter()
            .filter(|(_, edge)| edge.lock().record.last_observed < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        let mut pending = self.pending.lock();
        for key in &stale {
            index.remove(key);
            pending.remove(key);
        }
        stale.len()
    }

    /// Lock the graph for reading
    pub fn view(&self) -> GraphView<'_> {
        GraphView {
            index: self.index.read(),
        }
    }

    pub fn get_edge(&self, from: &NodePrefix, to: &NodePrefix) -> Option<EdgeRecord> {
        self.view().edge(from, to)
    }

    pub fn has_edge(&self, from: &NodePrefix, to: &NodePrefix) -> bool {
        self.view().has_edge(from, to)
    }

    /// Outgoing edges of `node`
    pub fn edges_from(&self, node: &NodePrefix) -> Vec<EdgeRecord> {
        let view = self.view();
        view.successors(node)
            .filter_map(|to| view.edge(node, to))
            .collect()
    }

    /// Incoming edges of `node`
    pub fn edges_to(&self, node: &NodePrefix) -> Vec<EdgeRecord> {
        let view = self.view();
        view.predecessors(node)
            .filter_map(|from| view.edge(from, node))
            .collect()
    }

    /// Snapshot of every edge
    pub fn edges(&self) -> Vec<EdgeRecord> {
        let index = self.index.read();
        index
            .edges
            .values()
            .map(|edge| edge.lock().record.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> GraphStats {
        let (edges, nodes, total_observations) = {
            let index = self.index.read();
            let total: u64 = index
                .edges
                .values()
                .map(|edge| edge.lock().record.observation_count)
                .sum();
            (index.edges.len(), index.node_count(), total)
        };
        GraphStats {
            edges,
            nodes,
            total_observations,
            pending_writes: self.pending_count(),
            writes: self.counters.writes.load(Ordering::Relaxed),
            failed_writes: self.counters.failed.load(Ordering::Relaxed),
            evicted_writes: self.counters.evicted.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for EdgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeStore")
            .field("write_policy", &self.write_policy)
            .field("edges", &self.index.read().edges.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}
