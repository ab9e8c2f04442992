//! Write scheduling for dirty edges
//!
//! Dirty edges wait in a bounded [`PendingWrites`] set until a flush writes
//! them. Flushes are driven by a background task spawned with
//! [`spawn_flush_task`], which wakes on a timer, when the pending count reaches
//! the batch threshold, or on request through its [`SchedulerHandle`].
//!
//! ```ignore
//! let handle = spawn_flush_task(store.clone());
//! // ... record observations ...
//! let report = handle.shutdown().await?; // final flush, then join
//! ```

use lru::LruCache;
use meshroute_core::EdgeKey;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TopologyError};
use crate::store::{EdgeStore, GraphStats};

/// Bounded set of edges waiting to be written
///
/// Insertion order is kept; when full, the edge that has waited longest is
/// evicted and returned to the caller.
pub struct PendingWrites {
    queue: LruCache<EdgeKey, ()>,
}

impl PendingWrites {
    /// Create a pending set holding at most `limit` edges
    pub fn new(limit: usize) -> Self {
        let capacity = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            queue: LruCache::new(capacity),
        }
    }

    /// Queue an edge; returns the edge evicted to make room, if any
    pub fn push(&mut self, key: EdgeKey) -> Option<EdgeKey> {
        // Re-queueing keeps the original position
        if self.queue.contains(&key) {
            return None;
        }
        self.queue.push(key, ()).map(|(evicted, _)| evicted)
    }

    /// Take every pending edge, oldest first
    pub fn drain(&mut self) -> Vec<EdgeKey> {
        let mut keys = Vec::with_capacity(self.queue.len());
        while let Some((key, _)) = self.queue.pop_lru() {
            keys.push(key);
        }
        keys
    }

    pub fn remove(&mut self, key: &EdgeKey) -> bool {
        self.queue.pop(key).is_some()
    }

    pub fn contains(&self, key: &EdgeKey) -> bool {
        self.queue.contains(key)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.cap().get()
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Edges confirmed written
    pub written: usize,
    /// Edges whose write failed and were re-queued
    pub failed: usize,
    /// Edges still pending after the flush
    pub remaining: usize,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Commands accepted by the flush task
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Flush now and report
    Flush(oneshot::Sender<FlushReport>),
    /// Get graph statistics
    GetStats(oneshot::Sender<GraphStats>),
    /// Final flush, then stop
    Shutdown(oneshot::Sender<FlushReport>),
}

/// Handle for controlling the background flush task
///
/// Dropping the handle without calling [`SchedulerHandle::shutdown`] also stops
/// the task after a final flush, but nothing waits for it.
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Force a flush and wait for its report
    pub async fn flush(&self) -> Result<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::Flush(tx))
            .await
            .map_err(|_| TopologyError::SchedulerNotRunning)?;
        rx.await.map_err(|_| TopologyError::ChannelClosed)
    }

    /// Get graph statistics from the task's view
    pub async fn stats(&self) -> Result<GraphStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::GetStats(tx))
            .await
            .map_err(|_| TopologyError::SchedulerNotRunning)?;
        rx.await.map_err(|_| TopologyError::ChannelClosed)
    }

    /// Stop the task after a final forced flush and wait for it to exit
    pub async fn shutdown(self) -> Result<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::Shutdown(tx))
            .await
            .map_err(|_| TopologyError::SchedulerNotRunning)?;
        let report = rx.await.map_err(|_| TopologyError::ChannelClosed)?;
        self.task.await?;
        Ok(report)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Spawn the background flush task for `store`
///
/// Must be called from within a tokio runtime.
pub fn spawn_flush_task(store: Arc<EdgeStore>) -> SchedulerHandle {
    let (command_tx, command_rx) = mpsc::channel(32);
    let scheduler = FlushScheduler {
        interval: store.batch_interval(),
        store,
        command_rx,
    };
    let task = tokio::spawn(scheduler.run());
    SchedulerHandle { command_tx, task }
}

struct FlushScheduler {
    store: Arc<EdgeStore>,
    interval: Duration,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl FlushScheduler {
    async fn run(mut self) {
        info!(
            interval = ?self.interval,
            policy = ?self.store.write_policy(),
            "Starting edge flush task"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush("interval").await;
                }

                _ = self.store.flush_requested() => {
                    self.flush("threshold").await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Flush(tx)) => {
                            let report = self.flush("requested").await;
                            let _ = tx.send(report);
                        }
                        Some(SchedulerCommand::GetStats(tx)) => {
                            let _ = tx.send(self.store.stats());
                        }
                        Some(SchedulerCommand::Shutdown(tx)) => {
                            info!("Edge flush task shutdown requested");
                            let report = self.final_flush().await;
                            let _ = tx.send(report);
                            break;
                        }
                        None => {
                            debug!("All scheduler handles dropped");
                            self.final_flush().await;
                            break;
                        }
                    }
                }
            }
        }

        info!("Edge flush task stopped");
    }

    async fn flush(&self, reason: &'static str) -> FlushReport {
        let report = self.store.flush().await;
        if report.written > 0 || report.failed > 0 {
            debug!(
                reason,
                written = report.written,
                failed = report.failed,
                remaining = report.remaining,
                "Flushed pending edges"
            );
        } else {
            trace!(reason, "Nothing to flush");
        }
        report
    }

    async fn final_flush(&self) -> FlushReport {
        let report = self.store.flush().await;
        if report.remaining > 0 {
            warn!(
                remaining = report.remaining,
                failed = report.failed,
                "Edges still pending at shutdown; they will not be persisted"
            );
        } else {
            info!(written = report.written, "Final edge flush complete");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshroute_core::NodePrefix;

    fn key(from: &str, to: &str) -> EdgeKey {
        EdgeKey::new(NodePrefix::parse(from).unwrap(), NodePrefix::parse(to).unwrap())
    }

    #[test]
    fn test_push_deduplicates() {
        let mut pending = PendingWrites::new(10);
        assert!(pending.push(key("01", "02")).is_none());
        assert!(pending.push(key("01", "02")).is_none());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut pending = PendingWrites::new(2);
        pending.push(key("01", "02"));
        pending.push(key("02", "03"));
        // Re-queueing does not refresh position
        pending.push(key("01", "02"));

        let evicted = pending.push(key("03", "04"));
        assert_eq!(evicted, Some(key("01", "02")));
        assert_eq!(pending.len(), 2);
        assert!(!pending.contains(&key("01", "02")));
    }

    #[test]
    fn test_drain_is_oldest_first() {
        let mut pending = PendingWrites::new(10);
        pending.push(key("0a", "0b"));
        pending.push(key("0c", "0d"));
        pending.push(key("0e", "0f"));

        assert_eq!(
            pending.drain(),
            vec![key("0a", "0b"), key("0c", "0d"), key("0e", "0f")]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn test_zero_limit_still_holds_one() {
        let mut pending = PendingWrites::new(0);
        assert_eq!(pending.capacity(), 1);
        pending.push(key("01", "02"));
        assert!(pending.remove(&key("01", "02")));
        assert!(!pending.remove(&key("01", "02")));
    }
}
