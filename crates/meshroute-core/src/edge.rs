//! Edge records exchanged between the graph engine and durable storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::identity::{NodePrefix, PublicKey};

/// Directed edge key: a packet was observed moving from `from` into `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    /// Transmitting node
    pub from: NodePrefix,
    /// Receiving node
    pub to: NodePrefix,
}

impl EdgeKey {
    /// Create a new edge key
    pub fn new(from: NodePrefix, to: NodePrefix) -> Self {
        Self { from, to }
    }

    /// The same pair in the opposite direction
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Full state of one edge, as persisted and as handed out in snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Edge identity
    pub key: EdgeKey,
    /// Cumulative number of observations (never decremented)
    pub observation_count: u64,
    /// First observation time
    pub first_seen: DateTime<Utc>,
    /// Most recent observation time
    pub last_observed: DateTime<Utc>,
    /// Hop index → number of times the edge was seen there
    pub hop_position_histogram: BTreeMap<u32, u64>,
    /// Full key of the transmitting node, captured the first time it was certain
    pub stored_from_key: Option<PublicKey>,
    /// Full key of the receiving node, captured the first time it was certain
    pub stored_to_key: Option<PublicKey>,
    /// Distance between the two endpoints, when both positions were known
    pub geographic_distance_km: Option<f64>,
}

impl EdgeRecord {
    /// A fresh edge with no observations applied yet
    pub fn empty(key: EdgeKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            observation_count: 0,
            first_seen: at,
            last_observed: at,
            hop_position_histogram: BTreeMap::new(),
            stored_from_key: None,
            stored_to_key: None,
            geographic_distance_km: None,
        }
    }

    /// Count of observations at `hop_index`
    pub fn hop_count_at(&self, hop_index: u32) -> u64 {
        self.hop_position_histogram
            .get(&hop_index)
            .copied()
            .unwrap_or(0)
    }

    /// Weighted mean of the hop histogram
    pub fn mean_hop_position(&self) -> Option<f64> {
        let total: u64 = self.hop_position_histogram.values().sum();
        if total == 0 {
            return None;
        }
        let weighted: f64 = self
            .hop_position_histogram
            .iter()
            .map(|(pos, count)| *pos as f64 * *count as f64)
            .sum();
        Some(weighted / total as f64)
    }

    /// Hours since the last observation, relative to `now`
    pub fn hours_since_observed(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.last_observed).num_seconds().max(0);
        secs as f64 / 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(from: &str, to: &str) -> EdgeKey {
        EdgeKey::new(NodePrefix::parse(from).unwrap(), NodePrefix::parse(to).unwrap())
    }

    #[test]
    fn test_edge_key_display_and_reverse() {
        let k = key("7e", "a1");
        assert_eq!(k.to_string(), "7e->a1");
        assert_eq!(k.reversed(), key("a1", "7e"));
    }

    #[test]
    fn test_mean_hop_position() {
        let mut record = EdgeRecord::empty(key("7e", "a1"), Utc::now());
        assert!(record.mean_hop_position().is_none());

        record.hop_position_histogram.insert(1, 3);
        record.hop_position_histogram.insert(3, 1);
        let mean = record.mean_hop_position().unwrap();
        assert!((mean - 1.5).abs() < 1e-9);
        assert_eq!(record.hop_count_at(1), 3);
        assert_eq!(record.hop_count_at(2), 0);
    }

    #[test]
    fn test_histogram_json_keys() {
        let mut record = EdgeRecord::empty(key("7e", "a1"), Utc::now());
        record.hop_position_histogram.insert(2, 5);
        let json = serde_json::to_string(&record.hop_position_histogram).unwrap();
        assert_eq!(json, r#"{"2":5}"#);
        let back: BTreeMap<u32, u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record.hop_position_histogram);
    }
}
