//! Edge observations and in-memory edge state

use chrono::{DateTime, Utc};
use meshroute_core::{EdgeKey, EdgeRecord, NodePrefix, PublicKey};

/// One sighting of `from` forwarding to `to` inside an observed path
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeObservation {
    pub from: NodePrefix,
    pub to: NodePrefix,
    /// Index of `to` in the context sequence
    pub hop_index: u32,
    /// Full key of `from`, only when it is known for certain
    pub from_key: Option<PublicKey>,
    /// Full key of `to`, only when it is known for certain
    pub to_key: Option<PublicKey>,
    pub distance_km: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl EdgeObservation {
    /// Observation made now with no keys or distance
    pub fn new(from: NodePrefix, to: NodePrefix, hop_index: u32) -> Self {
        Self {
            from,
            to,
            hop_index,
            from_key: None,
            to_key: None,
            distance_km: None,
            observed_at: Utc::now(),
        }
    }

    pub fn with_from_key(mut self, key: PublicKey) -> Self {
        self.from_key = Some(key);
        self
    }

    pub fn with_to_key(mut self, key: PublicKey) -> Self {
        self.to_key = Some(key);
        self
    }

    pub fn with_distance(mut self, km: f64) -> Self {
        self.distance_km = Some(km);
        self
    }

    /// Set the observation time
    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.from.clone(), self.to.clone())
    }
}

/// Mutable state behind one edge
///
/// `version` increases on every applied observation so a flush can tell
/// whether the edge changed while its snapshot was being written.
#[derive(Debug, Clone)]
pub(crate) struct EdgeState {
    pub(crate) record: EdgeRecord,
    pub(crate) version: u64,
    pub(crate) dirty: bool,
    pub(crate) persisted: bool,
}

impl EdgeState {
    pub(crate) fn new(key: EdgeKey, at: DateTime<Utc>) -> Self {
        Self {
            record: EdgeRecord::empty(key, at),
            version: 0,
            dirty: false,
            persisted: false,
        }
    }

    pub(crate) fn from_persisted(record: EdgeRecord) -> Self {
        Self {
            record,
            version: 0,
            dirty: false,
            persisted: true,
        }
    }

    pub(crate) fn apply(&mut self, obs: &EdgeObservation) {
        let record = &mut self.record;
        record.observation_count += 1;
        if obs.observed_at > record.last_observed {
            record.last_observed = obs.observed_at;
        }
        if obs.observed_at < record.first_seen {
            record.first_seen = obs.observed_at;
        }
        *record
            .hop_position_histogram
            .entry(obs.hop_index)
            .or_insert(0) += 1;

        // Keys are write-once
        if record.stored_from_key.is_none() {
            record.stored_from_key = obs.from_key.clone();
        }
        if record.stored_to_key.is_none() {
            record.stored_to_key = obs.to_key.clone();
        }
        if let Some(km) = obs.distance_km.filter(|km| km.is_finite() && *km >= 0.0) {
            record.geographic_distance_km = Some(km);
        }

        self.version += 1;
        self.dirty = true;
    }

    /// Replace with a stored row that carries more observations
    pub(crate) fn absorb_persisted(&mut self, stored: EdgeRecord) {
        if stored.observation_count >= self.record.observation_count {
            self.record = stored;
            self.persisted = true;
            self.dirty = false;
            self.version += 1;
        }
    }

    /// Note a confirmed write of `version`. Returns whether the edge is clean.
    pub(crate) fn mark_written(&mut self, version: u64) -> bool {
        self.persisted = true;
        if self.version == version {
            self.dirty = false;
        }
        !self.dirty
    }
}

/// Confidence contributed by one evidence edge
///
/// Observation strength saturates towards 1 as the count grows; recency is
/// full within the first hour and halves every 48 hours after that.
pub fn segment_confidence(record: &EdgeRecord, now: DateTime<Utc>) -> f64 {
    let n = record.observation_count as f64;
    let observation = (0.3 + 0.7 * (1.0 - 1.0 / (1.0 + n / 10.0))).min(1.0);

    let hours = record.hours_since_observed(now);
    let recency = if hours < 1.0 {
        1.0
    } else {
        2f64.powf(-hours / 48.0)
    };

    0.6 * observation + 0.4 * recency
}
