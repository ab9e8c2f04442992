//! Memory of the paths each originator's packets have taken
//!
//! When a packet from a known originator arrives, its hop list is kept as a
//! path signature. A candidate whose own past paths share a long leading run
//! with the path being decoded is more likely to be the node in question.

use chrono::{DateTime, Utc};
use lru::LruCache;
use meshroute_core::{NodePrefix, PublicKey};
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Originators tracked by default
pub const DEFAULT_MAX_ORIGINATORS: usize = 4096;

/// Signatures kept per originator
pub const MAX_SIGNATURES_PER_ORIGINATOR: usize = 10;

/// Common leading hops needed before a path counts as consistent
const MIN_COMMON_SEGMENTS: usize = 2;

/// One distinct hop sequence seen from an originator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSignature {
    pub hops: Vec<NodePrefix>,
    pub observation_count: u64,
    pub last_seen: DateTime<Utc>,
}

/// Bounded per-originator path memory
pub struct PathHistory {
    inner: Mutex<LruCache<PublicKey, Vec<PathSignature>>>,
}

impl PathHistory {
    pub fn new(max_originators: usize) -> Self {
        let capacity = NonZeroUsize::new(max_originators).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record that `origin`'s packet travelled over `hops`
    pub fn record(&self, origin: &PublicKey, hops: &[NodePrefix], at: DateTime<Utc>) {
        if hops.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let signatures = inner.get_or_insert_mut(origin.clone(), Vec::new);
        match signatures.iter_mut().find(|sig| sig.hops == hops) {
            Some(sig) => {
                sig.observation_count += 1;
                sig.last_seen = sig.last_seen.max(at);
            }
            None => signatures.push(PathSignature {
                hops: hops.to_vec(),
                observation_count: 1,
                last_seen: at,
            }),
        }
        signatures.sort_by(|a, b| {
            b.observation_count
                .cmp(&a.observation_count)
                .then(b.last_seen.cmp(&a.last_seen))
        });
        signatures.truncate(MAX_SIGNATURES_PER_ORIGINATOR);
    }

    /// Signatures for `origin`, most observed first
    pub fn signatures(&self, origin: &PublicKey) -> Vec<PathSignature> {
        self.inner
            .lock()
            .peek(origin)
            .cloned()
            .unwrap_or_default()
    }

    /// Bonus for a candidate whose own paths agree with `decoded`
    ///
    /// Uses the signature with the longest common leading run; ties go to the
    /// more observed one.
    pub fn validation_bonus(
        &self,
        candidate: &PublicKey,
        decoded: &[NodePrefix],
        max_bonus: f64,
        obs_divisor: f64,
    ) -> f64 {
        let inner = self.inner.lock();
        let Some(signatures) = inner.peek(candidate) else {
            return 0.0;
        };

        let best = signatures
            .iter()
            .map(|sig| (common_leading(&sig.hops, decoded), sig.observation_count))
            .filter(|(common, _)| *common >= MIN_COMMON_SEGMENTS)
            .max();

        match best {
            Some((common, observations)) => {
                let segment_bonus = (0.05 * common as f64).min(0.2);
                let observation_bonus = (observations as f64 / obs_divisor).min(0.15);
                (segment_bonus + observation_bonus).min(max_bonus)
            }
            None => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for PathHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ORIGINATORS)
    }
}

fn common_leading(a: &[NodePrefix], b: &[NodePrefix]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{key, prefix};

    fn hops(list: &[&str]) -> Vec<NodePrefix> {
        list.iter().map(|p| prefix(p)).collect()
    }

    #[test]
    fn test_record_merges_repeats() {
        let history = PathHistory::default();
        let origin = key("7e01");
        let now = Utc::now();

        history.record(&origin, &hops(&["a1", "3c"]), now);
        history.record(&origin, &hops(&["a1", "3c"]), now);
        history.record(&origin, &hops(&["b2"]), now);

        let sigs = history.signatures(&origin);
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].hops, hops(&["a1", "3c"]));
        assert_eq!(sigs[0].observation_count, 2);
    }

    #[test]
    fn test_signature_cap() {
        let history = PathHistory::default();
        let origin = key("7e01");
        for i in 0..15u8 {
            let hop = format!("{:02x}", i);
            history.record(&origin, &hops(&[hop.as_str(), "ff"]), Utc::now());
        }
        assert_eq!(history.signatures(&origin).len(), MAX_SIGNATURES_PER_ORIGINATOR);
    }

    #[test]
    fn test_validation_bonus() {
        let history = PathHistory::default();
        let candidate = key("a1ff");
        for _ in 0..5 {
            history.record(&candidate, &hops(&["10", "20", "30"]), Utc::now());
        }

        // Three common segments: 0.15 + 5/50
        let bonus = history.validation_bonus(&candidate, &hops(&["10", "20", "30", "40"]), 0.3, 50.0);
        assert!((bonus - 0.25).abs() < 1e-9);

        // One common segment is not enough
        let none = history.validation_bonus(&candidate, &hops(&["10", "99"]), 0.3, 50.0);
        assert_eq!(none, 0.0);

        let unknown = history.validation_bonus(&key("ffff"), &hops(&["10", "20"]), 0.3, 50.0);
        assert_eq!(unknown, 0.0);
    }

    #[test]
    fn test_bonus_is_capped() {
        let history = PathHistory::default();
        let candidate = key("a1ff");
        for _ in 0..100 {
            history.record(&candidate, &hops(&["10", "20", "30", "40", "50"]), Utc::now());
        }
        let bonus = history.validation_bonus(
            &candidate,
            &hops(&["10", "20", "30", "40", "50"]),
            0.3,
            50.0,
        );
        assert!((bonus - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_originator_bound() {
        let history = PathHistory::new(2);
        history.record(&key("0101"), &hops(&["a1"]), Utc::now());
        history.record(&key("0202"), &hops(&["a1"]), Utc::now());
        history.record(&key("0303"), &hops(&["a1"]), Utc::now());
        assert_eq!(history.len(), 2);
        assert!(history.signatures(&key("0101")).is_empty());
    }
}
