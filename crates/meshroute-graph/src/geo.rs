//! Geographic candidate scoring
//!
//! Candidates are scored by how close they are to a reference point taken from
//! the surrounding path and how recently they were heard. The reference is,
//! in order of preference: the originator (first hop), the local node (final
//! hop), the previous and next nodes, one of them, or the local node as a last
//! resort.

use chrono::{DateTime, Utc};
use meshroute_core::{Contact, GeographyProvider, Location};

use crate::config::ScoringPolicy;

/// Distance at which proximity reaches zero
const PROXIMITY_NORMALIZATION_KM: f64 = 1000.0;

/// Recency assumed for candidates never heard
const UNKNOWN_RECENCY: f64 = 0.1;

/// Candidates below this recency are not scored
const MIN_RECENCY: f64 = 0.01;

/// Multiplier for candidates with a direct-reception SNR
const SNR_MULTIPLIER: f64 = 1.2;

/// Highest confidence a geographic selection can carry
const MAX_GEOGRAPHIC_CONFIDENCE: f64 = 0.9;

/// Where the reference point came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Originator of the packet, for the first hop
    Sender,
    /// Local node, for the final hop
    LocalFinal,
    /// Previous and/or next node in the path
    Path,
    /// Local node when the path offers nothing
    LocalFallback,
}

/// Reference point(s) candidates are measured against
#[derive(Debug, Clone, PartialEq)]
pub struct GeoReference {
    pub kind: ReferenceKind,
    pub points: Vec<Location>,
}

impl GeoReference {
    /// Sender and final-hop references ignore recency
    pub fn is_pure_proximity(&self) -> bool {
        matches!(self.kind, ReferenceKind::Sender | ReferenceKind::LocalFinal)
    }

    /// Pick the reference for one hop
    pub fn select(
        previous: Option<Location>,
        previous_is_origin: bool,
        next: Option<Location>,
        is_final: bool,
        local: Option<Location>,
    ) -> Option<Self> {
        let reference = |kind, points| Some(Self { kind, points });

        if previous_is_origin {
            if let Some(origin) = previous {
                return reference(ReferenceKind::Sender, vec![origin]);
            }
        }
        if is_final {
            if let Some(local) = local {
                return reference(ReferenceKind::LocalFinal, vec![local]);
            }
        }
        match (previous, next) {
            (Some(prev), Some(next)) => reference(ReferenceKind::Path, vec![prev, next]),
            (Some(one), None) | (None, Some(one)) => reference(ReferenceKind::Path, vec![one]),
            (None, None) => local.and_then(|l| reference(ReferenceKind::LocalFallback, vec![l])),
        }
    }
}

/// Geographic score of one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoScore {
    pub score: f64,
    pub recency: f64,
    pub proximity: f64,
    /// Mean distance to the reference points
    pub distance_km: f64,
}

impl GeoScore {
    /// Confidence of this score taken on its own
    pub fn confidence(&self) -> f64 {
        (0.4 + 0.5 * self.score).min(MAX_GEOGRAPHIC_CONFIDENCE)
    }
}

/// Exponential recency in `(0, 1]`, or a small constant when never heard
pub fn recency_score(
    last_heard: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    half_life_hours: f64,
) -> f64 {
    match last_heard {
        Some(at) => {
            let hours = (now - at).num_seconds().max(0) as f64 / 3600.0;
            (-hours / half_life_hours).exp()
        }
        None => UNKNOWN_RECENCY,
    }
}

/// Score `candidate` against `reference`; `None` when it cannot be placed or
/// falls outside the configured limits
pub fn score_candidate(
    candidate: &Contact,
    reference: &GeoReference,
    policy: &ScoringPolicy,
    geography: &dyn GeographyProvider,
    now: DateTime<Utc>,
) -> Option<GeoScore> {
    let location = candidate.usable_location()?;
    if reference.points.is_empty() {
        return None;
    }

    let recency = recency_score(
        geography.last_heard(candidate),
        now,
        policy.recency_half_life_hours,
    );
    if recency < MIN_RECENCY {
        return None;
    }

    let distance_km = reference
        .points
        .iter()
        .map(|point| geography.distance_km(&location, point))
        .sum::<f64>()
        / reference.points.len() as f64;
    if policy.max_proximity_range_km > 0.0 && distance_km > policy.max_proximity_range_km {
        return None;
    }

    let proximity = 1.0 - (distance_km / PROXIMITY_NORMALIZATION_KM).min(1.0);
    let mut score = if reference.is_pure_proximity() {
        proximity
    } else {
        policy.recency_weight * recency + (1.0 - policy.recency_weight) * proximity
    };
    if candidate.starred {
        score *= policy.star_bias;
    }
    if candidate.snr.is_some() {
        score *= SNR_MULTIPLIER;
    }

    Some(GeoScore {
        score,
        recency,
        proximity,
        distance_km,
    })
}

/// Confidence of a geographic winner
///
/// `runner_up` is the second best score, if any.
pub fn selection_confidence(
    winner: &GeoScore,
    runner_up: Option<f64>,
    kind: ReferenceKind,
) -> f64 {
    if kind != ReferenceKind::LocalFallback {
        return winner.confidence();
    }
    match runner_up {
        Some(second) if second > 0.0 => {
            let ratio = winner.score / second;
            if ratio > 1.5 {
                0.9
            } else if ratio > 1.2 {
                0.8
            } else if ratio > 1.1 {
                0.7
            } else {
                0.5
            }
        }
        _ => winner.confidence(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::located_contact;
    use chrono::Duration;
    use meshroute_core::HaversineGeography;

    fn policy() -> ScoringPolicy {
        ScoringPolicy::default()
    }

    #[test]
    fn test_reference_selection_order() {
        let a = Location::new(47.0, -122.0);
        let b = Location::new(47.1, -122.1);
        let local = Location::new(47.2, -122.2);

        let sender = GeoReference::select(Some(a), true, Some(b), false, Some(local)).unwrap();
        assert_eq!(sender.kind, ReferenceKind::Sender);

        let last = GeoReference::select(Some(a), false, None, true, Some(local)).unwrap();
        assert_eq!(last.kind, ReferenceKind::LocalFinal);

        let middle = GeoReference::select(Some(a), false, Some(b), false, Some(local)).unwrap();
        assert_eq!(middle.kind, ReferenceKind::Path);
        assert_eq!(middle.points.len(), 2);

        let fallback = GeoReference::select(None, false, None, false, Some(local)).unwrap();
        assert_eq!(fallback.kind, ReferenceKind::LocalFallback);

        assert!(GeoReference::select(None, false, None, false, None).is_none());
    }

    #[test]
    fn test_recency_decay() {
        let now = Utc::now();
        assert!((recency_score(Some(now), now, 12.0) - 1.0).abs() < 1e-9);
        let half_day = recency_score(Some(now - Duration::hours(12)), now, 12.0);
        assert!((half_day - (-1f64).exp()).abs() < 1e-6);
        assert_eq!(recency_score(None, now, 12.0), UNKNOWN_RECENCY);
    }

    #[test]
    fn test_closer_candidate_scores_higher() {
        let reference = GeoReference {
            kind: ReferenceKind::Path,
            points: vec![Location::new(47.60, -122.33)],
        };
        let near = located_contact("7e01", 47.61, -122.34);
        let far = located_contact("7e02", 47.90, -122.90);
        let geo = HaversineGeography;
        let now = Utc::now();

        let near_score = score_candidate(&near, &reference, &policy(), &geo, now).unwrap();
        let far_score = score_candidate(&far, &reference, &policy(), &geo, now).unwrap();
        assert!(near_score.score > far_score.score);
        assert!(near_score.distance_km < far_score.distance_km);
    }

    #[test]
    fn test_out_of_range_and_hidden_are_dropped() {
        let reference = GeoReference {
            kind: ReferenceKind::Path,
            points: vec![Location::new(47.60, -122.33)],
        };
        let geo = HaversineGeography;
        let now = Utc::now();

        // Portland is ~230 km away
        let distant = located_contact("7e01", 45.52, -122.68);
        assert!(score_candidate(&distant, &reference, &policy(), &geo, now).is_none());

        let hidden = located_contact("7e02", 0.0, 0.0);
        assert!(score_candidate(&hidden, &reference, &policy(), &geo, now).is_none());
    }

    #[test]
    fn test_star_and_snr_multipliers() {
        let reference = GeoReference {
            kind: ReferenceKind::Sender,
            points: vec![Location::new(47.60, -122.33)],
        };
        let geo = HaversineGeography;
        let now = Utc::now();
        let plain = located_contact("7e01", 47.61, -122.34);
        let starred = plain.clone().with_starred(true);
        let heard = plain.clone().with_snr(8.0);

        let base = score_candidate(&plain, &reference, &policy(), &geo, now).unwrap().score;
        let star = score_candidate(&starred, &reference, &policy(), &geo, now).unwrap().score;
        let snr = score_candidate(&heard, &reference, &policy(), &geo, now).unwrap().score;
        assert!((star - base * 2.5).abs() < 1e-9);
        assert!((snr - base * 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_confidence_for_local_fallback() {
        let winner = GeoScore {
            score: 0.9,
            recency: 1.0,
            proximity: 0.9,
            distance_km: 10.0,
        };
        assert_eq!(
            selection_confidence(&winner, Some(0.5), ReferenceKind::LocalFallback),
            0.9
        );
        assert_eq!(
            selection_confidence(&winner, Some(0.7), ReferenceKind::LocalFallback),
            0.8
        );
        assert_eq!(
            selection_confidence(&winner, Some(0.89), ReferenceKind::LocalFallback),
            0.5
        );
        let path = selection_confidence(&winner, Some(0.89), ReferenceKind::Path);
        assert!((path - 0.85).abs() < 1e-9);
    }
}
