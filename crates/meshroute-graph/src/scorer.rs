//! Evidence scoring for ambiguous hops
//!
//! Every candidate sharing a hop's prefix gets a graph score from the edges
//! around it and, when positions are known, a geographic score. The two are
//! then combined into a single decision according to the [`ScoringPolicy`].
//!
//! Graph scoring, per candidate:
//!
//! 1. Evidence edges are `previous -> candidate` and `candidate -> next`.
//!    An established direct edge below the observation threshold rules the
//!    candidate out of graph selection; geography can still pick it.
//! 2. The base score is the mean link confidence of the usable evidence edges.
//! 3. Hop position, stored distance, stored key, zero-hop and path-history
//!    bonuses are added, each keeping the score at or below 1.
//! 4. Weak or missing direct evidence consults multi-hop inference.
//! 5. Implausible hop distances are penalized, the final hop is blended with
//!    local proximity, and starred contacts are boosted.

use chrono::{DateTime, Utc};
use meshroute_core::{Contact, EdgeKey, EdgeRecord, GeographyProvider, NodePrefix};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::{CombinationMode, ScoringPolicy};
use crate::geo::{self, GeoReference, GeoScore};
use crate::multihop::{infer_chain, is_live, link_confidence, usable_edge, InferredChain};
use crate::paths::PathHistory;
use crate::store::GraphView;

const HOP_POSITION_BONUS: f64 = 0.1;
const GEOGRAPHIC_DATA_BONUS: f64 = 0.05;
const STORED_KEY_BONUS: f64 = 0.4;
const SNR_ZERO_HOP_MULTIPLIER: f64 = 1.2;
const MISSING_LOCATION_FINAL_HOP_FACTOR: f64 = 0.5;
const CLOSE_WEIGHT_CAP: f64 = 0.5;

/// Candidate index, confidence and method of a provisional winner
type Pick = (usize, f64, SelectionMethod);

/// How a hop was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Only one known node has the prefix
    Unique,
    /// Direct edge evidence
    Graph,
    /// Inferred chain of edges
    GraphMultiHop,
    /// Proximity and recency
    Geographic,
    /// Graph and geography agreed
    Combined,
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionMethod::Unique => "unique",
            SelectionMethod::Graph => "graph",
            SelectionMethod::GraphMultiHop => "graph_multihop",
            SelectionMethod::Geographic => "geographic",
            SelectionMethod::Combined => "combined",
        };
        f.write_str(name)
    }
}

/// A neighbouring node in the path
#[derive(Debug, Clone, PartialEq)]
pub struct PathNode {
    pub prefix: NodePrefix,
    /// Resolved (or best guess) contact, when any
    pub contact: Option<Contact>,
}

impl PathNode {
    pub fn new(prefix: NodePrefix, contact: Option<Contact>) -> Self {
        Self { prefix, contact }
    }

    fn location(&self) -> Option<meshroute_core::Location> {
        self.contact.as_ref().and_then(Contact::usable_location)
    }
}

/// Everything the scorer knows about the hop being resolved
#[derive(Debug, Clone)]
pub struct HopContext<'a> {
    /// Index of this hop in the context sequence
    pub position: u32,
    pub prefix: NodePrefix,
    pub previous: Option<PathNode>,
    /// The previous node is the packet's originator
    pub previous_is_origin: bool,
    pub next: Option<PathNode>,
    /// Hop prefixes of the whole path, originator excluded
    pub path: &'a [NodePrefix],
    pub is_final: bool,
}

/// Edge evidence behind a candidate's graph score
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evidence {
    pub edges: Vec<EdgeKey>,
    pub observation_count: u64,
    pub last_observed: Option<DateTime<Utc>>,
    pub chain: Option<InferredChain>,
}

impl Evidence {
    fn add_edge(&mut self, edge: &EdgeRecord) {
        self.edges.push(edge.key.clone());
        self.observation_count += edge.observation_count;
        self.last_observed = self.last_observed.max(Some(edge.last_observed));
    }

    fn set_chain(&mut self, chain: InferredChain) {
        if self.edges.is_empty() {
            self.observation_count = chain.weakest_observations;
            self.last_observed = Some(chain.last_observed);
        }
        self.chain = Some(chain);
    }
}

/// One candidate with its scores
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub contact: Contact,
    /// Graph score after adjustments; starred candidates can exceed 1
    pub graph_score: f64,
    /// Graph score mapped into `[0, 1]`
    pub graph_confidence: f64,
    /// `Graph` or `GraphMultiHop`
    pub graph_method: SelectionMethod,
    /// Ruled out of graph selection by an established edge below the
    /// observation threshold
    pub excluded: bool,
    pub geographic: Option<GeoScore>,
    /// Overall standing of this candidate
    pub combined_score: f64,
    pub evidence: Evidence,
}

/// What the scorer concluded for one hop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// A candidate cleared the minimum selection confidence
    Selected {
        index: usize,
        confidence: f64,
        method: SelectionMethod,
    },
    /// Nothing cleared it; the best guess is still reported
    Inconclusive {
        best_guess: Option<(usize, f64)>,
    },
}

/// Scored candidates and the decision
#[derive(Debug, Clone)]
pub struct HopScoring {
    pub candidates: Vec<ScoredCandidate>,
    pub decision: Decision,
}

impl HopScoring {
    /// Selected candidate, or the best guess
    pub fn leading(&self) -> Option<(&ScoredCandidate, f64)> {
        let (index, confidence) = match self.decision {
            Decision::Selected {
                index, confidence, ..
            } => (index, confidence),
            Decision::Inconclusive {
                best_guess: Some((index, confidence)),
            } => (index, confidence),
            Decision::Inconclusive { best_guess: None } => return None,
        };
        self.candidates.get(index).map(|c| (c, confidence))
    }
}

struct GraphOutcome {
    score: f64,
    method: SelectionMethod,
    excluded: bool,
    evidence: Evidence,
}

/// Scores same-prefix candidates against graph and geographic evidence
pub struct EvidenceScorer {
    policy: Arc<ScoringPolicy>,
    geography: Arc<dyn GeographyProvider>,
    history: Arc<PathHistory>,
}

impl EvidenceScorer {
    pub fn new(
        policy: Arc<ScoringPolicy>,
        geography: Arc<dyn GeographyProvider>,
        history: Arc<PathHistory>,
    ) -> Self {
        Self {
            policy,
            geography,
            history,
        }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Score `candidates` for the hop described by `ctx`
    pub fn score(
        &self,
        view: &GraphView<'_>,
        ctx: &HopContext<'_>,
        candidates: Vec<Contact>,
        now: DateTime<Utc>,
    ) -> HopScoring {
        let reference = if self.policy.geography_enabled {
            GeoReference::select(
                ctx.previous.as_ref().and_then(PathNode::location),
                ctx.previous_is_origin,
                ctx.next.as_ref().and_then(PathNode::location),
                ctx.is_final,
                self.policy.local_location,
            )
        } else {
            None
        };

        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|contact| {
                let graph = self.graph_outcome(view, ctx, &contact, now);
                let geographic = reference.as_ref().and_then(|reference| {
                    geo::score_candidate(
                        &contact,
                        reference,
                        &self.policy,
                        self.geography.as_ref(),
                        now,
                    )
                });
                let graph_confidence = self.confidence_from_score(graph.score);
                trace!(
                    hop = %ctx.prefix,
                    candidate = %contact.public_key.short(),
                    graph = graph_confidence,
                    geographic = geographic.map(|g| g.score),
                    excluded = graph.excluded,
                    "Scored candidate"
                );
                ScoredCandidate {
                    contact,
                    graph_score: graph.score,
                    graph_confidence,
                    graph_method: graph.method,
                    excluded: graph.excluded,
                    geographic,
                    combined_score: 0.0,
                    evidence: graph.evidence,
                }
            })
            .collect();

        for candidate in &mut scored {
            candidate.combined_score = self.standing(candidate);
        }

        let decision = self.decide(&scored, ctx, reference.as_ref());
        match decision {
            Decision::Selected {
                index,
                confidence,
                method,
            } => {
                scored[index].combined_score = confidence;
                debug!(
                    hop = %ctx.prefix,
                    position = ctx.position,
                    selected = %scored[index].contact.public_key.short(),
                    confidence,
                    method = %method,
                    candidates = scored.len(),
                    "Selected candidate"
                );
            }
            Decision::Inconclusive { best_guess } => {
                debug!(
                    hop = %ctx.prefix,
                    position = ctx.position,
                    best_guess = best_guess.map(|(_, c)| c),
                    candidates = scored.len(),
                    "No candidate cleared the selection threshold"
                );
            }
        }

        HopScoring {
            candidates: scored,
            decision,
        }
    }

    fn graph_outcome(
        &self,
        view: &GraphView<'_>,
        ctx: &HopContext<'_>,
        candidate: &Contact,
        now: DateTime<Utc>,
    ) -> GraphOutcome {
        let policy = &*self.policy;
        let mut evidence = Evidence::default();
        let previous = ctx.previous.as_ref();

        let incoming = previous
            .and_then(|prev| view.edge(&prev.prefix, &ctx.prefix))
            .filter(|edge| is_live(edge, policy, now));
        if let Some(edge) = &incoming {
            if edge.observation_count < policy.min_edge_observations {
                trace!(
                    edge = %edge.key,
                    count = edge.observation_count,
                    "Direct edge below observation threshold; candidate excluded"
                );
                return GraphOutcome {
                    score: 0.0,
                    method: SelectionMethod::Graph,
                    excluded: true,
                    evidence,
                };
            }
        }
        let outgoing = ctx
            .next
            .as_ref()
            .and_then(|next| usable_edge(view, &ctx.prefix, &next.prefix, policy, now));

        let segments: Vec<f64> = incoming
            .iter()
            .chain(outgoing.iter())
            .map(|edge| {
                evidence.add_edge(edge);
                link_confidence(view, edge, policy, now)
            })
            .collect();
        let base = if segments.is_empty() {
            0.0
        } else {
            segments.iter().sum::<f64>() / segments.len() as f64
        };

        let mut score = base;
        if base > 0.0 {
            if policy.use_hop_position
                && (incoming
                    .as_ref()
                    .is_some_and(|e| e.hop_count_at(ctx.position) > 0)
                    || outgoing
                        .as_ref()
                        .is_some_and(|e| e.hop_count_at(ctx.position + 1) > 0))
            {
                score = bonus(score, HOP_POSITION_BONUS);
            }
            if incoming
                .iter()
                .chain(outgoing.iter())
                .any(|e| e.geographic_distance_km.is_some())
            {
                score = bonus(score, GEOGRAPHIC_DATA_BONUS);
            }
            if policy.prefer_stored_keys
                && (incoming
                    .as_ref()
                    .is_some_and(|e| e.stored_to_key.as_ref() == Some(&candidate.public_key))
                    || outgoing
                        .as_ref()
                        .is_some_and(|e| e.stored_from_key.as_ref() == Some(&candidate.public_key)))
            {
                score = bonus(score, STORED_KEY_BONUS);
            }
            if candidate.zero_hop || candidate.snr.is_some() {
                let zero_hop = if candidate.snr.is_some() {
                    policy.zero_hop_bonus * SNR_ZERO_HOP_MULTIPLIER
                } else {
                    policy.zero_hop_bonus
                };
                score = bonus(score, zero_hop);
            }
        }
        score = bonus(
            score,
            self.history.validation_bonus(
                &candidate.public_key,
                ctx.path,
                policy.path_validation_max_bonus,
                policy.path_validation_obs_divisor,
            ),
        );

        let mut method = SelectionMethod::Graph;
        if let Some(prev) = previous {
            if policy.multi_hop_enabled && (incoming.is_none() || score < policy.multi_hop_trigger)
            {
                if let Some(chain) = infer_chain(view, &prev.prefix, &ctx.prefix, policy, now) {
                    if chain.confidence > score {
                        score = chain.confidence;
                        method = SelectionMethod::GraphMultiHop;
                        evidence.set_chain(chain);
                    }
                }
            }
        }

        if score > 0.0 {
            let hop_distance = self.hop_distance(previous, candidate, incoming.as_ref());
            score = distance_penalty(score, hop_distance, policy);

            if ctx.is_final && policy.final_hop_enabled {
                if let Some(local) = policy.local_location {
                    let distance = candidate
                        .usable_location()
                        .map(|loc| self.geography.distance_km(&loc, &local));
                    score = final_hop_blend(score, distance, policy);
                }
            }

            if candidate.starred {
                score *= policy.star_bias;
            }
        }

        GraphOutcome {
            score,
            method,
            excluded: false,
            evidence,
        }
    }

    /// Distance of the hop into `candidate`, from positions or the edge
    fn hop_distance(
        &self,
        previous: Option<&PathNode>,
        candidate: &Contact,
        incoming: Option<&EdgeRecord>,
    ) -> Option<f64> {
        let from_positions = previous
            .and_then(PathNode::location)
            .zip(candidate.usable_location())
            .map(|(a, b)| self.geography.distance_km(&a, &b));
        from_positions.or_else(|| incoming.and_then(|e| e.geographic_distance_km))
    }

    fn confidence_from_score(&self, score: f64) -> f64 {
        if score > 1.0 {
            0.95 + ((score - 1.0) / self.policy.star_bias).min(0.05)
        } else {
            score.max(0.0)
        }
    }

    /// Standing of a candidate on its own, used for reporting and best guesses
    fn standing(&self, candidate: &ScoredCandidate) -> f64 {
        let geo = candidate.geographic.map(|g| g.confidence());
        match (self.policy.combination_mode, geo) {
            (CombinationMode::Combined, Some(geo)) if candidate.graph_confidence > 0.0 => {
                let w = self.policy.graph_weight;
                w * candidate.graph_confidence + (1.0 - w) * geo
            }
            (_, Some(geo)) => candidate.graph_confidence.max(geo),
            (_, None) => candidate.graph_confidence,
        }
    }

    fn decide(
        &self,
        candidates: &[ScoredCandidate],
        ctx: &HopContext<'_>,
        reference: Option<&GeoReference>,
    ) -> Decision {
        let policy = &*self.policy;

        let graph_winner =
            best_by(candidates, |c| (!c.excluded).then_some(c.graph_score)).map(|index| {
                let c = &candidates[index];
                (index, c.graph_confidence, c.graph_method)
            });
        let geo_winner = best_by(candidates, |c| c.geographic.map(|g| g.score)).and_then(|index| {
            let winner = candidates[index].geographic?;
            let runner_up = candidates
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .filter_map(|(_, c)| c.geographic.map(|g| g.score))
                .max_by(f64::total_cmp);
            let kind = reference.map(|r| r.kind)?;
            Some((
                index,
                geo::selection_confidence(&winner, runner_up, kind),
                SelectionMethod::Geographic,
            ))
        });

        let selection = match (policy.combination_mode, graph_winner, geo_winner) {
            (CombinationMode::Combined, Some(graph), Some(geo)) if graph.0 == geo.0 => {
                let w = policy.graph_weight;
                Some((
                    graph.0,
                    w * graph.1 + (1.0 - w) * geo.1,
                    SelectionMethod::Combined,
                ))
            }
            // Combined mode falls back to graph-first when the winners disagree
            (_, graph, geo) => self.graph_first(candidates, ctx, graph, geo),
        };

        match selection {
            Some((index, confidence, method)) if confidence >= policy.min_selection_confidence => {
                Decision::Selected {
                    index,
                    confidence,
                    method,
                }
            }
            Some((index, confidence, _)) => Decision::Inconclusive {
                best_guess: Some((index, confidence)),
            },
            None => Decision::Inconclusive { best_guess: None },
        }
    }

    /// Graph winner at or above the override threshold, else the better of the two
    fn graph_first(
        &self,
        candidates: &[ScoredCandidate],
        ctx: &HopContext<'_>,
        graph: Option<Pick>,
        geo: Option<Pick>,
    ) -> Option<Pick> {
        let Some(graph) = graph else {
            return geo;
        };
        let final_without_location = ctx.is_final
            && candidates[graph.0].contact.usable_location().is_none()
            && geo.is_some();
        if graph.1 >= self.policy.override_threshold && !final_without_location {
            return Some(graph);
        }
        match geo {
            Some(geo) if geo.1 > graph.1 => Some(geo),
            _ => Some(graph),
        }
    }
}

fn bonus(score: f64, amount: f64) -> f64 {
    (score + amount).min(1.0)
}

/// Scale down scores for hops longer than the plausible maximum
pub fn distance_penalty(score: f64, distance_km: Option<f64>, policy: &ScoringPolicy) -> f64 {
    match distance_km {
        Some(d) if policy.distance_penalty_enabled && d > policy.max_reasonable_hop_km => {
            score * (1.0 - policy.distance_penalty_strength)
        }
        _ => score,
    }
}

/// Blend a final-hop score with proximity to the local node
///
/// `distance_km` is `None` when the candidate has no usable location.
pub fn final_hop_blend(score: f64, distance_km: Option<f64>, policy: &ScoringPolicy) -> f64 {
    let Some(distance) = distance_km else {
        return score * MISSING_LOCATION_FINAL_HOP_FACTOR;
    };
    let proximity = 1.0 - (distance / policy.final_hop_normalization_km).min(1.0);
    let base = policy.final_hop_weight;
    let weight = if distance < policy.final_hop_very_close_km {
        (base * 2.0).min(policy.final_hop_max_weight)
    } else if distance < policy.final_hop_close_km {
        (base * 1.5).min(CLOSE_WEIGHT_CAP)
    } else {
        base
    };
    score * (1.0 - weight) + proximity * weight
}

/// Index of the best candidate with a positive score
fn best_by<F>(candidates: &[ScoredCandidate], score_of: F) -> Option<usize>
where
    F: Fn(&ScoredCandidate) -> Option<f64>,
{
    candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| score_of(c).filter(|s| *s > 0.0).map(|s| (i, s, c)))
        .max_by(|(_, sa, a), (_, sb, b)| sa.total_cmp(sb).then_with(|| tie_break(a, b)))
        .map(|(i, _, _)| i)
}

/// Deterministic ordering between equally scored candidates
///
/// More observations, then fresher evidence, then more recently heard, then
/// the lexically smaller key.
fn tie_break(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    a.evidence
        .observation_count
        .cmp(&b.evidence.observation_count)
        .then_with(|| a.evidence.last_observed.cmp(&b.evidence.last_observed))
        .then_with(|| a.contact.last_seen.cmp(&b.contact.last_seen))
        .then_with(|| b.contact.public_key.cmp(&a.contact.public_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TopologyConfigBuilder, WritePolicy};
    use crate::edge::EdgeObservation;
    use crate::store::EdgeStore;
    use crate::test_utils::{contact, key, located_contact, persistence, prefix, MemoryEdgeStorage};
    use meshroute_core::HaversineGeography;

    fn store() -> EdgeStore {
        EdgeStore::new(
            Arc::new(MemoryEdgeStorage::new()),
            &persistence(WritePolicy::Batched),
        )
    }

    fn scorer(policy: ScoringPolicy) -> EvidenceScorer {
        EvidenceScorer::new(
            Arc::new(policy),
            Arc::new(HaversineGeography),
            Arc::new(PathHistory::default()),
        )
    }

    async fn observe(store: &EdgeStore, obs: EdgeObservation, times: u32) {
        for _ in 0..times {
            store.record_observation(obs.clone()).await;
        }
    }

    fn ctx<'a>(prev: &str, hop: &str, path: &'a [NodePrefix]) -> HopContext<'a> {
        HopContext {
            position: 2,
            prefix: prefix(hop),
            previous: Some(PathNode::new(prefix(prev), None)),
            previous_is_origin: false,
            next: None,
            path,
            is_final: false,
        }
    }

    #[test]
    fn test_distance_penalty_value() {
        let policy = ScoringPolicy::default();
        let penalized = distance_penalty(0.9, Some(100.0), &policy);
        assert!((penalized - 0.63).abs() < 1e-9);
        assert_eq!(distance_penalty(0.9, Some(20.0), &policy), 0.9);
        assert_eq!(distance_penalty(0.9, None, &policy), 0.9);
    }

    #[test]
    fn test_final_hop_blend_tiers() {
        let policy = ScoringPolicy::default();
        // Very close: weight doubles to 0.5
        let close = final_hop_blend(0.6, Some(0.0), &policy);
        assert!((close - (0.6 * 0.5 + 1.0 * 0.5)).abs() < 1e-9);
        // Far: base weight 0.25, proximity 0
        let far = final_hop_blend(0.6, Some(400.0), &policy);
        assert!((far - 0.45).abs() < 1e-9);
        assert!((final_hop_blend(0.6, None, &policy) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_method_display() {
        assert_eq!(SelectionMethod::GraphMultiHop.to_string(), "graph_multihop");
        assert_eq!(
            serde_json::to_string(&SelectionMethod::Geographic).unwrap(),
            "\"geographic\""
        );
    }

    #[tokio::test]
    async fn test_stored_key_breaks_prefix_collision() {
        let store = store();
        let true_key = key("7e11");
        observe(
            &store,
            EdgeObservation::new(prefix("01"), prefix("7e"), 2).with_to_key(true_key.clone()),
            5,
        )
        .await;

        let path = vec![prefix("01"), prefix("7e")];
        let scoring = scorer(ScoringPolicy::default()).score(
            &store.view(),
            &ctx("01", "7e", &path),
            vec![contact("7e22"), contact("7e11")],
            Utc::now(),
        );

        match scoring.decision {
            Decision::Selected { index, method, .. } => {
                assert_eq!(scoring.candidates[index].contact.public_key, true_key);
                assert_eq!(method, SelectionMethod::Graph);
            }
            other => panic!("expected selection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_weak_direct_edge_excludes_candidate() {
        let store = store();
        observe(&store, EdgeObservation::new(prefix("01"), prefix("7e"), 2), 2).await;

        let path = vec![prefix("01"), prefix("7e")];
        let scoring = scorer(ScoringPolicy::default()).score(
            &store.view(),
            &ctx("01", "7e", &path),
            vec![contact("7e22").with_starred(true).with_snr(9.0)],
            Utc::now(),
        );
        assert!(scoring.candidates[0].excluded);
        assert_eq!(scoring.candidates[0].graph_score, 0.0);
        assert_eq!(scoring.decision, Decision::Inconclusive { best_guess: None });
    }

    #[tokio::test]
    async fn test_weak_edge_leaves_geography_in_charge() {
        let store = store();
        observe(&store, EdgeObservation::new(prefix("01"), prefix("7e"), 2), 1).await;

        let path = vec![prefix("01"), prefix("7e"), prefix("3c")];
        let mut context = ctx("01", "7e", &path);
        context.previous = Some(PathNode::new(
            prefix("01"),
            Some(located_contact("0101", 47.60, -122.33)),
        ));

        let scoring = scorer(ScoringPolicy::default()).score(
            &store.view(),
            &context,
            vec![
                located_contact("7e22", 47.95, -122.90),
                located_contact("7e11", 47.61, -122.34),
            ],
            Utc::now(),
        );
        assert!(scoring.candidates.iter().all(|c| c.excluded));
        assert!(scoring.candidates.iter().all(|c| c.graph_score == 0.0));
        match scoring.decision {
            Decision::Selected { index, method, .. } => {
                assert_eq!(scoring.candidates[index].contact.public_key, key("7e11"));
                assert_eq!(method, SelectionMethod::Geographic);
            }
            other => panic!("expected geographic selection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_combined_disagreement_defers_to_graph_first() {
        let store = store();
        observe(&store, EdgeObservation::new(prefix("01"), prefix("7e"), 2), 5).await;

        let policy = TopologyConfigBuilder::new()
            .combination_mode(CombinationMode::Combined)
            .build()
            .scoring_policy()
            .unwrap();
        let path = vec![prefix("01"), prefix("7e")];
        let mut context = ctx("01", "7e", &path);
        context.previous = Some(PathNode::new(
            prefix("01"),
            Some(located_contact("0101", 47.60, -122.33)),
        ));

        // Same edge evidence; 7e22 wins the graph tie on last_seen, 7e11 is closer
        let now = Utc::now();
        let near = located_contact("7e11", 47.61, -122.34)
            .with_last_seen(now - chrono::Duration::minutes(1));
        let farther = located_contact("7e22", 47.80, -122.50).with_last_seen(now);

        let scoring = scorer(policy).score(&store.view(), &context, vec![near, farther], now);
        let graph = &scoring.candidates[1];
        assert!(graph.graph_confidence >= 0.7);
        assert!(graph.graph_confidence < scoring.candidates[0].geographic.unwrap().confidence());

        match scoring.decision {
            Decision::Selected {
                index,
                confidence,
                method,
            } => {
                assert_eq!(scoring.candidates[index].contact.public_key, key("7e22"));
                assert_eq!(method, SelectionMethod::Graph);
                assert_eq!(confidence, graph.graph_confidence);
            }
            other => panic!("expected graph selection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_long_hop_penalized_through_scoring() {
        let store = store();
        observe(&store, EdgeObservation::new(prefix("01"), prefix("7e"), 2), 11).await;

        let path = vec![prefix("01"), prefix("7e")];
        let mut context = ctx("01", "7e", &path);
        context.previous = Some(PathNode::new(
            prefix("01"),
            Some(located_contact("0101", 47.60, -122.33)),
        ));
        let scorer = scorer(ScoringPolicy::default());
        let now = Utc::now();

        let unplaced = scorer.score(&store.view(), &context, vec![contact("7e11")], now);
        assert!((unplaced.candidates[0].graph_score - 0.9).abs() < 1e-9);

        // About 100 km north of the previous node
        let distant = scorer.score(
            &store.view(),
            &context,
            vec![located_contact("7e11", 48.50, -122.33)],
            now,
        );
        assert!((distant.candidates[0].graph_score - 0.63).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_bidirectional_never_lowers_confidence() {
        let one_way = store();
        observe(&one_way, EdgeObservation::new(prefix("01"), prefix("7e"), 2), 4).await;
        let both_ways = store();
        observe(&both_ways, EdgeObservation::new(prefix("01"), prefix("7e"), 2), 4).await;
        observe(&both_ways, EdgeObservation::new(prefix("7e"), prefix("01"), 1), 4).await;

        let path = vec![prefix("01"), prefix("7e")];
        let now = Utc::now();
        let scorer = scorer(ScoringPolicy::default());
        let a = scorer.score(&one_way.view(), &ctx("01", "7e", &path), vec![contact("7e22")], now);
        let b = scorer.score(&both_ways.view(), &ctx("01", "7e", &path), vec![contact("7e22")], now);
        assert!(b.candidates[0].graph_confidence >= a.candidates[0].graph_confidence);
    }

    #[tokio::test]
    async fn test_multi_hop_fills_missing_direct_edge() {
        let store = store();
        observe(&store, EdgeObservation::new(prefix("01"), prefix("55"), 1), 6).await;
        observe(&store, EdgeObservation::new(prefix("55"), prefix("7e"), 2), 6).await;

        let path = vec![prefix("01"), prefix("7e")];
        let scoring = scorer(ScoringPolicy::default()).score(
            &store.view(),
            &ctx("01", "7e", &path),
            vec![contact("7e22")],
            Utc::now(),
        );
        let candidate = &scoring.candidates[0];
        assert_eq!(candidate.graph_method, SelectionMethod::GraphMultiHop);
        assert!(candidate.graph_confidence > 0.0);
        assert_eq!(candidate.evidence.chain.as_ref().unwrap().via, vec![prefix("55")]);
    }

    #[tokio::test]
    async fn test_geography_decides_without_graph_evidence() {
        let store = store();
        let policy = TopologyConfigBuilder::new()
            .multi_hop(false)
            .build()
            .scoring_policy()
            .unwrap();
        let path = vec![prefix("01"), prefix("7e")];
        let mut context = ctx("01", "7e", &path);
        context.previous = Some(PathNode::new(
            prefix("01"),
            Some(located_contact("0101", 47.60, -122.33)),
        ));

        let scoring = scorer(policy).score(
            &store.view(),
            &context,
            vec![
                located_contact("7e22", 47.95, -122.90),
                located_contact("7e11", 47.61, -122.34),
            ],
            Utc::now(),
        );
        match scoring.decision {
            Decision::Selected { index, method, .. } => {
                assert_eq!(scoring.candidates[index].contact.public_key, key("7e11"));
                assert_eq!(method, SelectionMethod::Geographic);
            }
            other => panic!("expected selection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_equal_scores_use_lexical_tie_break() {
        let store = store();
        let path = vec![prefix("01"), prefix("7e")];
        observe(&store, EdgeObservation::new(prefix("01"), prefix("7e"), 2), 6).await;
        let seen = Utc::now();
        let candidates = vec![
            Contact::new(key("7e99")).with_last_seen(seen),
            Contact::new(key("7e11")).with_last_seen(seen),
        ];

        let scoring = scorer(ScoringPolicy::default()).score(
            &store.view(),
            &ctx("01", "7e", &path),
            candidates,
            Utc::now(),
        );
        let (leader, _) = scoring.leading().unwrap();
        assert_eq!(leader.contact.public_key, key("7e11"));
    }
}
