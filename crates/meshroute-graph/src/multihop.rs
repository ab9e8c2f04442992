//! Multi-hop chain inference
//!
//! When there is no usable direct edge between two nodes, a chain of strong
//! edges through intermediate nodes is weaker evidence that they are related.
//! The search is a breadth-first walk over outgoing adjacency, bounded by the
//! configured depth, that never revisits a node.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use meshroute_core::{EdgeRecord, NodePrefix};
use std::collections::VecDeque;
use tracing::trace;

use crate::config::ScoringPolicy;
use crate::edge::segment_confidence;
use crate::store::GraphView;

/// Bonus per segment when the reverse edge is also established
pub const BIDIRECTIONAL_BONUS: f64 = 0.15;

/// A chain of edges linking two nodes
#[derive(Debug, Clone, PartialEq)]
pub struct InferredChain {
    /// Nodes strictly between the endpoints
    pub via: Vec<NodePrefix>,
    /// Confidence after the per-link reduction
    pub confidence: f64,
    /// Observation count of the weakest link
    pub weakest_observations: u64,
    /// Most recent observation across the links
    pub last_observed: DateTime<Utc>,
}

impl InferredChain {
    pub fn links(&self) -> usize {
        self.via.len() + 1
    }
}

/// An edge that clears the observation threshold and expiration horizon
pub(crate) fn usable_edge(
    view: &GraphView<'_>,
    from: &NodePrefix,
    to: &NodePrefix,
    policy: &ScoringPolicy,
    now: DateTime<Utc>,
) -> Option<EdgeRecord> {
    view.edge(from, to)
        .filter(|edge| edge.observation_count >= policy.min_edge_observations)
        .filter(|edge| is_live(edge, policy, now))
}

pub(crate) fn is_live(edge: &EdgeRecord, policy: &ScoringPolicy, now: DateTime<Utc>) -> bool {
    policy.edge_expiration_days == 0
        || now - edge.last_observed <= ChronoDuration::days(policy.edge_expiration_days as i64)
}

/// Segment confidence plus the bidirectional bonus, clamped to 1
pub(crate) fn link_confidence(
    view: &GraphView<'_>,
    edge: &EdgeRecord,
    policy: &ScoringPolicy,
    now: DateTime<Utc>,
) -> f64 {
    let mut confidence = segment_confidence(edge, now);
    if policy.use_bidirectional
        && usable_edge(view, &edge.key.to, &edge.key.from, policy, now).is_some()
    {
        confidence += BIDIRECTIONAL_BONUS;
    }
    confidence.min(1.0)
}

struct Partial {
    nodes: Vec<NodePrefix>,
    weakest: f64,
    weakest_observations: u64,
    last_observed: DateTime<Utc>,
}

/// Best chain of two or more links from `from` to `to`
///
/// Chains score `min(link confidences) * reduction^(links - 1)`. Among equal
/// scores the shorter chain is kept, then the first found in prefix order.
pub fn infer_chain(
    view: &GraphView<'_>,
    from: &NodePrefix,
    to: &NodePrefix,
    policy: &ScoringPolicy,
    now: DateTime<Utc>,
) -> Option<InferredChain> {
    if from == to {
        return None;
    }
    let max_links = policy.multi_hop_max_hops.max(2) as usize;

    let mut best: Option<InferredChain> = None;
    let mut queue = VecDeque::new();
    queue.push_back(Partial {
        nodes: vec![from.clone()],
        weakest: 1.0,
        weakest_observations: u64::MAX,
        last_observed: DateTime::<Utc>::MIN_UTC,
    });

    while let Some(partial) = queue.pop_front() {
        let links = partial.nodes.len() - 1;
        let Some(tail) = partial.nodes.last() else {
            continue;
        };

        for next in view.successors(tail) {
            if partial.nodes.contains(next) {
                continue;
            }
            // A direct link is not a chain
            if next == to && links == 0 {
                continue;
            }
            let Some(edge) = usable_edge(view, tail, next, policy, now) else {
                continue;
            };

            let weakest = partial.weakest.min(link_confidence(view, &edge, policy, now));
            let weakest_observations = partial.weakest_observations.min(edge.observation_count);
            let last_observed = partial.last_observed.max(edge.last_observed);

            if next == to {
                let total_links = links + 1;
                let confidence =
                    weakest * policy.multi_hop_reduction.powi(total_links as i32 - 1);
                let better = best.as_ref().map_or(true, |b| {
                    confidence > b.confidence
                        || (confidence == b.confidence && total_links < b.links())
                });
                if better {
                    best = Some(InferredChain {
                        via: partial.nodes[1..].to_vec(),
                        confidence,
                        weakest_observations,
                        last_observed,
                    });
                }
            } else if links + 1 < max_links {
                let mut nodes = partial.nodes.clone();
                nodes.push(next.clone());
                queue.push_back(Partial {
                    nodes,
                    weakest,
                    weakest_observations,
                    last_observed,
                });
            }
        }
    }

    if let Some(chain) = &best {
        trace!(
            from = %from,
            to = %to,
            links = chain.links(),
            confidence = chain.confidence,
            "Inferred multi-hop chain"
        );
    }
    best
}
