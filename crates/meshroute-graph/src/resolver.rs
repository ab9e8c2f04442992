//! Path resolution
//!
//! A [`PathResolver`] walks an observed path left to right, resolving each
//! prefix to a known contact where the evidence allows. The contact chosen for
//! one hop (or the best guess, when nothing was conclusive) becomes the
//! previous node for the next. After the walk every adjacent pair of the path
//! is fed back into the [`EdgeStore`] as a new observation.
//!
//! Resolution never fails; missing evidence shows up as
//! [`HopOutcome::Ambiguous`] or [`HopOutcome::Unknown`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use meshroute_core::{
    Contact, ContactRegistry, GeographyProvider, Location, NodePrefix, PublicKey,
};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::ScoringPolicy;
use crate::edge::EdgeObservation;
use crate::paths::PathHistory;
use crate::scorer::{
    Decision, EvidenceScorer, HopContext, PathNode, ScoredCandidate, SelectionMethod,
};
use crate::store::EdgeStore;

/// A routing path as heard on the air
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedPath {
    /// Repeater prefixes in forwarding order
    pub hops: Vec<NodePrefix>,
    /// Full key of the originator, when the packet carried it
    pub origin: Option<PublicKey>,
    pub observed_at: DateTime<Utc>,
}

impl ObservedPath {
    pub fn new(hops: Vec<NodePrefix>) -> Self {
        Self {
            hops,
            origin: None,
            observed_at: Utc::now(),
        }
    }

    /// Parse a comma separated path such as `"7e,a1,3c"`
    pub fn parse(path: &str, prefix_width: usize) -> meshroute_core::Result<Self> {
        Ok(Self::new(NodePrefix::parse_path(path, prefix_width)?))
    }

    pub fn with_origin(mut self, origin: PublicKey) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }
}

/// What became of one hop
#[derive(Debug, Clone, PartialEq)]
pub enum HopOutcome {
    Resolved {
        contact: Contact,
        confidence: f64,
        method: SelectionMethod,
    },
    /// Several candidates and no conclusive evidence
    Ambiguous {
        candidates: usize,
        best_guess: Option<(Contact, f64)>,
    },
    /// No known node has this prefix
    Unknown,
}

impl HopOutcome {
    /// Resolved contact
    pub fn contact(&self) -> Option<&Contact> {
        match self {
            HopOutcome::Resolved { contact, .. } => Some(contact),
            _ => None,
        }
    }

    /// Resolved contact or best guess
    pub fn contact_or_guess(&self) -> Option<&Contact> {
        match self {
            HopOutcome::Resolved { contact, .. } => Some(contact),
            HopOutcome::Ambiguous {
                best_guess: Some((contact, _)),
                ..
            } => Some(contact),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, HopOutcome::Resolved { .. })
    }

    /// Key of a hop that could only be one node
    fn certain_key(&self) -> Option<&PublicKey> {
        match self {
            HopOutcome::Resolved {
                contact,
                method: SelectionMethod::Unique,
                ..
            } => Some(&contact.public_key),
            _ => None,
        }
    }
}

/// One resolved hop
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHop {
    pub prefix: NodePrefix,
    /// Index in the context sequence (the originator, when known, is 0)
    pub position: u32,
    pub outcome: HopOutcome,
    /// Scored candidates, empty unless the scorer ran
    pub candidates: Vec<ScoredCandidate>,
}

/// A fully walked path
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub origin: Option<PublicKey>,
    pub hops: Vec<ResolvedHop>,
    /// Edge observations fed back into the graph
    pub observations_recorded: usize,
}

impl ResolvedPath {
    pub fn resolved_count(&self) -> usize {
        self.hops.iter().filter(|h| h.outcome.is_resolved()).count()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.hops.iter().all(|h| h.outcome.is_resolved())
    }
}

/// Resolves observed paths and feeds the results back as edge evidence
pub struct PathResolver {
    store: Arc<EdgeStore>,
    registry: Arc<dyn ContactRegistry>,
    geography: Arc<dyn GeographyProvider>,
    history: Arc<PathHistory>,
    policy: Arc<ScoringPolicy>,
    scorer: EvidenceScorer,
}

impl PathResolver {
    pub fn new(
        store: Arc<EdgeStore>,
        registry: Arc<dyn ContactRegistry>,
        geography: Arc<dyn GeographyProvider>,
        policy: Arc<ScoringPolicy>,
    ) -> Self {
        Self::with_history(store, registry, geography, policy, Arc::new(PathHistory::default()))
    }

    /// Share a path history with other resolvers
    pub fn with_history(
        store: Arc<EdgeStore>,
        registry: Arc<dyn ContactRegistry>,
        geography: Arc<dyn GeographyProvider>,
        policy: Arc<ScoringPolicy>,
        history: Arc<PathHistory>,
    ) -> Self {
        let scorer = EvidenceScorer::new(policy.clone(), geography.clone(), history.clone());
        Self {
            store,
            registry,
            geography,
            history,
            policy,
            scorer,
        }
    }

    pub fn store(&self) -> &Arc<EdgeStore> {
        &self.store
    }

    pub fn history(&self) -> &Arc<PathHistory> {
        &self.history
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Resolve a path and record it as evidence
    pub async fn resolve(&self, path: ObservedPath) -> ResolvedPath {
        let mut resolved = self.resolve_only(&path, Utc::now());
        resolved.observations_recorded = self.record_path(&path, &resolved).await;
        debug!(
            hops = resolved.hops.len(),
            resolved = resolved.resolved_count(),
            recorded = resolved.observations_recorded,
            "Resolved path"
        );
        resolved
    }

    /// Resolve paths one after another; each is independent of the others' outcome
    pub async fn resolve_batch(&self, paths: Vec<ObservedPath>) -> Vec<ResolvedPath> {
        stream::iter(paths)
            .then(|path| self.resolve(path))
            .collect::<Vec<_>>()
            .await
    }

    /// Resolve without recording anything
    pub fn resolve_only(&self, path: &ObservedPath, now: DateTime<Utc>) -> ResolvedPath {
        let width = self.policy.prefix_width;
        let origin_contact = path.origin.as_ref().map(|key| {
            self.registry
                .contact(key)
                .unwrap_or_else(|| Contact::new(key.clone()))
        });
        let offset = u32::from(origin_contact.is_some());
        let mut previous = origin_contact.map(|c| PathNode::new(c.prefix(width), Some(c)));

        let mut hops = Vec::with_capacity(path.hops.len());
        for (i, prefix) in path.hops.iter().enumerate() {
            let position = i as u32 + offset;
            let next = path
                .hops
                .get(i + 1)
                .map(|p| PathNode::new(p.clone(), self.locate(p, now)));
            let ctx = HopContext {
                position,
                prefix: prefix.clone(),
                previous: previous.clone(),
                previous_is_origin: i == 0 && offset == 1,
                next,
                path: &path.hops,
                is_final: i + 1 == path.hops.len(),
            };

            let hop = self.resolve_hop(&ctx, now);
            trace!(hop = %prefix, position, outcome = ?hop.outcome, "Resolved hop");
            previous = Some(PathNode::new(
                prefix.clone(),
                hop.outcome.contact_or_guess().cloned(),
            ));
            hops.push(hop);
        }

        ResolvedPath {
            origin: path.origin.clone(),
            hops,
            observations_recorded: 0,
        }
    }

    fn resolve_hop(&self, ctx: &HopContext<'_>, now: DateTime<Utc>) -> ResolvedHop {
        let mut candidates = self.candidates(&ctx.prefix, now);
        let (outcome, scored) = match candidates.len() {
            0 => (HopOutcome::Unknown, Vec::new()),
            1 => {
                let contact = candidates.remove(0);
                (
                    HopOutcome::Resolved {
                        contact,
                        confidence: 1.0,
                        method: SelectionMethod::Unique,
                    },
                    Vec::new(),
                )
            }
            count => {
                let scoring = {
                    let view = self.store.view();
                    self.scorer.score(&view, ctx, candidates, now)
                };
                let outcome = match scoring.decision {
                    Decision::Selected {
                        index,
                        confidence,
                        method,
                    } => HopOutcome::Resolved {
                        contact: scoring.candidates[index].contact.clone(),
                        confidence,
                        method,
                    },
                    Decision::Inconclusive { .. } => HopOutcome::Ambiguous {
                        candidates: count,
                        best_guess: scoring
                            .leading()
                            .map(|(candidate, confidence)| (candidate.contact.clone(), confidence)),
                    },
                };
                (outcome, scoring.candidates)
            }
        };

        ResolvedHop {
            prefix: ctx.prefix.clone(),
            position: ctx.position,
            outcome,
            candidates: scored,
        }
    }

    /// Same-prefix contacts heard recently enough to be considered
    fn candidates(&self, prefix: &NodePrefix, now: DateTime<Utc>) -> Vec<Contact> {
        let max_age = self.policy.max_candidate_age_days;
        let mut contacts = self.registry.contacts_with_prefix(prefix);
        if max_age > 0 {
            let cutoff = now - ChronoDuration::days(max_age as i64);
            contacts.retain(|c| c.last_seen.map_or(true, |seen| seen >= cutoff));
        }
        contacts
    }

    /// Best located contact for a neighbouring prefix
    fn locate(&self, prefix: &NodePrefix, now: DateTime<Utc>) -> Option<Contact> {
        self.candidates(prefix, now)
            .into_iter()
            .filter(|c| c.usable_location().is_some())
            .max_by(|a, b| {
                a.starred
                    .cmp(&b.starred)
                    .then_with(|| a.last_seen.cmp(&b.last_seen))
                    .then_with(|| b.public_key.cmp(&a.public_key))
            })
    }

    /// Feed every adjacent pair of the path back into the graph
    ///
    /// Keys are attached only when the node is certain: the originator, and
    /// hops with a single possible contact. Returns the number of observations
    /// recorded.
    pub async fn record_path(&self, path: &ObservedPath, resolved: &ResolvedPath) -> usize {
        let width = self.policy.prefix_width;

        struct Node {
            prefix: NodePrefix,
            key: Option<PublicKey>,
            location: Option<Location>,
        }

        let mut nodes = Vec::with_capacity(path.hops.len() + 2);
        if let Some(origin) = &path.origin {
            nodes.push(Node {
                prefix: origin.prefix(width),
                key: Some(origin.clone()),
                location: self
                    .registry
                    .contact(origin)
                    .and_then(|c| c.usable_location()),
            });
        }
        for hop in &resolved.hops {
            nodes.push(Node {
                prefix: hop.prefix.clone(),
                key: hop.outcome.certain_key().cloned(),
                location: hop.outcome.contact().and_then(Contact::usable_location),
            });
        }

        let mut observations = Vec::with_capacity(nodes.len() + 1);
        for (i, pair) in nodes.windows(2).enumerate() {
            let (from, to) = (&pair[0], &pair[1]);
            observations.push(self.observation(
                (&from.prefix, from.key.as_ref(), from.location),
                (&to.prefix, to.key.as_ref(), to.location),
                i as u32 + 1,
                path.observed_at,
            ));
        }

        if self.policy.record_neighbor_edges {
            if let (Some(local), Some(last)) = (&self.policy.local_prefix, nodes.last()) {
                if &last.prefix != local {
                    let local_location = self.policy.local_location;
                    observations.push(self.observation(
                        (&last.prefix, last.key.as_ref(), last.location),
                        (local, None, local_location),
                        nodes.len() as u32,
                        path.observed_at,
                    ));
                    observations.push(self.observation(
                        (local, None, local_location),
                        (&last.prefix, last.key.as_ref(), last.location),
                        1,
                        path.observed_at,
                    ));
                }
            }
        }

        let recorded = observations.len();
        for observation in observations {
            self.store.record_observation(observation).await;
        }

        if let Some(origin) = &path.origin {
            self.history.record(origin, &path.hops, path.observed_at);
        }
        recorded
    }

    fn observation(
        &self,
        from: (&NodePrefix, Option<&PublicKey>, Option<Location>),
        to: (&NodePrefix, Option<&PublicKey>, Option<Location>),
        hop_index: u32,
        observed_at: DateTime<Utc>,
    ) -> EdgeObservation {
        let mut observation =
            EdgeObservation::new(from.0.clone(), to.0.clone(), hop_index).at(observed_at);
        if let Some(key) = from.1 {
            observation = observation.with_from_key(key.clone());
        }
        if let Some(key) = to.1 {
            observation = observation.with_to_key(key.clone());
        }
        if let (Some(a), Some(b)) = (from.2, to.2) {
            observation = observation.with_distance(self.geography.distance_km(&a, &b));
        }
        observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TopologyConfigBuilder, WritePolicy};
    use crate::registry::InMemoryContactRegistry;
    use crate::test_utils::{contact, key, persistence, prefix, MemoryEdgeStorage};
    use meshroute_core::HaversineGeography;

    fn resolver(contacts: Vec<Contact>, policy: ScoringPolicy) -> PathResolver {
        let store = Arc::new(EdgeStore::new(
            Arc::new(MemoryEdgeStorage::new()),
            &persistence(WritePolicy::Batched),
        ));
        PathResolver::new(
            store,
            Arc::new(InMemoryContactRegistry::from_contacts(2, contacts)),
            Arc::new(HaversineGeography),
            Arc::new(policy),
        )
    }

    #[tokio::test]
    async fn test_unique_and_unknown_hops() {
        let resolver = resolver(vec![contact("a1b2")], ScoringPolicy::default());
        let resolved = resolver
            .resolve(ObservedPath::parse("a1,3c", 2).unwrap())
            .await;

        assert_eq!(resolved.hops.len(), 2);
        match &resolved.hops[0].outcome {
            HopOutcome::Resolved {
                contact,
                confidence,
                method,
            } => {
                assert_eq!(contact.public_key, key("a1b2"));
                assert_eq!(*confidence, 1.0);
                assert_eq!(*method, SelectionMethod::Unique);
            }
            other => panic!("expected unique resolution, got {:?}", other),
        }
        assert_eq!(resolved.hops[1].outcome, HopOutcome::Unknown);
        assert_eq!(resolved.observations_recorded, 1);

        // The unique hop's key was captured
        let edge = resolver
            .store()
            .get_edge(&prefix("a1"), &prefix("3c"))
            .unwrap();
        assert_eq!(edge.stored_from_key, Some(key("a1b2")));
        assert_eq!(edge.hop_count_at(1), 1);
    }

    #[tokio::test]
    async fn test_origin_shifts_positions_and_records_history() {
        let resolver = resolver(vec![contact("a1b2")], ScoringPolicy::default());
        let origin = key("0102");
        let path = ObservedPath::parse("a1,3c", 2)
            .unwrap()
            .with_origin(origin.clone());
        let resolved = resolver.resolve(path).await;

        assert_eq!(resolved.hops[0].position, 1);
        assert_eq!(resolved.observations_recorded, 2);
        let first = resolver
            .store()
            .get_edge(&prefix("01"), &prefix("a1"))
            .unwrap();
        assert_eq!(first.stored_from_key, Some(origin.clone()));
        assert_eq!(first.hop_count_at(1), 1);
        assert_eq!(resolver.history().signatures(&origin).len(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_without_evidence() {
        let resolver = resolver(vec![contact("7e11"), contact("7e22")], ScoringPolicy::default());
        let resolved = resolver.resolve_only(&ObservedPath::parse("7e", 2).unwrap(), Utc::now());
        match &resolved.hops[0].outcome {
            HopOutcome::Ambiguous { candidates, .. } => assert_eq!(*candidates, 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
        assert_eq!(resolved.hops[0].candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_candidates_are_filtered() {
        let stale = Contact::new(key("7e11")).with_last_seen(Utc::now() - ChronoDuration::days(30));
        let resolver = resolver(vec![stale, contact("7e22")], ScoringPolicy::default());
        let resolved = resolver.resolve_only(&ObservedPath::parse("7e", 2).unwrap(), Utc::now());
        assert_eq!(
            resolved.hops[0].outcome.contact().map(|c| c.public_key.clone()),
            Some(key("7e22"))
        );
    }

    #[tokio::test]
    async fn test_local_neighbor_edges_recorded_both_ways() {
        let policy = TopologyConfigBuilder::new()
            .local_prefix(prefix("ff"))
            .build()
            .scoring_policy()
            .unwrap();
        let resolver = resolver(vec![], policy);
        let resolved = resolver
            .resolve(ObservedPath::parse("10,20", 2).unwrap())
            .await;

        assert_eq!(resolved.observations_recorded, 3);
        let inbound = resolver
            .store()
            .get_edge(&prefix("20"), &prefix("ff"))
            .unwrap();
        assert_eq!(inbound.hop_count_at(2), 1);
        assert!(resolver.store().has_edge(&prefix("ff"), &prefix("20")));
    }

    #[tokio::test]
    async fn test_empty_path() {
        let resolver = resolver(vec![], ScoringPolicy::default());
        let resolved = resolver.resolve(ObservedPath::new(Vec::new())).await;
        assert!(resolved.hops.is_empty());
        assert_eq!(resolved.observations_recorded, 0);
        assert!(resolved.is_fully_resolved());
    }
}
