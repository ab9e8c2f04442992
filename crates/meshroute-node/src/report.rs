//! JSON output of node commands

use meshroute_core::PublicKey;
use meshroute_graph::{
    CompactionReport, FlushReport, GraphStats, HopOutcome, ResolvedHop, ResolvedPath,
    SelectionMethod,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HopStatus {
    Resolved,
    Ambiguous,
    Unknown,
}

/// One hop as printed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopReport {
    pub prefix: String,
    pub position: u32,
    pub status: HopStatus,
    /// Resolved key, or the best guess for an ambiguous hop
    pub key: Option<PublicKey>,
    pub name: Option<String>,
    pub confidence: Option<f64>,
    pub method: Option<SelectionMethod>,
    pub candidates: usize,
}

impl From<&ResolvedHop> for HopReport {
    fn from(hop: &ResolvedHop) -> Self {
        let (status, key, name, confidence, method, candidates) = match &hop.outcome {
            HopOutcome::Resolved {
                contact,
                confidence,
                method,
            } => (
                HopStatus::Resolved,
                Some(contact.public_key.clone()),
                contact.name.clone(),
                Some(*confidence),
                Some(*method),
                hop.candidates.len().max(1),
            ),
            HopOutcome::Ambiguous {
                candidates,
                best_guess,
            } => (
                HopStatus::Ambiguous,
                best_guess.as_ref().map(|(c, _)| c.public_key.clone()),
                best_guess.as_ref().and_then(|(c, _)| c.name.clone()),
                best_guess.as_ref().map(|(_, confidence)| *confidence),
                None,
                *candidates,
            ),
            HopOutcome::Unknown => (HopStatus::Unknown, None, None, None, None, 0),
        };

        Self {
            prefix: hop.prefix.to_string(),
            position: hop.position,
            status,
            key,
            name,
            confidence,
            method,
            candidates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathReport {
    pub origin: Option<PublicKey>,
    pub hops: Vec<HopReport>,
    pub resolved: usize,
    pub observations_recorded: usize,
}

impl From<&ResolvedPath> for PathReport {
    fn from(path: &ResolvedPath) -> Self {
        Self {
            origin: path.origin.clone(),
            hops: path.hops.iter().map(HopReport::from).collect(),
            resolved: path.resolved_count(),
            observations_recorded: path.observations_recorded,
        }
    }
}

/// Summary of an `ingest` run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub paths: usize,
    pub fully_resolved: usize,
    pub observations: usize,
    pub flush: FlushReport,
}

impl IngestReport {
    pub fn new(resolved: &[ResolvedPath], flush: FlushReport) -> Self {
        Self {
            paths: resolved.len(),
            fully_resolved: resolved.iter().filter(|p| p.is_fully_resolved()).count(),
            observations: resolved.iter().map(|p| p.observations_recorded).sum(),
            flush,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub graph: GraphStats,
    pub persisted_edges: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactReport {
    pub older_than_days: u32,
    #[serde(flatten)]
    pub removed: CompactionReport,
}
