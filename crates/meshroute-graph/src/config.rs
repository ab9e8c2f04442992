//! Configuration types for topology inference
//!
//! [`TopologyConfig`] is the serde-facing configuration: every field has a
//! default and most numeric knobs can be left to a [`SelectionPreset`].
//! [`ScoringPolicy`] is the resolved, validated, immutable form that the scorer
//! and resolver hold for their whole lifetime.

use meshroute_core::{Location, NodePrefix, DEFAULT_PREFIX_WIDTH};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TopologyError};

/// Minimum observations before an edge counts as evidence
pub const DEFAULT_MIN_EDGE_OBSERVATIONS: u64 = 3;

/// Edges not observed for this many days are ignored when scoring
pub const DEFAULT_EDGE_EXPIRATION_DAYS: u32 = 7;

/// Default multi-hop search depth (links)
pub const DEFAULT_MULTI_HOP_MAX_HOPS: u8 = 2;

/// Deepest supported multi-hop search
pub const MAX_MULTI_HOP_HOPS: u8 = 3;

/// Default interval between batched flushes
pub const DEFAULT_BATCH_INTERVAL_SECS: u64 = 30;

/// Pending edges that trigger an early flush
pub const DEFAULT_BATCH_MAX_PENDING: usize = 100;

/// Pending edges kept before the oldest is evicted
pub const DEFAULT_MAX_PENDING_LIMIT: usize = 10_000;

/// Score multiplier for starred contacts
pub const DEFAULT_STAR_BIAS: f64 = 2.5;

/// Selections below this confidence are reported as ambiguous
pub const DEFAULT_MIN_SELECTION_CONFIDENCE: f64 = 0.5;

/// Candidates not heard for this many days are not considered
pub const DEFAULT_MAX_CANDIDATE_AGE_DAYS: u32 = 14;

/// Main configuration for topology inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Preset supplying defaults for thresholds not set explicitly
    #[serde(default)]
    pub preset: SelectionPreset,

    /// Hex characters per path fragment
    #[serde(default = "default_prefix_width")]
    pub prefix_width: usize,

    /// Identity and position of the local node
    #[serde(default)]
    pub local: LocalNodeConfig,

    /// Graph evidence settings
    #[serde(default)]
    pub graph: GraphEvidenceConfig,

    /// Multi-hop inference settings
    #[serde(default)]
    pub multi_hop: MultiHopConfig,

    /// How graph and geographic results are combined
    #[serde(default)]
    pub combination: CombinationConfig,

    /// Implausible hop distance penalty
    #[serde(default)]
    pub distance_penalty: DistancePenaltyConfig,

    /// Geographic scoring settings
    #[serde(default)]
    pub geography: GeographyConfig,

    /// Final hop proximity blending
    #[serde(default)]
    pub final_hop: FinalHopConfig,

    /// Edge persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_prefix_width() -> usize {
    DEFAULT_PREFIX_WIDTH
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            preset: SelectionPreset::default(),
            prefix_width: DEFAULT_PREFIX_WIDTH,
            local: LocalNodeConfig::default(),
            graph: GraphEvidenceConfig::default(),
            multi_hop: MultiHopConfig::default(),
            combination: CombinationConfig::default(),
            distance_penalty: DistancePenaltyConfig::default(),
            geography: GeographyConfig::default(),
            final_hop: FinalHopConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Named bundles of selection thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPreset {
    /// Trust strong graph evidence, fall back to geography
    #[default]
    Balanced,
    /// Lean on geography
    Geographic,
    /// Lean on graph evidence
    Graph,
}

impl SelectionPreset {
    /// Graph confidence at which geography is not consulted
    pub fn override_threshold(&self) -> f64 {
        match self {
            SelectionPreset::Balanced => 0.7,
            SelectionPreset::Geographic => 0.5,
            SelectionPreset::Graph => 0.9,
        }
    }

    /// Longest hop considered plausible
    pub fn max_reasonable_hop_km(&self) -> f64 {
        match self {
            SelectionPreset::Balanced | SelectionPreset::Geographic => 30.0,
            SelectionPreset::Graph => 50.0,
        }
    }

    /// Fraction removed from implausible hops
    pub fn distance_penalty_strength(&self) -> f64 {
        match self {
            SelectionPreset::Balanced => 0.3,
            SelectionPreset::Geographic => 0.5,
            SelectionPreset::Graph => 0.2,
        }
    }

    /// Weight of local proximity on the final hop
    pub fn final_hop_proximity_weight(&self) -> f64 {
        match self {
            SelectionPreset::Balanced => 0.25,
            SelectionPreset::Geographic => 0.4,
            SelectionPreset::Graph => 0.15,
        }
    }
}

/// Identity and position of the node running the resolver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalNodeConfig {
    /// Prefix of the local node; enables final hop edge recording
    #[serde(default)]
    pub prefix: Option<NodePrefix>,

    /// Position of the local node
    #[serde(default)]
    pub location: Option<Location>,

    /// Record the final hop to local node edge in both directions
    #[serde(default = "default_true")]
    pub record_neighbor_edges: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LocalNodeConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            location: None,
            record_neighbor_edges: true,
        }
    }
}

/// Graph evidence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEvidenceConfig {
    /// Observations required before an edge counts
    #[serde(default = "default_min_edge_observations")]
    pub min_edge_observations: u64,

    /// Ignore edges older than this many days (0 = never)
    #[serde(default = "default_edge_expiration_days")]
    pub edge_expiration_days: u32,

    /// Reward edges seen in both directions
    #[serde(default = "default_true")]
    pub use_bidirectional: bool,

    /// Reward edges seen at the same hop position
    #[serde(default = "default_true")]
    pub use_hop_position: bool,

    /// Reward candidates whose key was captured on an evidence edge
    #[serde(default = "default_true")]
    pub prefer_stored_keys: bool,

    /// Bonus for candidates heard directly
    #[serde(default = "default_zero_hop_bonus")]
    pub zero_hop_bonus: f64,

    /// Cap on the path validation bonus
    #[serde(default = "default_path_validation_max_bonus")]
    pub path_validation_max_bonus: f64,

    /// Observation count that earns the full observation part of the path bonus
    #[serde(default = "default_path_validation_obs_divisor")]
    pub path_validation_obs_divisor: f64,
}

fn default_min_edge_observations() -> u64 {
    DEFAULT_MIN_EDGE_OBSERVATIONS
}

fn default_edge_expiration_days() -> u32 {
    DEFAULT_EDGE_EXPIRATION_DAYS
}

fn default_zero_hop_bonus() -> f64 {
    0.4
}

fn default_path_validation_max_bonus() -> f64 {
    0.3
}

fn default_path_validation_obs_divisor() -> f64 {
    50.0
}

impl Default for GraphEvidenceConfig {
    fn default() -> Self {
        Self {
            min_edge_observations: DEFAULT_MIN_EDGE_OBSERVATIONS,
            edge_expiration_days: DEFAULT_EDGE_EXPIRATION_DAYS,
            use_bidirectional: true,
            use_hop_position: true,
            prefer_stored_keys: true,
            zero_hop_bonus: 0.4,
            path_validation_max_bonus: 0.3,
            path_validation_obs_divisor: 50.0,
        }
    }
}

/// Multi-hop inference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiHopConfig {
    /// Search for chains when direct evidence is missing or weak
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum links in an inferred chain (2 or 3)
    #[serde(default = "default_multi_hop_max_hops")]
    pub max_hops: u8,

    /// Scores below this consult the inferencer
    #[serde(default = "default_multi_hop_trigger")]
    pub trigger_below: f64,

    /// Per extra link multiplier
    #[serde(default = "default_multi_hop_reduction")]
    pub reduction: f64,
}

fn default_multi_hop_max_hops() -> u8 {
    DEFAULT_MULTI_HOP_MAX_HOPS
}

fn default_multi_hop_trigger() -> f64 {
    0.6
}

fn default_multi_hop_reduction() -> f64 {
    0.8
}

impl Default for MultiHopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hops: DEFAULT_MULTI_HOP_MAX_HOPS,
            trigger_below: 0.6,
            reduction: 0.8,
        }
    }
}

/// Strategy for merging graph and geographic winners
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationMode {
    /// Graph wins above the override threshold, geography otherwise
    #[default]
    GraphFirst,
    /// Weighted blend when both agree
    Combined,
}

/// Combination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationConfig {
    /// Combination strategy
    #[serde(default)]
    pub mode: CombinationMode,

    /// Graph weight in combined mode
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f64,

    /// Graph confidence that skips geography (preset when unset)
    #[serde(default)]
    pub override_threshold: Option<f64>,

    /// Selections below this are ambiguous
    #[serde(default = "default_min_selection_confidence")]
    pub min_selection_confidence: f64,
}

fn default_graph_weight() -> f64 {
    0.7
}

fn default_min_selection_confidence() -> f64 {
    DEFAULT_MIN_SELECTION_CONFIDENCE
}

impl Default for CombinationConfig {
    fn default() -> Self {
        Self {
            mode: CombinationMode::GraphFirst,
            graph_weight: 0.7,
            override_threshold: None,
            min_selection_confidence: DEFAULT_MIN_SELECTION_CONFIDENCE,
        }
    }
}

/// Distance penalty configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistancePenaltyConfig {
    /// Penalize implausibly long hops
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Longest plausible hop (preset when unset)
    #[serde(default)]
    pub max_reasonable_hop_km: Option<f64>,

    /// Fraction removed from implausible hops (preset when unset)
    #[serde(default)]
    pub strength: Option<f64>,
}

impl Default for DistancePenaltyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_reasonable_hop_km: None,
            strength: None,
        }
    }
}

/// Geographic scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeographyConfig {
    /// Score candidates by proximity and recency
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Weight of recency against proximity
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,

    /// Recency decay constant
    #[serde(with = "humantime_serde", default = "default_recency_half_life")]
    pub recency_half_life: Duration,

    /// Drop candidates farther than this from the reference (0 = unlimited)
    #[serde(default = "default_max_proximity_range_km")]
    pub max_proximity_range_km: f64,

    /// Score multiplier for starred contacts
    #[serde(default = "default_star_bias")]
    pub star_bias: f64,

    /// Ignore candidates not heard for this many days (0 = never)
    #[serde(default = "default_max_candidate_age_days")]
    pub max_candidate_age_days: u32,
}

fn default_recency_weight() -> f64 {
    0.4
}

fn default_recency_half_life() -> Duration {
    Duration::from_secs(12 * 3600) // 12 hours
}

fn default_max_proximity_range_km() -> f64 {
    200.0
}

fn default_star_bias() -> f64 {
    DEFAULT_STAR_BIAS
}

fn default_max_candidate_age_days() -> u32 {
    DEFAULT_MAX_CANDIDATE_AGE_DAYS
}

impl Default for GeographyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recency_weight: 0.4,
            recency_half_life: Duration::from_secs(12 * 3600),
            max_proximity_range_km: 200.0,
            star_bias: DEFAULT_STAR_BIAS,
            max_candidate_age_days: DEFAULT_MAX_CANDIDATE_AGE_DAYS,
        }
    }
}

/// Final hop proximity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalHopConfig {
    /// Blend local proximity into final hop graph scores
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base blend weight (preset when unset)
    #[serde(default)]
    pub weight: Option<f64>,

    /// Distance at which proximity reaches zero
    #[serde(default = "default_normalization_km")]
    pub normalization_km: f64,

    /// Distance under which the weight doubles
    #[serde(default = "default_very_close_km")]
    pub very_close_km: f64,

    /// Distance under which the weight grows by half
    #[serde(default = "default_close_km")]
    pub close_km: f64,

    /// Cap on the boosted weight
    #[serde(default = "default_final_hop_max_weight")]
    pub max_weight: f64,
}

fn default_normalization_km() -> f64 {
    200.0
}

fn default_very_close_km() -> f64 {
    10.0
}

fn default_close_km() -> f64 {
    30.0
}

fn default_final_hop_max_weight() -> f64 {
    0.6
}

impl Default for FinalHopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: None,
            normalization_km: 200.0,
            very_close_km: 10.0,
            close_km: 30.0,
            max_weight: 0.6,
        }
    }
}

/// When dirty edges reach durable storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Persist every observation before returning
    Immediate,
    /// Persist on a timer or when enough edges are pending
    Batched,
    /// Persist new edges immediately, batch increments
    #[default]
    Hybrid,
}

/// Edge persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Write policy
    #[serde(default)]
    pub write_policy: WritePolicy,

    /// Interval between batched flushes
    #[serde(with = "humantime_serde", default = "default_batch_interval")]
    pub batch_interval: Duration,

    /// Pending edges that trigger an early flush
    #[serde(default = "default_batch_max_pending")]
    pub batch_max_pending: usize,

    /// Pending edges kept before the oldest is evicted
    #[serde(default = "default_max_pending_limit")]
    pub max_pending_limit: usize,

    /// Days of edges loaded at startup (0 = all)
    #[serde(default)]
    pub startup_load_days: u32,
}

fn default_batch_interval() -> Duration {
    Duration::from_secs(DEFAULT_BATCH_INTERVAL_SECS)
}

fn default_batch_max_pending() -> usize {
    DEFAULT_BATCH_MAX_PENDING
}

fn default_max_pending_limit() -> usize {
    DEFAULT_MAX_PENDING_LIMIT
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            write_policy: WritePolicy::Hybrid,
            batch_interval: Duration::from_secs(DEFAULT_BATCH_INTERVAL_SECS),
            batch_max_pending: DEFAULT_BATCH_MAX_PENDING,
            max_pending_limit: DEFAULT_MAX_PENDING_LIMIT,
            startup_load_days: 0,
        }
    }
}

impl TopologyConfig {
    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TopologyError::InvalidConfig(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scorer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.prefix_width == 0 {
            return Err(invalid("prefix_width must be at least 1"));
        }
        if let Some(prefix) = &self.local.prefix {
            if prefix.as_str().len() != self.prefix_width {
                return Err(invalid(format!(
                    "local prefix {} does not match prefix_width {}",
                    prefix, self.prefix_width
                )));
            }
        }
        if !(2..=MAX_MULTI_HOP_HOPS).contains(&self.multi_hop.max_hops) {
            return Err(invalid(format!(
                "multi_hop.max_hops must be 2 or 3, got {}",
                self.multi_hop.max_hops
            )));
        }
        if !(self.multi_hop.reduction > 0.0 && self.multi_hop.reduction < 1.0) {
            return Err(invalid("multi_hop.reduction must be between 0 and 1"));
        }

        let unit_values = [
            ("multi_hop.trigger_below", Some(self.multi_hop.trigger_below)),
            ("combination.graph_weight", Some(self.combination.graph_weight)),
            (
                "combination.override_threshold",
                self.combination.override_threshold,
            ),
            (
                "combination.min_selection_confidence",
                Some(self.combination.min_selection_confidence),
            ),
            ("distance_penalty.strength", self.distance_penalty.strength),
            ("geography.recency_weight", Some(self.geography.recency_weight)),
            ("graph.zero_hop_bonus", Some(self.graph.zero_hop_bonus)),
            (
                "graph.path_validation_max_bonus",
                Some(self.graph.path_validation_max_bonus),
            ),
            ("final_hop.weight", self.final_hop.weight),
            ("final_hop.max_weight", Some(self.final_hop.max_weight)),
        ];
        for (name, value) in unit_values {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(invalid(format!("{} must be within [0, 1], got {}", name, v)));
                }
            }
        }

        if self.graph.path_validation_obs_divisor <= 0.0 {
            return Err(invalid("graph.path_validation_obs_divisor must be positive"));
        }
        if self.geography.star_bias < 1.0 {
            return Err(invalid("geography.star_bias must be at least 1"));
        }
        if self.geography.recency_half_life.is_zero() {
            return Err(invalid("geography.recency_half_life must be non-zero"));
        }
        if self.final_hop.normalization_km <= 0.0 {
            return Err(invalid("final_hop.normalization_km must be positive"));
        }
        if self.persistence.batch_max_pending == 0 {
            return Err(invalid("persistence.batch_max_pending must be at least 1"));
        }
        if self.persistence.max_pending_limit < self.persistence.batch_max_pending {
            return Err(invalid(
                "persistence.max_pending_limit must not be below batch_max_pending",
            ));
        }
        if self.persistence.batch_interval.is_zero() {
            return Err(invalid("persistence.batch_interval must be non-zero"));
        }
        Ok(())
    }

    /// Validate and resolve preset defaults into an immutable policy
    pub fn scoring_policy(&self) -> Result<ScoringPolicy> {
        self.validate()?;
        Ok(self.resolve_policy())
    }

    fn resolve_policy(&self) -> ScoringPolicy {
        let preset = self.preset;
        ScoringPolicy {
            prefix_width: self.prefix_width,
            local_prefix: self.local.prefix.clone(),
            local_location: self.local.location.filter(|loc| !loc.is_hidden()),
            record_neighbor_edges: self.local.record_neighbor_edges,
            min_edge_observations: self.graph.min_edge_observations,
            edge_expiration_days: self.graph.edge_expiration_days,
            use_bidirectional: self.graph.use_bidirectional,
            use_hop_position: self.graph.use_hop_position,
            prefer_stored_keys: self.graph.prefer_stored_keys,
            zero_hop_bonus: self.graph.zero_hop_bonus,
            path_validation_max_bonus: self.graph.path_validation_max_bonus,
            path_validation_obs_divisor: self.graph.path_validation_obs_divisor,
            multi_hop_enabled: self.multi_hop.enabled,
            multi_hop_max_hops: self.multi_hop.max_hops,
            multi_hop_trigger: self.multi_hop.trigger_below,
            multi_hop_reduction: self.multi_hop.reduction,
            combination_mode: self.combination.mode,
            graph_weight: self.combination.graph_weight,
            override_threshold: self
                .combination
                .override_threshold
                .unwrap_or_else(|| preset.override_threshold()),
            min_selection_confidence: self.combination.min_selection_confidence,
            distance_penalty_enabled: self.distance_penalty.enabled,
            max_reasonable_hop_km: self
                .distance_penalty
                .max_reasonable_hop_km
                .unwrap_or_else(|| preset.max_reasonable_hop_km()),
            distance_penalty_strength: self
                .distance_penalty
                .strength
                .unwrap_or_else(|| preset.distance_penalty_strength()),
            geography_enabled: self.geography.enabled,
            recency_weight: self.geography.recency_weight,
            recency_half_life_hours: self.geography.recency_half_life.as_secs_f64() / 3600.0,
            max_proximity_range_km: self.geography.max_proximity_range_km,
            star_bias: self.geography.star_bias,
            max_candidate_age_days: self.geography.max_candidate_age_days,
            final_hop_enabled: self.final_hop.enabled,
            final_hop_weight: self
                .final_hop
                .weight
                .unwrap_or_else(|| preset.final_hop_proximity_weight()),
            final_hop_normalization_km: self.final_hop.normalization_km,
            final_hop_very_close_km: self.final_hop.very_close_km,
            final_hop_close_km: self.final_hop.close_km,
            final_hop_max_weight: self.final_hop.max_weight,
        }
    }
}

fn invalid(message: impl Into<String>) -> TopologyError {
    TopologyError::InvalidConfig(message.into())
}

/// Resolved scoring settings
///
/// Built once from a validated [`TopologyConfig`] and shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringPolicy {
    pub prefix_width: usize,
    pub local_prefix: Option<NodePrefix>,
    pub local_location: Option<Location>,
    pub record_neighbor_edges: bool,

    pub min_edge_observations: u64,
    pub edge_expiration_days: u32,
    pub use_bidirectional: bool,
    pub use_hop_position: bool,
    pub prefer_stored_keys: bool,
    pub zero_hop_bonus: f64,
    pub path_validation_max_bonus: f64,
    pub path_validation_obs_divisor: f64,

    pub multi_hop_enabled: bool,
    pub multi_hop_max_hops: u8,
    pub multi_hop_trigger: f64,
    pub multi_hop_reduction: f64,

    pub combination_mode: CombinationMode,
    pub graph_weight: f64,
    pub override_threshold: f64,
    pub min_selection_confidence: f64,

    pub distance_penalty_enabled: bool,
    pub max_reasonable_hop_km: f64,
    pub distance_penalty_strength: f64,

    pub geography_enabled: bool,
    pub recency_weight: f64,
    pub recency_half_life_hours: f64,
    pub max_proximity_range_km: f64,
    pub star_bias: f64,
    pub max_candidate_age_days: u32,

    pub final_hop_enabled: bool,
    pub final_hop_weight: f64,
    pub final_hop_normalization_km: f64,
    pub final_hop_very_close_km: f64,
    pub final_hop_close_km: f64,
    pub final_hop_max_weight: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        TopologyConfig::default().resolve_policy()
    }
}

/// Builder for TopologyConfig
#[derive(Debug, Default)]
pub struct TopologyConfigBuilder {
    config: TopologyConfig,
}

impl TopologyConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a preset
    pub fn preset(mut self, preset: SelectionPreset) -> Self {
        self.config.preset = preset;
        self
    }

    /// Set the prefix width in hex characters
    pub fn prefix_width(mut self, width: usize) -> Self {
        self.config.prefix_width = width;
        self
    }

    /// Set the local node prefix
    pub fn local_prefix(mut self, prefix: NodePrefix) -> Self {
        self.config.local.prefix = Some(prefix);
        self
    }

    /// Set the local node position
    pub fn local_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.config.local.location = Some(Location::new(latitude, longitude));
        self
    }

    /// Set the evidence observation threshold
    pub fn min_edge_observations(mut self, count: u64) -> Self {
        self.config.graph.min_edge_observations = count;
        self
    }

    /// Set the edge expiration horizon
    pub fn edge_expiration_days(mut self, days: u32) -> Self {
        self.config.graph.edge_expiration_days = days;
        self
    }

    /// Enable or disable the bidirectional bonus
    pub fn bidirectional(mut self, enabled: bool) -> Self {
        self.config.graph.use_bidirectional = enabled;
        self
    }

    /// Enable or disable multi-hop inference
    pub fn multi_hop(mut self, enabled: bool) -> Self {
        self.config.multi_hop.enabled = enabled;
        self
    }

    /// Set the multi-hop depth
    pub fn multi_hop_max_hops(mut self, hops: u8) -> Self {
        self.config.multi_hop.max_hops = hops.clamp(2, MAX_MULTI_HOP_HOPS);
        self
    }

    /// Set the combination mode
    pub fn combination_mode(mut self, mode: CombinationMode) -> Self {
        self.config.combination.mode = mode;
        self
    }

    /// Override the distance penalty threshold and strength
    pub fn distance_penalty(mut self, max_reasonable_hop_km: f64, strength: f64) -> Self {
        self.config.distance_penalty.enabled = true;
        self.config.distance_penalty.max_reasonable_hop_km = Some(max_reasonable_hop_km);
        self.config.distance_penalty.strength = Some(strength);
        self
    }

    /// Enable or disable geographic scoring
    pub fn geography(mut self, enabled: bool) -> Self {
        self.config.geography.enabled = enabled;
        self
    }

    /// Set the candidate age filter
    pub fn max_candidate_age_days(mut self, days: u32) -> Self {
        self.config.geography.max_candidate_age_days = days;
        self
    }

    /// Set the write policy
    pub fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.config.persistence.write_policy = policy;
        self
    }

    /// Set the batch flush interval
    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.config.persistence.batch_interval = interval;
        self
    }

    /// Set the pending count that triggers a flush
    pub fn batch_max_pending(mut self, count: usize) -> Self {
        self.config.persistence.batch_max_pending = count;
        self
    }

    /// Set the pending set bound
    pub fn max_pending_limit(mut self, count: usize) -> Self {
        self.config.persistence.max_pending_limit = count;
        self
    }

    /// Set how many days of edges are loaded at startup
    pub fn startup_load_days(mut self, days: u32) -> Self {
        self.config.persistence.startup_load_days = days;
        self
    }

    /// Build the configuration
    pub fn build(self) -> TopologyConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
