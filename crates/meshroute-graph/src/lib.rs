//! Meshroute Graph - Topology inference for lossy mesh radio networks
//!
//! Mesh packets carry their routing path as a list of short key prefixes, so
//! a prefix like `7e` may stand for any of several known repeaters. This crate
//! learns which nodes actually forward to which from the paths it hears, and
//! uses that graph (plus geography) to say which `7e` a given path went through.
//!
//! # Architecture
//!
//! 1. **Edge Store** ([`EdgeStore`]) - directed edge graph with adjacency indices,
//!    mirrored to an [`EdgeStorage`](meshroute_core::EdgeStorage)
//! 2. **Write Scheduler** ([`spawn_flush_task`]) - immediate, batched or hybrid persistence
//! 3. **Evidence Scorer** ([`EvidenceScorer`]) - graph and geographic candidate scoring
//! 4. **Multi-Hop Inference** ([`infer_chain`]) - bounded search for indirect links
//! 5. **Path Resolver** ([`PathResolver`]) - walks paths and feeds evidence back
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use meshroute_graph::{EdgeStore, PathResolver, ObservedPath, TopologyConfig, spawn_flush_task};
//! use meshroute_core::HaversineGeography;
//! use meshroute_state::SqliteEdgeStore;
//!
//! let config = TopologyConfig::default();
//! let storage = Arc::new(SqliteEdgeStore::open("edges.db").await?);
//! let store = Arc::new(EdgeStore::new(storage, &config.persistence));
//! store.load(config.persistence.startup_load_days).await?;
//! let flusher = spawn_flush_task(store.clone());
//!
//! let resolver = PathResolver::new(
//!     store,
//!     Arc::new(registry),
//!     Arc::new(HaversineGeography),
//!     Arc::new(config.scoring_policy()?),
//! );
//! let resolved = resolver.resolve(ObservedPath::parse("7e,a1,3c", 2)?).await;
//!
//! flusher.shutdown().await?;
//! ```

pub mod config;
pub mod edge;
pub mod error;
pub mod geo;
pub mod multihop;
pub mod paths;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod scorer;
pub mod store;
pub mod test_utils;

// Re-exports for convenience
pub use config::{
    CombinationMode, ScoringPolicy, SelectionPreset, TopologyConfig, TopologyConfigBuilder,
    WritePolicy,
};
pub use edge::{segment_confidence, EdgeObservation};
pub use error::{Result, TopologyError};
pub use geo::{GeoReference, GeoScore, ReferenceKind};
pub use multihop::{infer_chain, InferredChain};
pub use paths::{PathHistory, PathSignature};
pub use registry::InMemoryContactRegistry;
pub use resolver::{HopOutcome, ObservedPath, PathResolver, ResolvedHop, ResolvedPath};
pub use scheduler::{spawn_flush_task, FlushReport, PendingWrites, SchedulerHandle};
pub use scorer::{
    Decision, Evidence, EvidenceScorer, HopContext, HopScoring, PathNode, ScoredCandidate,
    SelectionMethod,
};
pub use store::{CompactionReport, EdgeEvent, EdgeStore, GraphStats, GraphView, RecordedEdge};
