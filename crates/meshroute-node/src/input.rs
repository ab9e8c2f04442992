//! Files read at startup: configuration, contacts and recorded paths

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use meshroute_core::{Contact, PublicKey};
use meshroute_graph::{InMemoryContactRegistry, ObservedPath, TopologyConfig};
use serde::Deserialize;
use std::path::Path;

/// One entry of a paths file
#[derive(Debug, Clone, Deserialize)]
pub struct PathEntry {
    /// Comma separated prefixes, e.g. `"7e,a1,3c"`
    pub path: String,
    #[serde(default)]
    pub origin: Option<PublicKey>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl PathEntry {
    pub fn into_observed(self, prefix_width: usize) -> Result<ObservedPath> {
        let mut observed = ObservedPath::parse(&self.path, prefix_width)
            .with_context(|| format!("invalid path {:?}", self.path))?;
        if let Some(origin) = self.origin {
            observed = observed.with_origin(origin);
        }
        if let Some(at) = self.observed_at {
            observed = observed.at(at);
        }
        Ok(observed)
    }
}

/// Configuration from an optional JSON file, defaults otherwise
pub async fn read_config(path: Option<&Path>) -> Result<TopologyConfig> {
    match path {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading config {}", path.display()))?;
            TopologyConfig::from_json(&json)
                .with_context(|| format!("loading config {}", path.display()))
        }
        None => Ok(TopologyConfig::default()),
    }
}

pub fn parse_contacts(json: &str, prefix_width: usize) -> Result<InMemoryContactRegistry> {
    let contacts: Vec<Contact> = serde_json::from_str(json).context("parsing contacts")?;
    Ok(InMemoryContactRegistry::from_contacts(prefix_width, contacts))
}

pub async fn read_contacts(path: &Path, prefix_width: usize) -> Result<InMemoryContactRegistry> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading contacts {}", path.display()))?;
    parse_contacts(&json, prefix_width)
}

pub fn parse_paths(json: &str, prefix_width: usize) -> Result<Vec<ObservedPath>> {
    let entries: Vec<PathEntry> = serde_json::from_str(json).context("parsing paths")?;
    entries
        .into_iter()
        .map(|entry| entry.into_observed(prefix_width))
        .collect()
}

pub async fn read_paths(path: &Path, prefix_width: usize) -> Result<Vec<ObservedPath>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading paths {}", path.display()))?;
    parse_paths(&json, prefix_width)
}
