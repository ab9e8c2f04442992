//! Node identity types
//!
//! A mesh node is identified by a long-form public key, but packets carry only a short
//! hex prefix of it on the wire. Many nodes can share a prefix; turning a prefix back
//! into a key is what the rest of the workspace is about.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MeshrouteError, Result};

/// Default prefix width in hex characters (one byte on the wire)
pub const DEFAULT_PREFIX_WIDTH: usize = 2;

/// Short, lowercase hex abbreviation of a node's public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePrefix(String);

impl NodePrefix {
    /// Parse a prefix using the default width
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_with_width(input, DEFAULT_PREFIX_WIDTH)
    }

    /// Parse a prefix, lowercasing it and truncating to `width` hex characters
    pub fn parse_with_width(input: &str, width: usize) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() || width == 0 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MeshrouteError::InvalidPrefix(input.to_string()));
        }
        let normalized: String = trimmed
            .chars()
            .take(width)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Ok(Self(normalized))
    }

    /// Parse a comma or space separated path such as `"7e,a1,3c"`
    pub fn parse_path(input: &str, width: usize) -> Result<Vec<Self>> {
        input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| Self::parse_with_width(part, width))
            .collect()
    }

    /// Get the prefix as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodePrefix {
    type Error = MeshrouteError;

    /// Keeps every character; the width is whatever was serialized
    fn try_from(value: String) -> Result<Self> {
        Self::parse_with_width(&value, value.trim().len())
    }
}

impl From<NodePrefix> for String {
    fn from(prefix: NodePrefix) -> Self {
        prefix.0
    }
}

/// Full public key of a mesh node, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(String);

impl PublicKey {
    /// Parse a hex-encoded public key
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_ascii_lowercase();
        if normalized.is_empty() || hex::decode(&normalized).is_err() {
            return Err(MeshrouteError::InvalidPublicKey(input.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Derive the wire prefix of this key
    pub fn prefix(&self, width: usize) -> NodePrefix {
        let width = width.max(1).min(self.0.len());
        NodePrefix(self.0[..width].to_string())
    }

    /// Check whether this key abbreviates to `prefix`
    pub fn matches(&self, prefix: &NodePrefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log output (first 8 characters)
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = MeshrouteError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}
