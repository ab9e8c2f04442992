//! Meshroute Core - Foundational types and collaborator traits
//!
//! This crate provides the vocabulary shared by the topology engine and its
//! collaborators: node identities, locations, contacts, edge records, and the
//! traits a host application implements to plug in storage, contacts and geography.
//!
//! # Modules
//!
//! - [`identity`] - Node prefixes and full public keys
//! - [`location`] - Coordinates, haversine distance, default geography provider
//! - [`contact`] - Known nodes as reported by the contact registry
//! - [`edge`] - Edge keys and persisted edge records
//! - [`error`] - Core error type
//!
//! # Example
//!
//! ```rust
//! use meshroute_core::{Contact, NodePrefix, PublicKey};
//!
//! let key = PublicKey::parse("7e12ab34").unwrap();
//! let contact = Contact::new(key).with_name("Ridge").with_location(47.6, -122.3);
//! assert_eq!(contact.prefix(2), NodePrefix::parse("7e").unwrap());
//! ```

pub mod contact;
pub mod edge;
pub mod error;
pub mod identity;
pub mod location;

// Re-exports for convenience
pub use contact::Contact;
pub use edge::{EdgeKey, EdgeRecord};
pub use error::{MeshrouteError, Result};
pub use identity::{NodePrefix, PublicKey, DEFAULT_PREFIX_WIDTH};
pub use location::{HaversineGeography, Location};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable mirror of the edge graph
///
/// Implementations must round-trip every field of [`EdgeRecord`] losslessly and
/// apply each upsert atomically. A stored key is never replaced once set.
#[async_trait]
pub trait EdgeStorage: Send + Sync {
    /// Insert or update one edge
    async fn upsert_edge(&self, edge: &EdgeRecord) -> Result<()>;

    /// Load all edges observed at or after `since` (all edges when `None`)
    async fn load_edges(&self, since: Option<DateTime<Utc>>) -> Result<Vec<EdgeRecord>>;

    /// Delete edges last observed before `older_than`, returning how many were removed
    async fn prune_edges(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Number of persisted edges
    async fn edge_count(&self) -> Result<u64>;
}

/// Source of known nodes sharing a prefix
pub trait ContactRegistry: Send + Sync {
    /// All known nodes whose key abbreviates to `prefix`
    fn contacts_with_prefix(&self, prefix: &NodePrefix) -> Vec<Contact>;

    /// Look up one node by full key
    fn contact(&self, key: &PublicKey) -> Option<Contact>;

    /// Whether the node was heard directly by the local node
    fn is_zero_hop(&self, key: &PublicKey) -> bool {
        self.contact(key).map(|c| c.zero_hop).unwrap_or(false)
    }
}

/// Distance and recency lookups
///
/// Calls are expected to be fast local computations; the scorer invokes them
/// inline while resolving a path.
pub trait GeographyProvider: Send + Sync {
    /// Great-circle distance in kilometres
    fn distance_km(&self, a: &Location, b: &Location) -> f64;

    /// When the node was last heard
    fn last_heard(&self, contact: &Contact) -> Option<DateTime<Utc>>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedRegistry(HashMap<PublicKey, Contact>);

    impl ContactRegistry for FixedRegistry {
        fn contacts_with_prefix(&self, prefix: &NodePrefix) -> Vec<Contact> {
            self.0
                .values()
                .filter(|c| c.public_key.matches(prefix))
                .cloned()
                .collect()
        }

        fn contact(&self, key: &PublicKey) -> Option<Contact> {
            self.0.get(key).cloned()
        }
    }

    #[test]
    fn test_version() {
        assert!(VERSION.contains('.'), "VERSION should be semver format");
    }

    #[test]
    fn test_default_zero_hop_lookup() {
        let heard = PublicKey::parse("7e01").unwrap();
        let unheard = PublicKey::parse("7e02").unwrap();
        let mut contacts = HashMap::new();
        contacts.insert(heard.clone(), Contact::new(heard.clone()).with_zero_hop(true));
        contacts.insert(unheard.clone(), Contact::new(unheard.clone()));
        let registry = FixedRegistry(contacts);

        assert!(registry.is_zero_hop(&heard));
        assert!(!registry.is_zero_hop(&unheard));
        assert!(!registry.is_zero_hop(&PublicKey::parse("ffff").unwrap()));
        assert_eq!(
            registry
                .contacts_with_prefix(&NodePrefix::parse("7e").unwrap())
                .len(),
            2
        );
    }
}
