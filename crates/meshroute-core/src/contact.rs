//! Known mesh nodes as reported by the contact registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{NodePrefix, PublicKey};
use crate::location::Location;

/// A node known to the local contact registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Full public key
    pub public_key: PublicKey,
    /// Advertised name
    #[serde(default)]
    pub name: Option<String>,
    /// Last known position, if advertised
    #[serde(default)]
    pub location: Option<Location>,
    /// Last time the node was heard or advertised
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Heard directly by the local node (no repeaters in between)
    #[serde(default)]
    pub zero_hop: bool,
    /// Signal-to-noise ratio of a direct reception
    #[serde(default)]
    pub snr: Option<f64>,
    /// Operator marked this node as preferred
    #[serde(default)]
    pub starred: bool,
}

impl Contact {
    /// Create a contact with no optional attributes set
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            name: None,
            location: None,
            last_seen: None,
            zero_hop: false,
            snr: None,
            starred: false,
        }
    }

    /// Set the advertised name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the last known position
    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(Location::new(latitude, longitude));
        self
    }

    /// Set the last-seen timestamp
    pub fn with_last_seen(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen = Some(at);
        self
    }

    /// Mark as heard directly
    pub fn with_zero_hop(mut self, zero_hop: bool) -> Self {
        self.zero_hop = zero_hop;
        self
    }

    /// Record a direct-reception SNR (implies zero-hop)
    pub fn with_snr(mut self, snr: f64) -> Self {
        self.snr = Some(snr);
        self.zero_hop = true;
        self
    }

    /// Mark as starred
    pub fn with_starred(mut self, starred: bool) -> Self {
        self.starred = starred;
        self
    }

    /// Prefix of this contact at the given width
    pub fn prefix(&self, width: usize) -> NodePrefix {
        self.public_key.prefix(width)
    }

    /// Position usable for distance math (hidden `0,0` positions are ignored)
    pub fn usable_location(&self) -> Option<Location> {
        self.location.filter(|loc| !loc.is_hidden())
    }

    /// Name for log output, falling back to the short key
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.public_key.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_location_skips_hidden() {
        let key = PublicKey::parse("7e01").unwrap();
        let hidden = Contact::new(key.clone()).with_location(0.0, 0.0);
        assert!(hidden.usable_location().is_none());

        let visible = Contact::new(key).with_location(47.0, -122.0);
        assert!(visible.usable_location().is_some());
    }

    #[test]
    fn test_snr_implies_zero_hop() {
        let contact = Contact::new(PublicKey::parse("a1b2").unwrap()).with_snr(7.5);
        assert!(contact.zero_hop);
        assert_eq!(contact.display_name(), "a1b2");
    }

    #[test]
    fn test_contact_from_json() {
        let json = r#"{"public_key":"7E12AB","name":"Ridge","starred":true}"#;
        let contact: Contact = serde_json::from_str(json).unwrap();
        assert_eq!(contact.public_key.as_str(), "7e12ab");
        assert!(contact.starred);
        assert!(!contact.zero_hop);
        assert_eq!(contact.prefix(2).as_str(), "7e");
    }
}
