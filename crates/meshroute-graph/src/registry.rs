//! In-memory contact registry
//!
//! Contacts are indexed by their prefix at the configured width so the resolver
//! can fetch every same-prefix candidate in one lookup.

use chrono::{DateTime, Utc};
use meshroute_core::{Contact, ContactRegistry, NodePrefix, PublicKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Thread-safe contact registry keyed by prefix
#[derive(Debug, Clone)]
pub struct InMemoryContactRegistry {
    prefix_width: usize,
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_key: HashMap<PublicKey, Contact>,
    by_prefix: HashMap<NodePrefix, Vec<PublicKey>>,
}

impl InMemoryContactRegistry {
    /// Create an empty registry for the given prefix width
    pub fn new(prefix_width: usize) -> Self {
        Self {
            prefix_width,
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Create a registry holding `contacts`
    pub fn from_contacts(prefix_width: usize, contacts: impl IntoIterator<Item = Contact>) -> Self {
        let registry = Self::new(prefix_width);
        for contact in contacts {
            registry.upsert(contact);
        }
        registry
    }

    /// Insert or replace a contact
    pub fn upsert(&self, contact: Contact) {
        let prefix = contact.prefix(self.prefix_width);
        let key = contact.public_key.clone();
        let mut inner = self.inner.write();
        if inner.by_key.insert(key.clone(), contact).is_none() {
            debug!(key = %key.short(), prefix = %prefix, "Registered contact");
            inner.by_prefix.entry(prefix).or_default().push(key);
        }
    }

    /// Update the last-seen time of a known contact
    pub fn touch(&self, key: &PublicKey, at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        match inner.by_key.get_mut(key) {
            Some(contact) => {
                if contact.last_seen.map_or(true, |seen| at > seen) {
                    contact.last_seen = Some(at);
                }
                true
            }
            None => false,
        }
    }

    /// Remove a contact
    pub fn remove(&self, key: &PublicKey) -> Option<Contact> {
        let mut inner = self.inner.write();
        let removed = inner.by_key.remove(key)?;
        let prefix = key.prefix(self.prefix_width);
        if let Some(keys) = inner.by_prefix.get_mut(&prefix) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                inner.by_prefix.remove(&prefix);
            }
        }
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_key.is_empty()
    }

    pub fn prefix_width(&self) -> usize {
        self.prefix_width
    }
}

impl ContactRegistry for InMemoryContactRegistry {
    fn contacts_with_prefix(&self, prefix: &NodePrefix) -> Vec<Contact> {
        let inner = self.inner.read();
        let mut contacts: Vec<Contact> = inner
            .by_prefix
            .get(prefix)
            .into_iter()
            .flatten()
            .filter_map(|key| inner.by_key.get(key).cloned())
            .collect();
        contacts.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        contacts
    }

    fn contact(&self, key: &PublicKey) -> Option<Contact> {
        self.inner.read().by_key.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{contact, key, prefix};
    use chrono::Duration;

    #[test]
    fn test_prefix_lookup() {
        let registry = InMemoryContactRegistry::from_contacts(
            2,
            vec![contact("7e01"), contact("7e02"), contact("a100")],
        );
        assert_eq!(registry.len(), 3);

        let sevens = registry.contacts_with_prefix(&prefix("7e"));
        assert_eq!(sevens.len(), 2);
        assert_eq!(sevens[0].public_key, key("7e01"));
        assert!(registry.contacts_with_prefix(&prefix("ff")).is_empty());
    }

    #[test]
    fn test_upsert_replaces_without_duplicating() {
        let registry = InMemoryContactRegistry::new(2);
        registry.upsert(contact("7e01"));
        registry.upsert(contact("7e01").with_name("Ridge"));

        let sevens = registry.contacts_with_prefix(&prefix("7e"));
        assert_eq!(sevens.len(), 1);
        assert_eq!(sevens[0].name.as_deref(), Some("Ridge"));
    }

    #[test]
    fn test_remove_and_zero_hop() {
        let registry = InMemoryContactRegistry::new(2);
        registry.upsert(contact("7e01").with_snr(6.5));
        assert!(registry.is_zero_hop(&key("7e01")));

        assert!(registry.remove(&key("7e01")).is_some());
        assert!(registry.is_empty());
        assert!(registry.contacts_with_prefix(&prefix("7e")).is_empty());
        assert!(registry.remove(&key("7e01")).is_none());
    }

    #[test]
    fn test_touch_only_moves_forward() {
        let registry = InMemoryContactRegistry::new(2);
        let now = Utc::now();
        registry.upsert(Contact::new(key("7e01")).with_last_seen(now));

        assert!(registry.touch(&key("7e01"), now - Duration::hours(1)));
        assert_eq!(registry.contact(&key("7e01")).unwrap().last_seen, Some(now));
        registry.touch(&key("7e01"), now + Duration::hours(1));
        assert_eq!(
            registry.contact(&key("7e01")).unwrap().last_seen,
            Some(now + Duration::hours(1))
        );
        assert!(!registry.touch(&key("ffff"), now));
    }
}
