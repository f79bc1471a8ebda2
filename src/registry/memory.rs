//! In-memory registry backend
//!
//! Reference implementation over an ordered map. Used by tests and single
//! process deployments; all access goes through one mutex so concurrent
//! callers observe atomic multi-puts and conditional writes.

use crate::common::{Error, Result};
use crate::registry::contract::{Condition, Registry, Scan};
use crate::registry::key::{Key, SEPARATOR};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, PoisonError};

#[derive(Debug)]
struct Entry {
    value: String,
    /// Creation sequence; kept across updates.
    created: u64,
}

#[derive(Debug, Default)]
struct Entries {
    map: BTreeMap<Key, Entry>,
    next_seq: u64,
}

impl Entries {
    fn upsert(&mut self, key: Key, value: String) {
        match self.map.get_mut(&key) {
            Some(entry) => entry.value = value,
            None => {
                let created = self.next_seq;
                self.next_seq += 1;
                self.map.insert(key, Entry { value, created });
            }
        }
    }

    /// Descendants of `parent` in key order.
    fn descendants<'a>(&'a self, parent: &'a Key) -> impl Iterator<Item = (&'a Key, &'a Entry)> + 'a {
        let prefix = if parent.is_root() {
            SEPARATOR.to_string()
        } else {
            format!("{}{}", parent, SEPARATOR)
        };
        self.map
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(move |(key, _)| key.as_str().starts_with(&prefix))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: Mutex<Entries>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn store_entries(
        &self,
        entries: Vec<(Key, String)>,
        condition: Option<Condition>,
    ) -> Result<bool> {
        let mut state = self.lock();
        if let Some(condition) = &condition {
            let exists = state.map.contains_key(condition.key());
            if !condition.holds(exists) {
                tracing::debug!(key = %condition.key(), ?condition, "Conditional put not applied");
                return Ok(false);
            }
        }
        for (key, value) in entries {
            state.upsert(key, value);
        }
        Ok(true)
    }

    async fn load_entry(&self, key: &Key) -> Result<String> {
        self.lock()
            .map
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| Error::KeyDoesNotExist(key.to_string()))
    }

    async fn scan_entries(&self, parent: &Key, scan: Scan) -> Result<Vec<(Key, String)>> {
        let state = self.lock();

        let mut matched: Vec<(&Key, &Entry)> = Vec::new();
        if !scan.exclude_parent {
            if let Some(entry) = state.map.get(parent) {
                matched.push((parent, entry));
            }
        }
        matched.extend(state.descendants(parent).filter(|(key, _)| {
            scan.recursive || key.is_immediate_parent(parent)
        }));

        if scan.keep_order {
            matched.sort_by_key(|(_, entry)| entry.created);
        }

        Ok(matched
            .into_iter()
            .map(|(key, entry)| {
                let value = if scan.keys_only {
                    String::new()
                } else {
                    entry.value.clone()
                };
                (key.clone(), value)
            })
            .collect())
    }

    async fn remove_entry(&self, key: &Key) -> Result<bool> {
        Ok(self.lock().map.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::contract::{ListOptions, RegistryExt};

    #[tokio::test]
    async fn test_keep_order_follows_creation() {
        let registry = InMemoryRegistry::new();
        registry.put("/p/c", "3").await.unwrap();
        registry.put("/p/a", "1").await.unwrap();
        registry.put("/p/b", "2").await.unwrap();
        registry.put("/p/c", "updated").await.unwrap();

        let ordered = registry.list_keys("/p", ListOptions::ordered()).await.unwrap();
        assert_eq!(ordered, vec!["/p/c", "/p/a", "/p/b"]);

        let sorted = registry.list_keys("/p", ListOptions::default()).await.unwrap();
        assert_eq!(sorted, vec!["/p/a", "/p/b", "/p/c"]);
    }

    #[tokio::test]
    async fn test_scan_includes_parent_unless_excluded() {
        let registry = InMemoryRegistry::new();
        registry.put("/p", "parent").await.unwrap();
        registry.put("/p/a", "child").await.unwrap();
        registry.put("/pa", "sibling").await.unwrap();

        let parent = Key::create("/p").unwrap();
        let all = registry.scan_entries(&parent, Scan::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let scan = Scan {
            exclude_parent: true,
            keys_only: true,
            ..Default::default()
        };
        let children = registry.scan_entries(&parent, scan).await.unwrap();
        assert_eq!(children, vec![(Key::create("/p/a").unwrap(), String::new())]);
    }

    #[tokio::test]
    async fn test_root_listing() {
        let registry = InMemoryRegistry::new();
        registry.put("/a", "1").await.unwrap();
        registry.put("/b/c", "2").await.unwrap();

        let top = registry.list_keys(Key::root(), ListOptions::default()).await.unwrap();
        assert_eq!(top, vec!["/a"]);

        let all = registry.list_keys(Key::root(), ListOptions::recursive()).await.unwrap();
        assert_eq!(all, vec!["/a", "/b/c"]);
    }

    #[tokio::test]
    async fn test_replace_requires_existing_key() {
        let registry = InMemoryRegistry::new();
        assert!(!registry.replace("/x", "1").await.unwrap());
        assert!(registry.is_empty());

        registry.put("/x", "1").await.unwrap();
        assert!(registry.replace("/x", "2").await.unwrap());
        assert_eq!(registry.get("/x").await.unwrap(), "2");
    }
}
