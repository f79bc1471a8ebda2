//! Service instance selection

use crate::common::{Error, Result};
use crate::registry::{Key, ListOptions, Registry, RegistryExt};
use crate::registry::key::SEPARATOR;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Picks one live instance of a service per lookup.
#[async_trait]
pub trait ServiceLocator: Send + Sync {
    /// Identifier of the selected instance, or [`Error::ServiceUnavailable`]
    /// when the service has no live instance.
    async fn find_service(&self) -> Result<String>;
}

/// Usage count per instance id.
type JusticeTable = HashMap<String, u64>;

/// Selects the least used live instance.
///
/// The usage ledger is rebuilt from the live member list on every lookup:
/// counts carry over for members still present, members that vanished are
/// forgotten and new members start at zero. Ties go to the lowest instance id.
pub struct RoundRobinServiceLocator<R: Registry + ?Sized = dyn Registry> {
    registry: Arc<R>,
    service_name: String,
    members_key: Key,
    justice_table: Mutex<JusticeTable>,
}

impl<R: Registry + ?Sized> RoundRobinServiceLocator<R> {
    pub fn new(registry: Arc<R>, service_name: impl Into<String>, members_key: Key) -> Self {
        Self {
            registry,
            service_name: service_name.into(),
            members_key,
            justice_table: Mutex::new(JusticeTable::new()),
        }
    }

    pub fn members_key(&self) -> &Key {
        &self.members_key
    }

    /// Current usage count of `instance_id`.
    pub fn usage(&self, instance_id: &str) -> u64 {
        self.lock().get(instance_id).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JusticeTable> {
        self.justice_table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rebuild `table` for `members` and charge the least used one.
fn select_least_used(table: &mut JusticeTable, mut members: Vec<String>) -> Option<String> {
    members.sort();
    members.dedup();

    let mut fresh = JusticeTable::with_capacity(members.len());
    let mut least: Option<(&String, u64)> = None;
    for member in &members {
        let count = table.get(member).copied().unwrap_or(0);
        fresh.insert(member.clone(), count);
        if least.map_or(true, |(_, lowest)| count < lowest) {
            least = Some((member, count));
        }
    }

    let (selected, count) = least?;
    let selected = selected.clone();
    fresh.insert(selected.clone(), count + 1);
    *table = fresh;
    Some(selected)
}

#[async_trait]
impl<R: Registry + ?Sized> ServiceLocator for RoundRobinServiceLocator<R> {
    async fn find_service(&self) -> Result<String> {
        let members: Vec<String> = self
            .registry
            .list_keys(&self.members_key, ListOptions::default())
            .await?
            .into_iter()
            .filter_map(|key| key.rsplit(SEPARATOR).next().map(str::to_string))
            .collect();

        let selected = select_least_used(&mut self.lock(), members);
        match selected {
            Some(instance_id) => {
                tracing::debug!(service = %self.service_name, instance = %instance_id, "Selected service instance");
                Ok(instance_id)
            }
            None => Err(Error::ServiceUnavailable(format!(
                "No instance available for service '{}'",
                self.service_name
            ))),
        }
    }
}

impl<R: Registry + ?Sized> std::fmt::Debug for RoundRobinServiceLocator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinServiceLocator")
            .field("service_name", &self.service_name)
            .field("members_key", &self.members_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rotates_over_members() {
        let mut table = JusticeTable::new();
        let picks: Vec<_> = (0..6)
            .map(|_| select_least_used(&mut table, members(&["b", "a", "c"])).unwrap())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
        assert!(table.values().all(|count| *count == 2));
    }

    #[test]
    fn test_ledger_follows_membership() {
        let mut table = JusticeTable::new();
        select_least_used(&mut table, members(&["a", "b"]));
        select_least_used(&mut table, members(&["a", "b"]));

        // "b" left, "c" joined with a fresh count.
        assert_eq!(select_least_used(&mut table, members(&["a", "c"])).unwrap(), "c");
        assert!(!table.contains_key("b"));
        assert_eq!(table["a"], 1);
        assert_eq!(table["c"], 1);
    }

    #[test]
    fn test_no_members() {
        let mut table = JusticeTable::new();
        table.insert("gone".into(), 3);
        assert!(select_least_used(&mut table, Vec::new()).is_none());
        assert_eq!(table["gone"], 3);
    }
}
