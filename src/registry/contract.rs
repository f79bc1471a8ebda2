//! Backend-agnostic registry contract
//!
//! Backends implement the handful of primitives on [`Registry`]; every public
//! operation (`put`, `get`, `list_keys`, `fetch`, ...) lives on [`RegistryExt`]
//! and is derived from those primitives, so all backends share the same
//! filtering and error semantics.

use crate::common::{Error, Result};
use crate::registry::key::{IntoKey, Key};
use async_trait::async_trait;

/// Existence precondition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Apply the write only if the key does not exist yet.
    Absent(Key),
    /// Apply the write only if the key already exists.
    Present(Key),
}

impl Condition {
    pub fn key(&self) -> &Key {
        match self {
            Condition::Absent(key) | Condition::Present(key) => key,
        }
    }

    /// Whether the condition holds given the key's current existence.
    pub fn holds(&self, exists: bool) -> bool {
        match self {
            Condition::Absent(_) => !exists,
            Condition::Present(_) => exists,
        }
    }
}

/// Parameters of a backend scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scan {
    /// Include descendants at any depth instead of immediate children only.
    pub recursive: bool,
    /// Order results by creation sequence.
    pub keep_order: bool,
    /// Values may be returned empty.
    pub keys_only: bool,
    /// Leave the parent key itself out of the results.
    pub exclude_parent: bool,
}

/// Options for [`RegistryExt::list_keys`] and [`RegistryExt::fetch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub recursive: bool,
    pub keep_order: bool,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            keep_order: false,
        }
    }

    pub fn ordered() -> Self {
        Self {
            recursive: false,
            keep_order: true,
        }
    }
}

/// Storage primitives a registry backend provides.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Acquire backend resources. Backends without resources need not override it.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Release backend resources.
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }

    /// Write all `entries` as one atomic unit, optionally guarded by `condition`.
    ///
    /// Returns whether the entries were applied. Without a condition a
    /// successful call always returns `true`.
    async fn store_entries(
        &self,
        entries: Vec<(Key, String)>,
        condition: Option<Condition>,
    ) -> Result<bool>;

    /// Value stored under `key`, or [`Error::KeyDoesNotExist`].
    async fn load_entry(&self, key: &Key) -> Result<String>;

    /// Entries under `parent` (and possibly `parent` itself, see [`Scan::exclude_parent`]).
    async fn scan_entries(&self, parent: &Key, scan: Scan) -> Result<Vec<(Key, String)>>;

    /// Delete `key`; returns whether it existed.
    async fn remove_entry(&self, key: &Key) -> Result<bool>;
}

/// Public registry operations, available on every [`Registry`] including `dyn Registry`.
#[async_trait]
pub trait RegistryExt: Registry {
    /// Upsert a single value.
    async fn put<K, V>(&self, key: K, value: V) -> Result<()>
    where
        K: IntoKey + Send,
        V: Into<String> + Send,
    {
        let key = key.into_key()?;
        self.store_entries(vec![(key, value.into())], None).await?;
        Ok(())
    }

    /// Set `key` only if it does not exist; returns whether it was set.
    async fn put_if_not_exist<K, V>(&self, key: K, value: V) -> Result<bool>
    where
        K: IntoKey + Send,
        V: Into<String> + Send,
    {
        let key = key.into_key()?;
        self.store_entries(
            vec![(key.clone(), value.into())],
            Some(Condition::Absent(key)),
        )
        .await
    }

    /// Overwrite `key` only if it already exists; returns whether it was written.
    async fn replace<K, V>(&self, key: K, value: V) -> Result<bool>
    where
        K: IntoKey + Send,
        V: Into<String> + Send,
    {
        let key = key.into_key()?;
        self.store_entries(
            vec![(key.clone(), value.into())],
            Some(Condition::Present(key)),
        )
        .await
    }

    /// Write every pair atomically: either all of them become visible or none does.
    async fn put_all<I, K, V>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)> + Send,
        I::IntoIter: Send,
        K: IntoKey + Send,
        V: Into<String> + Send,
    {
        let entries = values
            .into_iter()
            .map(|(k, v)| Ok((k.into_key()?, v.into())))
            .collect::<Result<Vec<_>>>()?;
        if entries.is_empty() {
            return Ok(());
        }

        let count = entries.len();
        if !self.store_entries(entries, None).await? {
            tracing::warn!(entries = count, "Atomic multi-put was not applied");
            return Err(Error::TransactionFailed(format!(
                "multi-put of {} entries was not applied",
                count
            )));
        }
        Ok(())
    }

    /// Value stored under `key`; fails with [`Error::KeyDoesNotExist`] if absent.
    async fn get<K>(&self, key: K) -> Result<String>
    where
        K: IntoKey + Send,
    {
        let key = key.into_key()?;
        self.load_entry(&key).await
    }

    /// Keys under `parent`, never including `parent` itself.
    async fn list_keys<K>(&self, parent: K, options: ListOptions) -> Result<Vec<String>>
    where
        K: IntoKey + Send,
    {
        let parent = parent.into_key()?;
        let entries = scan_children(self, &parent, options, true).await?;
        Ok(entries.into_iter().map(|(key, _)| key.to_string()).collect())
    }

    /// Key/value pairs under `parent`, with the same filtering as [`RegistryExt::list_keys`].
    async fn fetch<K>(&self, parent: K, options: ListOptions) -> Result<Vec<(String, String)>>
    where
        K: IntoKey + Send,
    {
        let parent = parent.into_key()?;
        let entries = scan_children(self, &parent, options, false).await?;
        Ok(entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect())
    }

    /// Delete `key`; returns whether it existed.
    async fn delete<K>(&self, key: K) -> Result<bool>
    where
        K: IntoKey + Send,
    {
        let key = key.into_key()?;
        self.remove_entry(&key).await
    }
}

impl<T: Registry + ?Sized> RegistryExt for T {}

async fn scan_children<R: Registry + ?Sized>(
    registry: &R,
    parent: &Key,
    options: ListOptions,
    keys_only: bool,
) -> Result<Vec<(Key, String)>> {
    let scan = Scan {
        recursive: options.recursive,
        keep_order: options.keep_order,
        keys_only,
        exclude_parent: true,
    };
    let mut entries = registry.scan_entries(parent, scan).await?;
    entries.retain(|(key, _)| {
        if options.recursive {
            key.is_a_parent(parent)
        } else {
            key.is_immediate_parent(parent)
        }
    });
    if !options.keep_order {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
    }
    Ok(entries)
}
