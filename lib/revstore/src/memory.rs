//! In-memory versioned store.
//!
//! Every logical id maps to its history in commit order. One lock guards the
//! whole map, so operations on different ids serialize against each other.
//! Good enough for tests and fast paths; sharding the lock per id would be the
//! first step if this ever carried production load.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    Ref, StorageDatetime, StoreError, Version, VersionOrRef, VersionQuery, VersionedRepository,
    VersionedValue,
};

struct Histories<T> {
    entries: HashMap<String, Vec<VersionedValue<T>>>,
    archived: HashSet<String>,
}

impl<T> Histories<T> {
    fn find(&self, id: &str, query: &VersionQuery) -> Option<&VersionedValue<T>> {
        self.entries
            .get(id)?
            .iter()
            .find(|value| query.matches(value))
    }

    fn resolve(&self, id: &str, selector: &VersionOrRef) -> Option<Version> {
        self.entries
            .get(id)?
            .iter()
            .find(|value| value.matches(selector))
            .map(VersionedValue::version)
    }

    fn move_ref(&mut self, id: &str, reference: &Ref, target: Option<&Version>) {
        let Some(history) = self.entries.get_mut(id) else {
            return;
        };

        if let Some(holder) = history.iter_mut().find(|value| value.has_ref(reference)) {
            holder.delete_refs([reference]);
        }

        let Some(target) = target else {
            return;
        };
        if let Some(value) = history.iter_mut().find(|value| value.version() == *target) {
            value.add_refs([reference.clone()]);
        }
    }
}

/// Versioned store kept entirely in memory.
///
/// Clones share the same backing map.
pub struct InMemoryStore<T> {
    inner: Arc<RwLock<Histories<T>>>,
}

impl<T> Clone for InMemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Histories {
                entries: HashMap::new(),
                archived: HashSet::new(),
            })),
        }
    }

    /// Write `payload` at `version`.
    ///
    /// An existing entry with that version gets its payload replaced in place
    /// (a corrective write, not a new history node). Otherwise a new entry
    /// with no parents and no refs is appended.
    pub fn store(&self, id: &str, payload: T, version: Version) -> Result<(), StoreError> {
        let mut histories = self.inner.write();
        let history = histories.entries.entry(id.to_string()).or_default();

        if let Some(existing) = history.iter_mut().find(|value| value.version() == version) {
            existing.set_payload(payload);
            return Ok(());
        }

        history.push(VersionedValue::new(
            version,
            [],
            [],
            StorageDatetime::now(),
            payload,
        )?);
        Ok(())
    }

    /// Move `reference` onto `target`, or just detach it when `target` is
    /// `None`. Missing holders and targets are not errors here; the
    /// `VersionedRepository` impl resolves its destination before detaching.
    pub fn update_ref(&self, id: &str, reference: &Ref, target: Option<&Version>) {
        self.inner.write().move_ref(id, reference, target);
    }

    pub fn delete_ref(&self, id: &str, reference: &Ref) {
        self.update_ref(id, reference, None);
    }

    /// Hard delete. Drops the archival record as well.
    pub fn delete(&self, id: &str) {
        let mut histories = self.inner.write();
        histories.entries.remove(id);
        histories.archived.remove(id);
    }

    pub fn delete_all<S: AsRef<str>>(&self, ids: &[S]) {
        let mut histories = self.inner.write();
        for id in ids {
            histories.entries.remove(id.as_ref());
            histories.archived.remove(id.as_ref());
        }
    }

    pub fn clear(&self) {
        let mut histories = self.inner.write();
        histories.entries.clear();
        histories.archived.clear();
    }

    pub fn is_archived(&self, id: &str) -> bool {
        self.inner.read().archived.contains(id)
    }

    /// Set or clear the archival record. History is left alone either way.
    pub fn archive(&self, id: &str, archived: bool) {
        let mut histories = self.inner.write();
        if archived {
            histories.archived.insert(id.to_string());
        } else {
            histories.archived.remove(id);
        }
    }

    pub fn archive_all<S: AsRef<str>>(&self, ids: &[S], archived: bool) {
        let mut histories = self.inner.write();
        for id in ids {
            if archived {
                histories.archived.insert(id.as_ref().to_string());
            } else {
                histories.archived.remove(id.as_ref());
            }
        }
    }
}

impl<T: Clone> InMemoryStore<T> {
    /// Payload of the first entry matching `query`; `All` means `latest`.
    pub fn load(&self, id: &str, query: &VersionQuery) -> Option<T> {
        self.load_value(id, query).map(VersionedValue::into_payload)
    }

    pub fn load_value(&self, id: &str, query: &VersionQuery) -> Option<VersionedValue<T>> {
        self.inner.read().find(id, &query.or_latest()).cloned()
    }

    /// Payloads for `ids` in the given order. Ids with no match are omitted.
    pub fn load_all<S: AsRef<str>>(&self, ids: &[S], query: &VersionQuery) -> Vec<T> {
        self.load_all_values(ids, query)
            .into_iter()
            .map(VersionedValue::into_payload)
            .collect()
    }

    pub fn load_all_values<S: AsRef<str>>(
        &self,
        ids: &[S],
        query: &VersionQuery,
    ) -> Vec<VersionedValue<T>> {
        let query = query.or_latest();
        let histories = self.inner.read();
        ids.iter()
            .filter_map(|id| histories.find(id.as_ref(), &query).cloned())
            .collect()
    }

    pub fn history(&self, id: &str) -> Vec<VersionedValue<T>> {
        self.inner
            .read()
            .entries
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Commit `payload` as a new version at `dest` (`None` means `latest`).
    ///
    /// Runs the same protocol as the document store, but the whole commit
    /// happens under the write lock.
    pub fn save(
        &self,
        id: &str,
        payload: T,
        dest: Option<VersionOrRef>,
    ) -> Result<VersionedValue<T>, StoreError> {
        let mut histories = self.inner.write();

        if histories.archived.contains(id) {
            return Err(StoreError::Archived(id.to_string()));
        }

        let dest = VersionOrRef::or_latest(dest);
        let current = histories.resolve(id, &dest);
        if current.is_none() && !dest.is_latest() {
            return Err(StoreError::NotFound(format!("{} of {}", dest, id)));
        }

        let value = VersionedValue::new(
            Version::new(),
            current,
            dest.reference().cloned(),
            StorageDatetime::now(),
            payload,
        )?;

        if let Some(reference) = dest.reference() {
            histories.move_ref(id, reference, None);
        }
        histories
            .entries
            .entry(id.to_string())
            .or_default()
            .push(value.clone());

        Ok(value)
    }
}

#[async_trait]
impl<T> VersionedRepository<T> for InMemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn load(
        &self,
        id: &str,
        query: &VersionQuery,
    ) -> Result<Option<VersionedValue<T>>, StoreError> {
        Ok(self.load_value(id, query))
    }

    async fn load_all(
        &self,
        ids: &[String],
        query: &VersionQuery,
    ) -> Result<Vec<VersionedValue<T>>, StoreError> {
        Ok(self.load_all_values(ids, query))
    }

    async fn history(&self, id: &str) -> Result<Vec<VersionedValue<T>>, StoreError> {
        Ok(InMemoryStore::history(self, id))
    }

    async fn save(
        &self,
        id: &str,
        payload: T,
        dest: Option<VersionOrRef>,
    ) -> Result<VersionedValue<T>, StoreError> {
        InMemoryStore::save(self, id, payload, dest)
    }

    async fn update_ref(
        &self,
        id: &str,
        reference: &Ref,
        dest: Option<VersionOrRef>,
    ) -> Result<(), StoreError> {
        let mut histories = self.inner.write();
        let target = match &dest {
            Some(selector) => Some(
                histories
                    .resolve(id, selector)
                    .ok_or_else(|| StoreError::NotFound(format!("{} of {}", selector, id)))?,
            ),
            None => None,
        };
        histories.move_ref(id, reference, target.as_ref());
        Ok(())
    }

    async fn is_archived(&self, id: &str) -> Result<bool, StoreError> {
        Ok(InMemoryStore::is_archived(self, id))
    }

    async fn archive(&self, id: &str, archived: bool) -> Result<(), StoreError> {
        InMemoryStore::archive(self, id, archived);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.delete(id);
        Ok(())
    }

    async fn remove_all(&self, ids: &[String]) -> Result<(), StoreError> {
        self.delete_all(ids);
        Ok(())
    }
}
