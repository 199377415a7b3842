use std::collections::BTreeSet;

use serde::Serialize;

use crate::{Ref, StorageDatetime, StoreError, Version, VersionOrRef, compute_digest};

/// One committed revision of a logical id.
///
/// `version`, `parents` and `payload` never change once a value has been
/// handed to a store. `refs` is the only part that moves, and only through the
/// stores' ref operations.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue<T> {
    version: Version,
    parents: BTreeSet<Version>,
    refs: BTreeSet<Ref>,
    timestamp: StorageDatetime,
    payload: T,
}

impl<T> VersionedValue<T> {
    /// Fails if `version` is nil or lists itself as a parent.
    pub fn new(
        version: Version,
        parents: impl IntoIterator<Item = Version>,
        refs: impl IntoIterator<Item = Ref>,
        timestamp: StorageDatetime,
        payload: T,
    ) -> Result<Self, StoreError> {
        if version.is_nil() {
            return Err(StoreError::InvalidLineage("nil version".to_string()));
        }

        let parents: BTreeSet<Version> = parents.into_iter().collect();
        if parents.contains(&version) {
            return Err(StoreError::InvalidLineage(format!(
                "version {} lists itself as a parent",
                version
            )));
        }

        Ok(Self {
            version,
            parents,
            refs: refs.into_iter().collect(),
            timestamp,
            payload,
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn parents(&self) -> BTreeSet<Version> {
        self.parents.clone()
    }

    pub fn refs(&self) -> BTreeSet<Ref> {
        self.refs.clone()
    }

    pub fn has_parent(&self, version: &Version) -> bool {
        self.parents.contains(version)
    }

    pub fn has_ref(&self, reference: &Ref) -> bool {
        self.refs.contains(reference)
    }

    pub fn timestamp(&self) -> StorageDatetime {
        self.timestamp
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Exact version equality, or ref containment.
    pub fn matches(&self, selector: &VersionOrRef) -> bool {
        selector.fold(|v| *v == self.version, |r| self.refs.contains(r))
    }

    /// Same identity, different payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VersionedValue<U> {
        VersionedValue {
            version: self.version,
            parents: self.parents,
            refs: self.refs,
            timestamp: self.timestamp,
            payload: f(self.payload),
        }
    }

    pub fn add_refs(&mut self, refs: impl IntoIterator<Item = Ref>) {
        self.refs.extend(refs);
    }

    pub fn delete_refs<'a>(&mut self, refs: impl IntoIterator<Item = &'a Ref>) {
        for r in refs {
            self.refs.remove(r);
        }
    }

    pub(crate) fn set_payload(&mut self, payload: T) {
        self.payload = payload;
    }
}

impl<T: Serialize> VersionedValue<T> {
    /// Content digest over version, parents and payload.
    pub fn digest(&self) -> Result<String, StoreError> {
        let payload = serde_json::to_value(&self.payload)?;
        compute_digest(&self.version, &self.parents, &payload)
    }
}
