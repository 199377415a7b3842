//! Version identifiers, named refs and the `VersionOrRef` selector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{StorageDatetime, StoreError};

/// Name of the ref every logical id carries once it has a version.
pub const LATEST: &str = "latest";

/// Opaque identifier of one committed version.
///
/// Versions are UUID v7 values: unique, minted at commit time and ordered by
/// mint time. Their hyphenated string form sorts in the same order, which is
/// what the document backends compare on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(Uuid);

impl Version {
    /// Mint a fresh version id.
    pub fn new() -> Self {
        Version(Uuid::now_v7())
    }

    /// The zero value. Never a valid committed version.
    pub fn nil() -> Self {
        Version(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Commit time embedded in the id, if it carries one.
    pub fn timestamp(&self) -> Option<StorageDatetime> {
        let (secs, nanos) = self.0.get_timestamp()?.to_unix();
        Some(StorageDatetime::from_unix_millis(
            secs * 1_000 + u64::from(nanos / 1_000_000),
        ))
    }

    pub fn or_ref(self) -> VersionOrRef {
        VersionOrRef::Version(self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::nil()
    }
}

impl From<Uuid> for Version {
    fn from(uuid: Uuid) -> Self {
        Version(uuid)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Version {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Version)
            .map_err(|e| StoreError::Internal(format!("invalid version '{}': {}", s, e)))
    }
}

/// A named, movable pointer scoped to one logical id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ref(String);

impl Ref {
    pub fn new(name: impl Into<String>) -> Self {
        Ref(name.into())
    }

    pub fn latest() -> Self {
        Ref(LATEST.to_string())
    }

    pub fn is_latest(&self) -> bool {
        self.0 == LATEST
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn or_version(self) -> VersionOrRef {
        VersionOrRef::Ref(self)
    }
}

impl From<&str> for Ref {
    fn from(name: &str) -> Self {
        Ref(name.to_string())
    }
}

impl From<String> for Ref {
    fn from(name: String) -> Self {
        Ref(name)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects one version of a logical id: either an exact version or whatever
/// version a ref currently points at.
///
/// "Unset" is `Option<VersionOrRef>::None`; Load-style calls resolve it with
/// [`VersionOrRef::or_latest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionOrRef {
    Version(Version),
    Ref(Ref),
}

impl VersionOrRef {
    /// Resolve an unset selector to `Ref(latest)`.
    pub fn or_latest(selector: Option<VersionOrRef>) -> VersionOrRef {
        selector.unwrap_or_else(|| VersionOrRef::Ref(Ref::latest()))
    }

    pub fn version(&self) -> Option<&Version> {
        match self {
            VersionOrRef::Version(v) => Some(v),
            VersionOrRef::Ref(_) => None,
        }
    }

    pub fn reference(&self) -> Option<&Ref> {
        match self {
            VersionOrRef::Version(_) => None,
            VersionOrRef::Ref(r) => Some(r),
        }
    }

    /// True for `Ref(latest)`.
    pub fn is_latest(&self) -> bool {
        self.reference().is_some_and(Ref::is_latest)
    }

    pub fn fold<R>(&self, on_version: impl FnOnce(&Version) -> R, on_ref: impl FnOnce(&Ref) -> R) -> R {
        match self {
            VersionOrRef::Version(v) => on_version(v),
            VersionOrRef::Ref(r) => on_ref(r),
        }
    }

    /// Three-way branch over a possibly unset selector.
    pub fn fold_unset<R>(
        selector: Option<&VersionOrRef>,
        on_version: impl FnOnce(&Version) -> R,
        on_ref: impl FnOnce(&Ref) -> R,
        on_unset: impl FnOnce() -> R,
    ) -> R {
        match selector {
            Some(VersionOrRef::Version(v)) => on_version(v),
            Some(VersionOrRef::Ref(r)) => on_ref(r),
            None => on_unset(),
        }
    }
}

impl From<Version> for VersionOrRef {
    fn from(version: Version) -> Self {
        VersionOrRef::Version(version)
    }
}

impl From<Ref> for VersionOrRef {
    fn from(reference: Ref) -> Self {
        VersionOrRef::Ref(reference)
    }
}

impl fmt::Display for VersionOrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOrRef::Version(v) => write!(f, "version {}", v),
            VersionOrRef::Ref(r) => write!(f, "ref {}", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_versions_are_unique_and_ordered() {
        let a = Version::new();
        let b = Version::new();
        assert_ne!(a, b);
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
        assert!(!a.is_nil());
    }

    #[test]
    fn nil_is_the_default() {
        assert!(Version::default().is_nil());
        assert!(Version::nil().timestamp().is_none());
    }

    #[test]
    fn version_timestamp_is_close_to_now() {
        let before = StorageDatetime::now();
        let version = Version::new();
        let ts = version.timestamp().unwrap();
        let slack = chrono::Duration::milliseconds(5);
        assert!(ts.0 + slack >= before.0);
        assert!(ts.0 <= StorageDatetime::now().0 + slack);
    }

    #[test]
    fn version_parses_its_display_form() {
        let version = Version::new();
        let parsed: Version = version.to_string().parse().unwrap();
        assert_eq!(parsed, version);
        assert!("not-a-uuid".parse::<Version>().is_err());
    }

    #[test]
    fn unset_selector_resolves_to_latest() {
        let resolved = VersionOrRef::or_latest(None);
        assert!(resolved.is_latest());
        assert_eq!(resolved.reference(), Some(&Ref::latest()));

        let explicit = VersionOrRef::or_latest(Some(Ref::new("stage").or_version()));
        assert!(!explicit.is_latest());
    }

    #[test]
    fn fold_unset_takes_exactly_one_branch() {
        let v = Version::new();
        let pick = |s: Option<&VersionOrRef>| {
            VersionOrRef::fold_unset(s, |_| "version", |_| "ref", || "unset")
        };
        assert_eq!(pick(Some(&v.or_ref())), "version");
        assert_eq!(pick(Some(&Ref::latest().or_version())), "ref");
        assert_eq!(pick(None), "unset");
    }

    #[test]
    fn selector_serializes_as_tagged_variant() {
        let json = serde_json::to_value(Ref::new("stage").or_version()).unwrap();
        assert_eq!(json, serde_json::json!({ "ref": "stage" }));
    }
}
