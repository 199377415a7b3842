//! Selector algebra over one id's history.
//!
//! A [`VersionQuery`] says which versions a read is interested in: everything,
//! the one at a selector, or those before/after/between versions in commit
//! order. Backends consume it through [`QueryVisitor`], which forces every
//! variant to be handled.

use serde::{Deserialize, Serialize};

use crate::{Ref, Version, VersionOrRef, VersionedValue};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionQuery {
    /// No version constraint.
    #[default]
    All,
    /// The version named by the selector.
    Equal(VersionOrRef),
    /// Versions committed after the given one (exclusive).
    NewerThan(Version),
    /// Versions committed before the given one (exclusive).
    OlderThan(Version),
    /// Versions strictly between `after` and `before`.
    Range { after: Version, before: Version },
}

/// Exhaustive dispatch over [`VersionQuery`] variants.
pub trait QueryVisitor {
    type Output;

    fn all(&mut self) -> Self::Output;
    fn equal(&mut self, selector: &VersionOrRef) -> Self::Output;
    fn newer_than(&mut self, version: &Version) -> Self::Output;
    fn older_than(&mut self, version: &Version) -> Self::Output;
    fn range(&mut self, after: &Version, before: &Version) -> Self::Output;
}

impl VersionQuery {
    pub fn all() -> Self {
        VersionQuery::All
    }

    pub fn equal(selector: impl Into<VersionOrRef>) -> Self {
        VersionQuery::Equal(selector.into())
    }

    pub fn newer_than(version: Version) -> Self {
        VersionQuery::NewerThan(version)
    }

    pub fn older_than(version: Version) -> Self {
        VersionQuery::OlderThan(version)
    }

    pub fn range(after: Version, before: Version) -> Self {
        VersionQuery::Range { after, before }
    }

    pub fn latest() -> Self {
        VersionQuery::Equal(VersionOrRef::Ref(Ref::latest()))
    }

    pub fn is_all(&self) -> bool {
        matches!(self, VersionQuery::All)
    }

    /// Load-style default: `All` becomes `Equal(Ref(latest))`.
    pub fn or_latest(&self) -> VersionQuery {
        match self {
            VersionQuery::All => VersionQuery::latest(),
            other => other.clone(),
        }
    }

    pub fn accept<V: QueryVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            VersionQuery::All => visitor.all(),
            VersionQuery::Equal(selector) => visitor.equal(selector),
            VersionQuery::NewerThan(version) => visitor.newer_than(version),
            VersionQuery::OlderThan(version) => visitor.older_than(version),
            VersionQuery::Range { after, before } => visitor.range(after, before),
        }
    }

    pub fn matches<T>(&self, value: &VersionedValue<T>) -> bool {
        self.accept(&mut Matcher(value))
    }
}

impl From<VersionOrRef> for VersionQuery {
    fn from(selector: VersionOrRef) -> Self {
        VersionQuery::Equal(selector)
    }
}

impl From<Option<VersionOrRef>> for VersionQuery {
    fn from(selector: Option<VersionOrRef>) -> Self {
        selector.map(VersionQuery::Equal).unwrap_or_default()
    }
}

impl From<Version> for VersionQuery {
    fn from(version: Version) -> Self {
        VersionQuery::Equal(VersionOrRef::Version(version))
    }
}

impl From<Ref> for VersionQuery {
    fn from(reference: Ref) -> Self {
        VersionQuery::Equal(VersionOrRef::Ref(reference))
    }
}

struct Matcher<'a, T>(&'a VersionedValue<T>);

impl<T> QueryVisitor for Matcher<'_, T> {
    type Output = bool;

    fn all(&mut self) -> bool {
        true
    }

    fn equal(&mut self, selector: &VersionOrRef) -> bool {
        self.0.matches(selector)
    }

    fn newer_than(&mut self, version: &Version) -> bool {
        self.0.version() > *version
    }

    fn older_than(&mut self, version: &Version) -> bool {
        self.0.version() < *version
    }

    fn range(&mut self, after: &Version, before: &Version) -> bool {
        let version = self.0.version();
        version > *after && version < *before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageDatetime;

    fn value(version: Version, refs: &[&str]) -> VersionedValue<()> {
        VersionedValue::new(
            version,
            [],
            refs.iter().map(|r| Ref::new(*r)),
            StorageDatetime::now(),
            (),
        )
        .unwrap()
    }

    #[test]
    fn equal_matches_version_or_ref() {
        let v = Version::new();
        let val = value(v, &["latest"]);

        assert!(VersionQuery::from(v).matches(&val));
        assert!(VersionQuery::latest().matches(&val));
        assert!(!VersionQuery::from(Ref::new("stage")).matches(&val));
        assert!(!VersionQuery::from(Version::new()).matches(&val));
    }

    #[test]
    fn ordering_queries_are_exclusive() {
        let v1 = Version::new();
        let v2 = Version::new();
        let v3 = Version::new();
        let middle = value(v2, &[]);

        assert!(VersionQuery::newer_than(v1).matches(&middle));
        assert!(!VersionQuery::newer_than(v2).matches(&middle));
        assert!(VersionQuery::older_than(v3).matches(&middle));
        assert!(!VersionQuery::older_than(v2).matches(&middle));
        assert!(VersionQuery::range(v1, v3).matches(&middle));
        assert!(!VersionQuery::range(v2, v3).matches(&middle));
    }

    #[test]
    fn unset_selector_is_all_until_defaulted() {
        let query = VersionQuery::from(None);
        assert!(query.is_all());
        assert!(query.matches(&value(Version::new(), &[])));
        assert_eq!(query.or_latest(), VersionQuery::latest());

        let explicit = VersionQuery::newer_than(Version::new());
        assert_eq!(explicit.or_latest(), explicit);
    }

    struct Describe;

    impl QueryVisitor for Describe {
        type Output = &'static str;

        fn all(&mut self) -> Self::Output {
            "all"
        }
        fn equal(&mut self, selector: &VersionOrRef) -> Self::Output {
            selector.fold(|_| "version", |_| "ref")
        }
        fn newer_than(&mut self, _: &Version) -> Self::Output {
            "newer"
        }
        fn older_than(&mut self, _: &Version) -> Self::Output {
            "older"
        }
        fn range(&mut self, _: &Version, _: &Version) -> Self::Output {
            "range"
        }
    }

    #[test]
    fn accept_dispatches_each_variant() {
        let v = Version::new();
        let cases = [
            (VersionQuery::all(), "all"),
            (VersionQuery::from(v), "version"),
            (VersionQuery::latest(), "ref"),
            (VersionQuery::newer_than(v), "newer"),
            (VersionQuery::older_than(v), "older"),
            (VersionQuery::range(v, v), "range"),
        ];
        for (query, expected) in cases {
            assert_eq!(query.accept(&mut Describe), expected);
        }
    }
}
