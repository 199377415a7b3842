//! Repository traits for versioned records.
//!
//! - `VersionedRepository<T>`: the store contract shared by every backend
//! - `RepositoryConnection`: database connection and initialization
//! - `ConnectionConfig`: how to reach a backend

use async_trait::async_trait;
use serde::Deserialize;

use crate::{Ref, StoreError, VersionOrRef, VersionQuery, VersionedValue};

/// Connection configuration for database backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
    /// Connect with explicit options.
    Options(ConnectionOptions),
}

/// Structured connection settings.
///
/// Backends ignore the fields they have no use for: PostgreSQL reads `url`
/// and `max_connections`, SurrealDB reads `url`, `namespace`, `database` and
/// the root credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionOptions {
    pub url: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl ConnectionConfig {
    pub fn url(&self) -> &str {
        match self {
            ConnectionConfig::Url(url) => url,
            ConnectionConfig::Options(options) => &options.url,
        }
    }

    /// Normalize into options, filling only the url for the `Url` form.
    pub fn into_options(self) -> ConnectionOptions {
        match self {
            ConnectionConfig::Url(url) => ConnectionOptions {
                url,
                ..ConnectionOptions::default()
            },
            ConnectionConfig::Options(options) => options,
        }
    }
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

impl From<ConnectionOptions> for ConnectionConfig {
    fn from(options: ConnectionOptions) -> Self {
        ConnectionConfig::Options(options)
    }
}

/// Trait for database connection and initialization.
///
/// Implemented by every executor and by combined repositories generated with
/// `#[derive(Stored)]`.
#[async_trait]
pub trait RepositoryConnection: Sized + Send + Sync {
    /// Connect to the database using the provided configuration.
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StoreError>;

    /// Prepare collections and indexes.
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store contract for versioned records.
///
/// Reads take a [`VersionQuery`]; for the single-record reads an `All` query
/// means "the version at `latest`". Writes take an optional destination
/// selector where `None` also means `latest`.
///
/// - `save`: commit a new version at the destination and move the
///   destination ref onto it
/// - `update_ref`: move a ref to the version at a destination, or detach it
/// - `archive`: flip the archival flag that gates `save`
/// - `remove`: hard delete, bypassing archival
#[async_trait]
pub trait VersionedRepository<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// First version of `id` matching `query`.
    async fn load(
        &self,
        id: &str,
        query: &VersionQuery,
    ) -> Result<Option<VersionedValue<T>>, StoreError>;

    /// First match for each id, in the order of `ids`. Ids without a match
    /// are left out.
    async fn load_all(
        &self,
        ids: &[String],
        query: &VersionQuery,
    ) -> Result<Vec<VersionedValue<T>>, StoreError>;

    /// Every version of `id` in commit order.
    async fn history(&self, id: &str) -> Result<Vec<VersionedValue<T>>, StoreError>;

    /// Commit `payload` as a new version of `id`.
    ///
    /// Fails with `Archived` when the id is archived, and with `NotFound`
    /// when the destination does not exist and is not `latest`.
    async fn save(
        &self,
        id: &str,
        payload: T,
        dest: Option<VersionOrRef>,
    ) -> Result<VersionedValue<T>, StoreError>;

    /// Detach `reference` from its holder, then attach it to the version at
    /// `dest` when one is given.
    ///
    /// A `dest` that resolves to nothing fails with `NotFound` and leaves the
    /// current holder untouched.
    async fn update_ref(
        &self,
        id: &str,
        reference: &Ref,
        dest: Option<VersionOrRef>,
    ) -> Result<(), StoreError>;

    async fn delete_ref(&self, id: &str, reference: &Ref) -> Result<(), StoreError> {
        self.update_ref(id, reference, None).await
    }

    async fn is_archived(&self, id: &str) -> Result<bool, StoreError>;

    async fn archive(&self, id: &str, archived: bool) -> Result<(), StoreError>;

    /// Delete the whole history of `id`.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;

    async fn remove_all(&self, ids: &[String]) -> Result<(), StoreError>;
}
