//! PostgreSQL executor for revstore.
//!
//! Every collection becomes a table of JSONB rows (see [`sql`] for the
//! layout). `PgPool` implements `DocumentExecutor`, so a `DocumentStore` or a
//! `#[derive(Stored)]` repository can run on it directly:
//!
//! ```text
//! use revstore::Stored;
//! use revstore_postgres::PgPool;
//!
//! #[derive(Stored)]
//! #[stored(item_type = Article, collection = "articles", indexes = "slug")]
//! pub struct ArticleRepository {
//!     executor: PgPool,
//! }
//! ```
//!
//! `PgPool` is also `Transactional`: a `DocumentStore` built over a
//! `PgTransaction` runs the ref detach and the following insert or attach in
//! one database transaction.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
pub mod sql;

pub use executor::{PgPool, PgTransaction};

// Re-export core types for convenience
pub use revstore::{
    ConnectionConfig, DocumentExecutor, DocumentStore, RepositoryConnection, StoreError, Stored,
    TransactionControl, Transactional, VersionedRepository,
};
