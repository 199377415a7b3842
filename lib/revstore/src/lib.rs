//! revstore - Versioned document storage with movable refs.
//!
//! Each logical record gets a history of immutable versions. A version is
//! addressed either by its exact id or by a named ref (`latest`, `stage`,
//! ...) that can be moved between versions of the same record. Independently
//! of its history, a record can be archived, which blocks further writes.
//!
//! # Core Concepts
//!
//! - **Version**: time-ordered id minted at commit time, never reused.
//! - **Ref**: named pointer held by at most one version of a record.
//! - **Archival flag**: per-record soft delete, checked by every save.
//!
//! # Backends
//!
//! - [`InMemoryStore`]: everything behind one lock, for tests and caches
//! - [`DocumentStore`]: one document per version over any
//!   [`DocumentExecutor`]; `revstore-postgres` and `revstore-surreal` provide
//!   database executors, [`MemoryExecutor`] an in-process one
//!
//! Both implement [`VersionedRepository`].

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod document;

mod digest;
mod error;
mod memory;
mod query;
mod repository;
mod time;
mod value;
mod version;

pub use digest::{compute_digest, verify_digest};
pub use document::{
    Delete, Document, DocumentExecutor, DocumentStore, Filter, Index, MemoryExecutor, Order,
    Page, Pagination, Query, Record, TransactionControl, Transactional, Update, UpdateOp, Upsert,
    Value,
};
pub use error::StoreError;
pub use memory::InMemoryStore;
pub use query::{QueryVisitor, VersionQuery};
pub use repository::{ConnectionConfig, ConnectionOptions, RepositoryConnection, VersionedRepository};
pub use time::StorageDatetime;
pub use value::VersionedValue;
pub use version::{LATEST, Ref, Version, VersionOrRef};

// Used by code generated with `#[derive(Stored)]`
pub use async_trait::async_trait;
pub use revstore_derive::Stored;
