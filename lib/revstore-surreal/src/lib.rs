//! SurrealDB executor for revstore.
//!
//! Each collection is a schemaless table whose records are the stored
//! documents; the SurrealDB record id is never exposed. `SurrealPool`
//! implements `DocumentExecutor` and `RepositoryConnection`:
//!
//! ```text
//! use revstore::{ConnectionOptions, RepositoryConnection};
//! use revstore_surreal::SurrealPool;
//!
//! let db = SurrealPool::connect(ConnectionOptions {
//!     url: "127.0.0.1:8000".to_string(),
//!     namespace: Some("cms".to_string()),
//!     username: Some("root".to_string()),
//!     password: Some("root".to_string()),
//!     ..Default::default()
//! })
//! .await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
pub mod surql;

pub use executor::SurrealPool;

// Re-export core types for convenience
pub use revstore::{
    ConnectionConfig, DocumentExecutor, DocumentStore, RepositoryConnection, StoreError, Stored,
    VersionedRepository,
};
