//! SurrealDB implementation of DocumentExecutor.
//!
//! Transactions are not offered: each statement stands alone, which is all
//! the document store needs for its single-document writes.

use std::ops::Deref;

use async_trait::async_trait;
use revstore::{
    ConnectionConfig, Delete, Document, DocumentExecutor, Index, Query, RepositoryConnection,
    StoreError, Update, Upsert,
};
use serde::Deserialize;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::trace;

use crate::surql::{self, Statement};

const DEFAULT_NAMESPACE: &str = "revstore";
const DEFAULT_DATABASE: &str = "revstore";

/// Helper struct for deserializing count() results from SurrealDB.
#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

fn db_error(e: surrealdb::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// Wrapper around the SurrealDB client so executor traits can be
/// implemented for it.
#[derive(Clone)]
pub struct SurrealPool(Surreal<Client>);

impl SurrealPool {
    /// Create a new SurrealPool wrapper.
    pub fn new(db: Surreal<Client>) -> Self {
        Self(db)
    }

    /// Connect over WebSocket, sign in as root when credentials are given and
    /// select the namespace and database.
    pub async fn connect_with(
        url: &str,
        credentials: Option<(&str, &str)>,
        namespace: &str,
        database: &str,
    ) -> Result<Self, StoreError> {
        let address = url
            .strip_prefix("ws://")
            .or_else(|| url.strip_prefix("surreal://"))
            .unwrap_or(url);
        let db = Surreal::new::<Ws>(address).await.map_err(db_error)?;
        if let Some((username, password)) = credentials {
            db.signin(Root { username, password })
                .await
                .map_err(db_error)?;
        }
        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(db_error)?;
        Ok(Self(db))
    }

    /// Get the inner Surreal client.
    pub fn inner(&self) -> &Surreal<Client> {
        &self.0
    }

    async fn run(&self, statement: Statement) -> Result<surrealdb::Response, StoreError> {
        trace!(surql = %statement.sql, "query");
        let mut q = self.0.query(statement.sql);
        for (name, value) in statement.params {
            q = q.bind((name, value));
        }
        q.await
            .map_err(db_error)?
            .check()
            .map_err(db_error)
    }

    async fn count_at(&self, statement: Statement, index: usize) -> Result<u64, StoreError> {
        let result: Option<CountResult> = self.run(statement).await?.take(index).map_err(db_error)?;
        Ok(result.map(|r| r.count).unwrap_or(0))
    }
}

impl Deref for SurrealPool {
    type Target = Surreal<Client>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn document(value: serde_json::Value) -> Result<Document, StoreError> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(StoreError::Internal("record is not an object".to_string())),
    }
}

#[async_trait]
impl DocumentExecutor for SurrealPool {
    async fn fetch(&self, query: Query) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<serde_json::Value> = self
            .run(surql::select(&query)?)
            .await?
            .take(0)
            .map_err(db_error)?;
        rows.into_iter().map(document).collect()
    }

    async fn count(&self, query: Query) -> Result<u64, StoreError> {
        self.count_at(surql::count(&query)?, 0).await
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<u64, StoreError> {
        self.run(surql::insert(collection, document)?).await?;
        Ok(1)
    }

    async fn update_one(&self, update: Update) -> Result<u64, StoreError> {
        let touched: Vec<serde_json::Value> = self
            .run(surql::update_one(&update)?)
            .await?
            .take(0)
            .map_err(db_error)?;
        Ok(touched.len() as u64)
    }

    async fn upsert(&self, upsert: Upsert) -> Result<u64, StoreError> {
        self.run(surql::upsert(&upsert)?).await?;
        Ok(1)
    }

    async fn delete(&self, delete: Delete) -> Result<u64, StoreError> {
        self.count_at(surql::delete(&delete)?, 0).await
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.run(surql::define_table(collection)?).await?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.run(surql::remove_table(collection)?).await?;
        Ok(())
    }

    async fn create_index(&self, index: Index) -> Result<String, StoreError> {
        self.run(surql::define_index(&index)?).await?;
        Ok(index.name)
    }
}

#[async_trait]
impl RepositoryConnection for SurrealPool {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StoreError> {
        let options = config.into().into_options();
        let credentials = match (&options.username, &options.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        };
        SurrealPool::connect_with(
            &options.url,
            credentials,
            options.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE),
            options.database.as_deref().unwrap_or(DEFAULT_DATABASE),
        )
        .await
    }
}
