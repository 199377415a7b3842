//! PostgreSQL implementation of DocumentExecutor.

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

use std::ops::Deref;

use async_trait::async_trait;
use revstore::{
    ConnectionConfig, Delete, Document, DocumentExecutor, Index, Query, RepositoryConnection,
    StoreError, TransactionControl, Transactional, Update, Upsert,
};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Arguments, PgConnection, Postgres, Row, Transaction};
use tokio::sync::Mutex;
use tracing::trace;

use crate::sql::{self, Param, Statement};

pub(crate) fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// Bind statement parameters to PgArguments.
fn bind_params(params: Vec<Param>) -> Result<PgArguments, StoreError> {
    let mut args = PgArguments::default();
    for param in params {
        match param {
            Param::Json(value) => args.add(value),
            Param::Text(s) => args.add(s),
            Param::Texts(v) => args.add(v),
        }
        .map_err(|e| StoreError::Internal(e.to_string()))?;
    }
    Ok(args)
}

fn document(row: &PgRow) -> Result<Document, StoreError> {
    match row.try_get::<serde_json::Value, _>("doc").map_err(db_error)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(StoreError::Internal("row doc is not an object".to_string())),
    }
}

async fn fetch_rows(conn: &mut PgConnection, statement: Statement) -> Result<Vec<PgRow>, StoreError> {
    trace!(sql = %statement.sql, "fetch");
    let args = bind_params(statement.params)?;
    sqlx::query_with(&statement.sql, args)
        .fetch_all(conn)
        .await
        .map_err(db_error)
}

async fn execute(conn: &mut PgConnection, statement: Statement) -> Result<u64, StoreError> {
    trace!(sql = %statement.sql, "execute");
    let args = bind_params(statement.params)?;
    let result = sqlx::query_with(&statement.sql, args)
        .execute(conn)
        .await
        .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn run_fetch(conn: &mut PgConnection, query: &Query) -> Result<Vec<Document>, StoreError> {
    let rows = fetch_rows(conn, sql::select(query)?).await?;
    rows.iter().map(document).collect()
}

async fn run_count(conn: &mut PgConnection, query: &Query) -> Result<u64, StoreError> {
    let rows = fetch_rows(conn, sql::count(query)?).await?;
    let count = match rows.first() {
        Some(row) => row.try_get::<i64, _>(0).map_err(db_error)?,
        None => 0,
    };
    Ok(count.max(0) as u64)
}

/// Wrapper around sqlx::PgPool that implements DocumentExecutor.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect to a PostgreSQL database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with(url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db_error)?;
        Ok(Self(pool))
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, StoreError> {
        self.0.acquire().await.map_err(db_error)
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl DocumentExecutor for PgPool {
    async fn fetch(&self, query: Query) -> Result<Vec<Document>, StoreError> {
        run_fetch(&mut *self.acquire().await?, &query).await
    }

    async fn count(&self, query: Query) -> Result<u64, StoreError> {
        run_count(&mut *self.acquire().await?, &query).await
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<u64, StoreError> {
        execute(&mut *self.acquire().await?, sql::insert(collection, document)?).await
    }

    async fn update_one(&self, update: Update) -> Result<u64, StoreError> {
        execute(&mut *self.acquire().await?, sql::update_one(&update)?).await
    }

    async fn upsert(&self, upsert: Upsert) -> Result<u64, StoreError> {
        execute(&mut *self.acquire().await?, sql::upsert(&upsert)?).await
    }

    async fn delete(&self, delete: Delete) -> Result<u64, StoreError> {
        execute(&mut *self.acquire().await?, sql::delete(&delete)?).await
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        execute(&mut *self.acquire().await?, sql::create_table(collection)?).await?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        execute(&mut *self.acquire().await?, sql::drop_table(collection)?).await?;
        Ok(())
    }

    async fn create_index(&self, index: Index) -> Result<String, StoreError> {
        execute(&mut *self.acquire().await?, sql::create_index(&index)?).await?;
        Ok(index.name)
    }
}

#[async_trait]
impl Transactional for PgPool {
    type Transaction = PgTransaction;

    async fn begin_transaction(&self) -> Result<Self::Transaction, StoreError> {
        let tx = self.0.begin().await.map_err(db_error)?;
        Ok(PgTransaction {
            tx: Mutex::new(Some(tx)),
        })
    }
}

#[async_trait]
impl RepositoryConnection for PgPool {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StoreError> {
        let options = config.into().into_options();
        PgPool::connect_with(
            &options.url,
            options.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        )
        .await
    }
}

/// PostgreSQL transaction usable wherever an executor is expected.
///
/// Statements run one at a time on the transaction's connection. After
/// `commit` or `rollback` the handle is consumed.
pub struct PgTransaction {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

macro_rules! with_tx {
    ($self:ident, |$conn:ident| $body:expr) => {{
        let mut guard = $self.tx.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| StoreError::Internal("transaction already finished".to_string()))?;
        let $conn: &mut PgConnection = &mut *tx;
        $body.await
    }};
}

#[async_trait]
impl DocumentExecutor for PgTransaction {
    async fn fetch(&self, query: Query) -> Result<Vec<Document>, StoreError> {
        with_tx!(self, |conn| run_fetch(conn, &query))
    }

    async fn count(&self, query: Query) -> Result<u64, StoreError> {
        with_tx!(self, |conn| run_count(conn, &query))
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<u64, StoreError> {
        let statement = sql::insert(collection, document)?;
        with_tx!(self, |conn| execute(conn, statement))
    }

    async fn update_one(&self, update: Update) -> Result<u64, StoreError> {
        let statement = sql::update_one(&update)?;
        with_tx!(self, |conn| execute(conn, statement))
    }

    async fn upsert(&self, upsert: Upsert) -> Result<u64, StoreError> {
        let statement = sql::upsert(&upsert)?;
        with_tx!(self, |conn| execute(conn, statement))
    }

    async fn delete(&self, delete: Delete) -> Result<u64, StoreError> {
        let statement = sql::delete(&delete)?;
        with_tx!(self, |conn| execute(conn, statement))
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        let statement = sql::create_table(collection)?;
        with_tx!(self, |conn| execute(conn, statement)).map(|_| ())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        let statement = sql::drop_table(collection)?;
        with_tx!(self, |conn| execute(conn, statement)).map(|_| ())
    }

    async fn create_index(&self, index: Index) -> Result<String, StoreError> {
        let statement = sql::create_index(&index)?;
        with_tx!(self, |conn| execute(conn, statement))?;
        Ok(index.name)
    }
}

#[async_trait]
impl TransactionControl for PgTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        match self.tx.into_inner() {
            Some(tx) => tx.commit().await.map_err(db_error),
            None => Err(StoreError::Internal("transaction already finished".to_string())),
        }
    }

    async fn rollback(self) -> Result<(), StoreError> {
        match self.tx.into_inner() {
            Some(tx) => tx.rollback().await.map_err(db_error),
            None => Err(StoreError::Internal("transaction already finished".to_string())),
        }
    }
}
