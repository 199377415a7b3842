//! Database-agnostic document query builder.
//!
//! This module provides the statement shapes the document store issues and
//! the executor traits each backend (PostgreSQL, SurrealDB, in-process)
//! translates them through. Every statement touches one collection, and every
//! write is atomic for a single document only.

use async_trait::async_trait;

use crate::{Ref, StorageDatetime, StoreError, Version};

/// A stored document: a JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A value that can be bound to a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Strings(Vec<String>),
    Datetime(StorageDatetime),
    Null,
}

impl Value {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::UInt(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Value::from(*n),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Strings(v) => serde_json::Value::from(v.clone()),
            Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Strings(v)
    }
}

impl From<&[String]> for Value {
    fn from(v: &[String]) -> Self {
        Value::Strings(v.to_vec())
    }
}

impl From<StorageDatetime> for Value {
    fn from(dt: StorageDatetime) -> Self {
        Value::Datetime(dt)
    }
}

impl From<Version> for Value {
    fn from(version: Version) -> Self {
        Value::String(version.to_string())
    }
}

impl From<&Version> for Value {
    fn from(version: &Version) -> Self {
        Value::String(version.to_string())
    }
}

impl From<&Ref> for Value {
    fn from(reference: &Ref) -> Self {
        Value::String(reference.as_str().to_string())
    }
}

/// Filter conditions. Fields may be dotted paths into nested objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field = value
    Eq(String, Value),
    /// field != value (also matches documents without the field)
    Ne(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IN (values)
    In(String, Value),
    /// array field contains value
    Contains(String, Value),
    /// field missing or null
    IsNull(String),
    /// field present and not null
    IsNotNull(String),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _)
            | Filter::Ne(field, _)
            | Filter::Gt(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _)
            | Filter::Lte(field, _)
            | Filter::In(field, _)
            | Filter::Contains(field, _)
            | Filter::IsNull(field)
            | Filter::IsNotNull(field) => field,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Filter::Eq(_, v)
            | Filter::Ne(_, v)
            | Filter::Gt(_, v)
            | Filter::Gte(_, v)
            | Filter::Lt(_, v)
            | Filter::Lte(_, v)
            | Filter::In(_, v)
            | Filter::Contains(_, v) => Some(v),
            Filter::IsNull(_) | Filter::IsNotNull(_) => None,
        }
    }
}

/// True when `field` is a dotted path of `[A-Za-z0-9_]` segments.
///
/// Backends that have to splice field names into statement text check this
/// first.
pub fn is_valid_field(field: &str) -> bool {
    !field.is_empty()
        && field.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A read over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The collection to query.
    pub collection: String,
    /// Filter conditions, conjoined.
    pub filters: Vec<Filter>,
    /// Order by clauses.
    pub order_by: Vec<(String, Order)>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Offset for pagination.
    pub offset: Option<u64>,
    /// Top-level fields to return; empty means the whole document.
    pub projection: Vec<String>,
    /// Drop documents whose logical id has an archived metadata row.
    pub exclude_archived: bool,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            projection: Vec::new(),
            exclude_archived: false,
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Add an equality filter (shorthand for Filter::Eq).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an IN filter (shorthand for Filter::In).
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }

    /// Add an array containment filter.
    pub fn contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Contains(field.into(), value.into()))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(field.into(), value.into()))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt(field.into(), value.into()))
    }

    pub fn is_not_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::IsNotNull(field.into()))
    }

    /// Add an order-by clause.
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by.push((field.into(), order));
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset for pagination.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn project<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.projection.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Append the list-read stage: join each document with its id's metadata
    /// row and drop archived ids. Ids without a metadata row are kept.
    pub fn exclude_archived(mut self) -> Self {
        self.exclude_archived = true;
        self
    }
}

/// One modification applied to a matched document.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Append the value to an array field unless already present.
    AddToSet(String, Value),
    /// Remove every occurrence of the value from an array field.
    Pull(String, Value),
    /// Overwrite a field.
    Set(String, Value),
}

/// Atomic modification of at most one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            ops: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    pub fn contains(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Contains(field.into(), value.into()))
    }

    pub fn add_to_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::AddToSet(field.into(), value.into()));
        self
    }

    pub fn pull(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Pull(field.into(), value.into()));
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }
}

/// Update the document matching `keys`, or insert one built from `keys`,
/// `set` and `set_on_insert`.
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub collection: String,
    /// Equality keys identifying the document.
    pub keys: Vec<(String, Value)>,
    /// Fields written on insert and on update.
    pub set: Vec<(String, Value)>,
    /// Fields written only when the document is created.
    pub set_on_insert: Vec<(String, Value)>,
}

impl Upsert {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            keys: Vec::new(),
            set: Vec::new(),
            set_on_insert: Vec::new(),
        }
    }

    pub fn key(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keys.push((field.into(), value.into()));
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((field.into(), value.into()));
        self
    }

    pub fn set_on_insert(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_on_insert.push((field.into(), value.into()));
        self
    }

    /// The document an insert would create.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        for (field, value) in self.keys.iter().chain(&self.set).chain(&self.set_on_insert) {
            document.insert(field.clone(), value.to_json());
        }
        document
    }
}

/// A DELETE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// The collection to delete from.
    pub collection: String,
    /// Filter conditions.
    pub filters: Vec<Filter>,
}

impl Delete {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an IN filter.
    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(field.into(), values.into()))
    }
}

/// Index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub collection: String,
    pub name: String,
    pub keys: Vec<String>,
    pub unique: bool,
    /// Only index documents that carry every key.
    pub sparse: bool,
    /// Single key holding an array; index its elements.
    pub array: bool,
    /// Only index documents whose array field (first) holds the string
    /// (second).
    pub scope: Option<(String, String)>,
}

impl Index {
    pub fn new<S: Into<String>>(collection: impl Into<String>, keys: impl IntoIterator<Item = S>) -> Self {
        let collection = collection.into();
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let name = format!("{}_{}", collection, keys.join("_").replace('.', "_"));
        Self {
            collection,
            name,
            keys,
            unique: false,
            sparse: false,
            array: false,
            scope: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self.name.push_str("_unique");
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    /// Restrict the index to documents whose array `field` holds `value`.
    pub fn within(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.scope = Some((field.into(), value.into()));
        self
    }
}

/// Offset pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: u64) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(&self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.limit),
            limit: self.limit,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches across all pages.
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.offset.saturating_add(self.items.len() as u64) < self.total
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

/// Trait for executing statements against a document backend.
///
/// Every write is atomic for the one document it touches; nothing here spans
/// documents.
#[async_trait]
pub trait DocumentExecutor: Send + Sync {
    /// Execute a read and return the matching documents.
    async fn fetch(&self, query: Query) -> Result<Vec<Document>, StoreError>;

    /// Execute a read and return at most one document.
    async fn fetch_optional(&self, query: Query) -> Result<Option<Document>, StoreError> {
        let results = self.fetch(query.limit(1)).await?;
        Ok(results.into_iter().next())
    }

    /// Number of documents matching the query's filters. Limit and offset
    /// are ignored.
    async fn count(&self, query: Query) -> Result<u64, StoreError>;

    /// Check if any document matches.
    async fn exists(&self, query: Query) -> Result<bool, StoreError> {
        Ok(self.fetch_optional(query).await?.is_some())
    }

    /// Insert one document.
    async fn insert(&self, collection: &str, document: Document) -> Result<u64, StoreError>;

    /// Modify the first document matching the filters. Returns how many
    /// documents were modified (0 or 1).
    async fn update_one(&self, update: Update) -> Result<u64, StoreError>;

    /// Update or insert one document.
    async fn upsert(&self, upsert: Upsert) -> Result<u64, StoreError>;

    /// Delete every matching document and return how many went.
    async fn delete(&self, delete: Delete) -> Result<u64, StoreError>;

    /// Make sure the collection can be written to.
    async fn ensure_collection(&self, _collection: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// Drop the collection and everything in it.
    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Create an index if it does not exist yet; returns its name.
    async fn create_index(&self, index: Index) -> Result<String, StoreError>;
}

/// Executors that can group statements into one database transaction.
///
/// A `DocumentStore` built over the transaction handle runs its detach and
/// attach steps inside that transaction.
#[async_trait]
pub trait Transactional: DocumentExecutor {
    type Transaction: DocumentExecutor + TransactionControl;

    async fn begin_transaction(&self) -> Result<Self::Transaction, StoreError>;
}

/// Finish a transaction.
#[async_trait]
pub trait TransactionControl: Sized + Send + Sync {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
