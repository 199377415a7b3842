//! In-process document executor.
//!
//! Holds every collection in one map behind a lock. Each statement runs
//! under the lock from start to finish, which gives the same single-document
//! atomicity a real document database offers and nothing more.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value as Json;
use tracing::trace;

use super::query::{
    Delete, Document, DocumentExecutor, Filter, Index, Order, Query, Update, UpdateOp, Upsert,
};
use super::fields;
use crate::{ConnectionConfig, RepositoryConnection, StoreError};

#[derive(Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<Index>,
}

impl Collection {
    fn archived_ids(&self) -> HashSet<String> {
        self.documents
            .iter()
            .filter(|doc| is_true(doc.get(fields::META)) && is_true(doc.get(fields::ARCHIVED)))
            .filter_map(|doc| doc.get(fields::ID).and_then(Json::as_str))
            .map(str::to_string)
            .collect()
    }

    fn select(&self, query: &Query) -> Vec<&Document> {
        let archived = if query.exclude_archived {
            self.archived_ids()
        } else {
            HashSet::new()
        };

        self.documents
            .iter()
            .filter(|doc| query.filters.iter().all(|filter| matches(doc, filter)))
            .filter(|doc| {
                doc.get(fields::ID)
                    .and_then(Json::as_str)
                    .is_none_or(|id| !archived.contains(id))
            })
            .collect()
    }

    fn position(&self, filters: &[Filter]) -> Option<usize> {
        self.documents
            .iter()
            .position(|doc| filters.iter().all(|filter| matches(doc, filter)))
    }

    /// Fail when `candidate` would collide with another document on a
    /// unique index. `skip` is the candidate's own slot when it replaces one.
    fn check_unique(&self, candidate: &Document, skip: Option<usize>) -> Result<(), StoreError> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let Some(key) = index_key(index, candidate) else {
                continue;
            };
            let collides = self
                .documents
                .iter()
                .enumerate()
                .filter(|(slot, _)| Some(*slot) != skip)
                .any(|(_, doc)| index_key(index, doc).as_ref() == Some(&key));
            if collides {
                return Err(StoreError::Internal(format!(
                    "duplicate key for index {}",
                    index.name
                )));
            }
        }
        Ok(())
    }
}

/// Values of the unique index keys in `doc`, or `None` when the index does
/// not cover it. Documents missing a key or holding null never collide,
/// like NULLs in a SQL unique index.
fn index_key(index: &Index, doc: &Document) -> Option<Vec<Json>> {
    if let Some((field, value)) = &index.scope {
        let holds = lookup(doc, field)
            .and_then(Json::as_array)
            .is_some_and(|items| items.iter().any(|item| item.as_str() == Some(value)));
        if !holds {
            return None;
        }
    }

    index
        .keys
        .iter()
        .map(|field| lookup(doc, field).filter(|value| !value.is_null()).cloned())
        .collect()
}

fn is_true(value: Option<&Json>) -> bool {
    value.and_then(Json::as_bool).unwrap_or(false)
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Json> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn lookup_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Json> {
    let mut segments = path.split('.');
    let mut current = doc.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

/// The slot at `path`, creating missing parents as objects.
fn slot_mut<'a>(doc: &'a mut Document, path: &str) -> Result<&'a mut Json, StoreError> {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut map = doc;
    for segment in parents.into_iter().flat_map(|parents| parents.split('.')) {
        let next = map
            .entry(segment)
            .or_insert_with(|| Json::Object(Document::new()));
        map = match next {
            Json::Object(inner) => inner,
            _ => {
                return Err(StoreError::Internal(format!(
                    "field '{}' is not an object",
                    segment
                )));
            }
        };
    }
    Ok(map.entry(last).or_insert(Json::Null))
}

fn compare(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::String(a), Json::String(b)) => Some(a.cmp(b)),
        (Json::Number(a), Json::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Json::Bool(a), Json::Bool(b)) => Some(a.cmp(b)),
        (Json::Null, Json::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn equals(a: &Json, b: &Json) -> bool {
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn matches(doc: &Document, filter: &Filter) -> bool {
    let field = lookup(doc, filter.field());
    let Some(expected) = filter.value().map(|value| value.to_json()) else {
        let present = field.is_some_and(|value| !value.is_null());
        return match filter {
            Filter::IsNotNull(_) => present,
            _ => !present,
        };
    };

    let ordered = |wanted: &[Ordering]| {
        field
            .and_then(|value| compare(value, &expected))
            .is_some_and(|ordering| wanted.contains(&ordering))
    };

    match filter {
        Filter::Eq(..) => field.is_some_and(|value| equals(value, &expected)),
        Filter::Ne(..) => !field.is_some_and(|value| equals(value, &expected)),
        Filter::Gt(..) => ordered(&[Ordering::Greater]),
        Filter::Gte(..) => ordered(&[Ordering::Greater, Ordering::Equal]),
        Filter::Lt(..) => ordered(&[Ordering::Less]),
        Filter::Lte(..) => ordered(&[Ordering::Less, Ordering::Equal]),
        Filter::In(..) => field.is_some_and(|value| match &expected {
            Json::Array(candidates) => candidates.iter().any(|c| equals(value, c)),
            single => equals(value, single),
        }),
        Filter::Contains(..) => field
            .and_then(Json::as_array)
            .is_some_and(|items| items.iter().any(|item| equals(item, &expected))),
        Filter::IsNull(_) | Filter::IsNotNull(_) => false,
    }
}

fn sort(documents: &mut [&Document], order_by: &[(String, Order)]) {
    documents.sort_by(|a, b| {
        for (field, order) in order_by {
            let ordering = match (lookup(a, field), lookup(b, field)) {
                (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ordering = match order {
                Order::Asc => ordering,
                Order::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn project(doc: &Document, projection: &[String]) -> Document {
    if projection.is_empty() {
        return doc.clone();
    }
    projection
        .iter()
        .filter_map(|field| doc.get(field).map(|value| (field.clone(), value.clone())))
        .collect()
}

fn apply(doc: &mut Document, op: &UpdateOp) -> Result<(), StoreError> {
    match op {
        UpdateOp::Set(field, value) => {
            *slot_mut(doc, field)? = value.to_json();
        }
        UpdateOp::AddToSet(field, value) => {
            let value = value.to_json();
            let slot = slot_mut(doc, field)?;
            if slot.is_null() {
                *slot = Json::Array(Vec::new());
            }
            let Json::Array(items) = slot else {
                return Err(StoreError::Internal(format!("field '{}' is not an array", field)));
            };
            if !items.iter().any(|item| equals(item, &value)) {
                items.push(value);
            }
        }
        UpdateOp::Pull(field, value) => {
            let value = value.to_json();
            if let Some(Json::Array(items)) = lookup_mut(doc, field) {
                items.retain(|item| !equals(item, &value));
            }
        }
    }
    Ok(())
}

/// Document database kept in process memory.
///
/// Clones share the same collections.
#[derive(Clone, Default)]
pub struct MemoryExecutor {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl std::fmt::Debug for MemoryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryExecutor")
            .field("collections", &self.collections.read().len())
            .finish()
    }
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the indexes declared on `collection`.
    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.iter().map(|index| index.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of documents in `collection`, metadata rows included.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentExecutor for MemoryExecutor {
    async fn fetch(&self, query: Query) -> Result<Vec<Document>, StoreError> {
        trace!(collection = %query.collection, filters = ?query.filters, "fetch");
        let collections = self.collections.read();
        let Some(collection) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut selected = collection.select(&query);
        sort(&mut selected, &query.order_by);

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);
        Ok(selected
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|doc| project(doc, &query.projection))
            .collect())
    }

    async fn count(&self, query: Query) -> Result<u64, StoreError> {
        let collections = self.collections.read();
        Ok(collections
            .get(&query.collection)
            .map(|collection| collection.select(&query).len() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<u64, StoreError> {
        trace!(collection, "insert");
        let mut collections = self.collections.write();
        let collection = collections.entry(collection.to_string()).or_default();
        collection.check_unique(&document, None)?;
        collection.documents.push(document);
        Ok(1)
    }

    async fn update_one(&self, update: Update) -> Result<u64, StoreError> {
        trace!(collection = %update.collection, filters = ?update.filters, ops = ?update.ops, "update_one");
        let mut collections = self.collections.write();
        let Some(collection) = collections.get_mut(&update.collection) else {
            return Ok(0);
        };
        let Some(slot) = collection.position(&update.filters) else {
            return Ok(0);
        };

        let mut document = collection.documents[slot].clone();
        for op in &update.ops {
            apply(&mut document, op)?;
        }
        collection.check_unique(&document, Some(slot))?;
        collection.documents[slot] = document;
        Ok(1)
    }

    async fn upsert(&self, upsert: Upsert) -> Result<u64, StoreError> {
        trace!(collection = %upsert.collection, keys = ?upsert.keys, "upsert");
        let mut collections = self.collections.write();
        let collection = collections.entry(upsert.collection.clone()).or_default();
        let filters: Vec<Filter> = upsert
            .keys
            .iter()
            .map(|(field, value)| Filter::Eq(field.clone(), value.clone()))
            .collect();

        match collection.position(&filters) {
            Some(slot) => {
                let mut document = collection.documents[slot].clone();
                for (field, value) in &upsert.set {
                    *slot_mut(&mut document, field)? = value.to_json();
                }
                collection.check_unique(&document, Some(slot))?;
                collection.documents[slot] = document;
            }
            None => {
                let document = upsert.to_document();
                collection.check_unique(&document, None)?;
                collection.documents.push(document);
            }
        }
        Ok(1)
    }

    async fn delete(&self, delete: Delete) -> Result<u64, StoreError> {
        trace!(collection = %delete.collection, filters = ?delete.filters, "delete");
        let mut collections = self.collections.write();
        let Some(collection) = collections.get_mut(&delete.collection) else {
            return Ok(0);
        };
        let before = collection.documents.len();
        collection
            .documents
            .retain(|doc| !delete.filters.iter().all(|filter| matches(doc, filter)));
        Ok((before - collection.documents.len()) as u64)
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collections.write().remove(collection);
        Ok(())
    }

    async fn create_index(&self, index: Index) -> Result<String, StoreError> {
        let mut collections = self.collections.write();
        let collection = collections.entry(index.collection.clone()).or_default();
        let name = index.name.clone();
        if !collection.indexes.iter().any(|existing| existing.name == name) {
            collection.indexes.push(index);
        }
        Ok(name)
    }
}

#[async_trait]
impl RepositoryConnection for MemoryExecutor {
    async fn connect(_config: impl Into<ConnectionConfig> + Send) -> Result<Self, StoreError> {
        Ok(Self::new())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Json) -> Document {
        match value {
            Json::Object(map) => map,
            _ => Document::new(),
        }
    }

    async fn seeded() -> MemoryExecutor {
        let executor = MemoryExecutor::new();
        for document in [
            json!({"__id": "a", "__v": "1", "__r": ["latest"], "n": 3, "meta": {"slug": "x"}}),
            json!({"__id": "a", "__v": "2", "__r": [], "n": 1}),
            json!({"__id": "b", "__v": "3", "__r": ["latest"], "n": 2}),
        ] {
            executor.insert("items", doc(document)).await.unwrap();
        }
        executor
    }

    #[tokio::test]
    async fn filters_cover_each_operator() {
        let executor = seeded().await;
        let count = |query: Query| {
            let executor = executor.clone();
            async move { executor.count(query).await.unwrap() }
        };

        assert_eq!(count(Query::new("items").eq("__id", "a")).await, 2);
        assert_eq!(count(Query::new("items").filter(Filter::Ne("__id".into(), "a".into()))).await, 1);
        assert_eq!(count(Query::new("items").gt("n", 1i64)).await, 2);
        assert_eq!(count(Query::new("items").filter(Filter::Lte("n".into(), 2i64.into()))).await, 2);
        assert_eq!(count(Query::new("items").contains("__r", "latest")).await, 2);
        assert_eq!(
            count(Query::new("items").r#in("__v", vec!["1".to_string(), "3".to_string()])).await,
            2
        );
        assert_eq!(count(Query::new("items").eq("meta.slug", "x")).await, 1);
        assert_eq!(count(Query::new("items").filter(Filter::IsNull("meta".into()))).await, 2);
        assert_eq!(count(Query::new("missing")).await, 0);
    }

    #[tokio::test]
    async fn fetch_orders_pages_and_projects() {
        let executor = seeded().await;
        let docs = executor
            .fetch(
                Query::new("items")
                    .order_by("n", Order::Desc)
                    .offset(1)
                    .limit(1)
                    .project(["__v"]),
            )
            .await
            .unwrap();
        assert_eq!(docs, vec![doc(json!({"__v": "3"}))]);

        // count ignores paging
        let total = executor
            .count(Query::new("items").limit(1).offset(2))
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn update_one_touches_the_first_match_only() {
        let executor = seeded().await;
        let modified = executor
            .update_one(
                Update::new("items")
                    .eq("__id", "a")
                    .add_to_set("__r", "stage")
                    .add_to_set("__r", "stage"),
            )
            .await
            .unwrap();
        assert_eq!(modified, 1);
        assert_eq!(executor.count(Query::new("items").contains("__r", "stage")).await.unwrap(), 1);

        let pulled = executor
            .update_one(
                Update::new("items")
                    .contains("__r", "stage")
                    .pull("__r", "stage")
                    .set("meta.slug", "y"),
            )
            .await
            .unwrap();
        assert_eq!(pulled, 1);
        assert_eq!(executor.count(Query::new("items").contains("__r", "stage")).await.unwrap(), 0);
        assert_eq!(executor.count(Query::new("items").eq("meta.slug", "y")).await.unwrap(), 1);

        let none = executor
            .update_one(Update::new("items").eq("__id", "zzz").set("n", 0i64))
            .await
            .unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let executor = seeded().await;
        executor
            .create_index(Index::new("items", ["__id", "__v"]).unique())
            .await
            .unwrap();
        executor
            .create_index(Index::new("items", ["__id", "__m"]).unique().sparse())
            .await
            .unwrap();

        let err = executor
            .insert("items", doc(json!({"__id": "a", "__v": "1"})))
            .await
            .unwrap_err();
        assert!(err.is_internal());

        // sparse index ignores documents without the key
        executor
            .insert("items", doc(json!({"__id": "a", "__v": "9"})))
            .await
            .unwrap();

        executor
            .insert("items", doc(json!({"__id": "c", "__m": true})))
            .await
            .unwrap();
        assert!(
            executor
                .insert("items", doc(json!({"__id": "c", "__m": true})))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn documents_missing_a_unique_key_never_collide() {
        let executor = MemoryExecutor::new();
        executor
            .create_index(Index::new("items", ["slug"]).unique())
            .await
            .unwrap();

        for id in ["a", "b"] {
            executor
                .insert("items", doc(json!({"__id": id, "__m": true})))
                .await
                .unwrap();
        }
        executor
            .insert("items", doc(json!({"__id": "c", "slug": null})))
            .await
            .unwrap();
        executor
            .insert("items", doc(json!({"__id": "d", "slug": null})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scoped_unique_index_covers_holders_only() {
        let executor = MemoryExecutor::new();
        executor
            .create_index(Index::new("items", ["slug"]).unique().within("__r", "latest"))
            .await
            .unwrap();

        executor
            .insert("items", doc(json!({"__id": "a", "__v": "1", "__r": ["latest"], "slug": "s"})))
            .await
            .unwrap();
        // not a holder, so outside the index
        executor
            .insert("items", doc(json!({"__id": "a", "__v": "0", "__r": [], "slug": "s"})))
            .await
            .unwrap();

        let err = executor
            .insert("items", doc(json!({"__id": "b", "__v": "2", "__r": ["latest"], "slug": "s"})))
            .await
            .unwrap_err();
        assert!(err.is_internal());

        // attaching the scope value brings a document into the index
        let attach = executor
            .update_one(Update::new("items").eq("__v", "0").add_to_set("__r", "latest"))
            .await;
        assert!(attach.is_err());
    }

    #[tokio::test]
    async fn upsert_keeps_insert_only_fields() {
        let executor = MemoryExecutor::new();
        let upsert = |archived: bool, stamp: &str| {
            Upsert::new("items")
                .key("__id", "x")
                .key("__m", true)
                .set("__a", archived)
                .set_on_insert("__c", stamp)
        };

        executor.upsert(upsert(true, "first")).await.unwrap();
        executor.upsert(upsert(false, "second")).await.unwrap();

        let docs = executor.fetch(Query::new("items")).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("__a"), Some(&json!(false)));
        assert_eq!(docs[0].get("__c"), Some(&json!("first")));
    }

    #[tokio::test]
    async fn exclude_archived_drops_flagged_ids() {
        let executor = seeded().await;
        executor
            .insert("items", doc(json!({"__id": "a", "__m": true, "__a": true})))
            .await
            .unwrap();

        let live = executor
            .fetch(Query::new("items").is_not_null("__v").exclude_archived())
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].get("__id"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn delete_and_drop() {
        let executor = seeded().await;
        let deleted = executor
            .delete(Delete::new("items").eq("__id", "a"))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(executor.len("items"), 1);

        executor.drop_collection("items").await.unwrap();
        assert!(executor.is_empty("items"));
    }

    #[tokio::test]
    async fn create_index_is_idempotent() {
        let executor = MemoryExecutor::new();
        let first = executor.create_index(Index::new("items", ["__r"]).array()).await.unwrap();
        let second = executor.create_index(Index::new("items", ["__r"]).array()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(executor.index_names("items"), vec!["items___r".to_string()]);
    }
}
