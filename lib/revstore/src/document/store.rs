//! Versioned storage over a document executor.
//!
//! Every mutation here is one or two single-document operations. The ref move
//! in `save_one` and `update_ref` is a detach followed by an attach (or an
//! insert); a concurrent writer can land between the two. Run the store over
//! a transaction handle when that window matters.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::{
    Delete, Document, DocumentExecutor, Filter, Index, MetadataRow, Order, Page, Pagination,
    Query, Update, Upsert, decode_meta, decode_version, encode_version, fields,
};
use crate::{
    LATEST, QueryVisitor, Ref, StorageDatetime, StoreError, Version, VersionOrRef, VersionQuery,
    VersionedRepository, VersionedValue,
};

/// One decoded version row together with its logical id.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub id: String,
    pub value: VersionedValue<T>,
}

impl<T> Record<T> {
    pub fn into_value(self) -> VersionedValue<T> {
        self.value
    }
}

/// Translate a version query into row filters.
pub fn selector_filters(query: &VersionQuery) -> Vec<Filter> {
    query.accept(&mut SelectorFilters)
}

struct SelectorFilters;

impl QueryVisitor for SelectorFilters {
    type Output = Vec<Filter>;

    fn all(&mut self) -> Vec<Filter> {
        Vec::new()
    }

    fn equal(&mut self, selector: &VersionOrRef) -> Vec<Filter> {
        vec![selector.fold(
            |version| Filter::Eq(fields::VERSION.to_string(), version.into()),
            |reference| Filter::Contains(fields::REFS.to_string(), reference.into()),
        )]
    }

    fn newer_than(&mut self, version: &Version) -> Vec<Filter> {
        vec![Filter::Gt(fields::VERSION.to_string(), version.into())]
    }

    fn older_than(&mut self, version: &Version) -> Vec<Filter> {
        vec![Filter::Lt(fields::VERSION.to_string(), version.into())]
    }

    fn range(&mut self, after: &Version, before: &Version) -> Vec<Filter> {
        vec![
            Filter::Gt(fields::VERSION.to_string(), after.into()),
            Filter::Lt(fields::VERSION.to_string(), before.into()),
        ]
    }
}

/// Versioned records of one collection.
#[derive(Debug, Clone)]
pub struct DocumentStore<E> {
    executor: E,
    collection: String,
}

impl<E: DocumentExecutor> DocumentStore<E> {
    pub fn new(executor: E, collection: impl Into<String>) -> Self {
        Self {
            executor,
            collection: collection.into(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Version rows matching `filters` and `query`, in commit order.
    fn version_query(&self, filters: Vec<Filter>, query: &VersionQuery) -> Query {
        Query::new(&self.collection)
            .is_not_null(fields::VERSION)
            .filters(filters)
            .filters(selector_filters(query))
            .order_by(fields::VERSION, Order::Asc)
    }

    fn decode_all<T: DeserializeOwned>(
        documents: Vec<Document>,
    ) -> Result<Vec<Record<T>>, StoreError> {
        documents
            .into_iter()
            .map(|document| decode_version(document).map(|(id, value)| Record { id, value }))
            .collect()
    }

    pub async fn find_one<T: DeserializeOwned>(
        &self,
        filters: Vec<Filter>,
        query: &VersionQuery,
    ) -> Result<Option<Record<T>>, StoreError> {
        let document = self
            .executor
            .fetch_optional(self.version_query(filters, query))
            .await?;
        document
            .map(|document| decode_version(document).map(|(id, value)| Record { id, value }))
            .transpose()
    }

    pub async fn find<T: DeserializeOwned>(
        &self,
        filters: Vec<Filter>,
        query: &VersionQuery,
    ) -> Result<Vec<Record<T>>, StoreError> {
        let documents = self.executor.fetch(self.version_query(filters, query)).await?;
        Self::decode_all(documents)
    }

    /// Like [`find`](Self::find), skipping archived ids.
    pub async fn find_live<T: DeserializeOwned>(
        &self,
        filters: Vec<Filter>,
        query: &VersionQuery,
    ) -> Result<Vec<Record<T>>, StoreError> {
        let documents = self
            .executor
            .fetch(self.version_query(filters, query).exclude_archived())
            .await?;
        Self::decode_all(documents)
    }

    pub async fn paginate<T: DeserializeOwned>(
        &self,
        filters: Vec<Filter>,
        query: &VersionQuery,
        pagination: Pagination,
    ) -> Result<Page<Record<T>>, StoreError> {
        self.page(self.version_query(filters, query), pagination).await
    }

    pub async fn paginate_live<T: DeserializeOwned>(
        &self,
        filters: Vec<Filter>,
        query: &VersionQuery,
        pagination: Pagination,
    ) -> Result<Page<Record<T>>, StoreError> {
        self.page(
            self.version_query(filters, query).exclude_archived(),
            pagination,
        )
        .await
    }

    async fn page<T: DeserializeOwned>(
        &self,
        query: Query,
        pagination: Pagination,
    ) -> Result<Page<Record<T>>, StoreError> {
        let total = self.executor.count(query.clone()).await?;
        let documents = self
            .executor
            .fetch(query.offset(pagination.offset).limit(pagination.limit))
            .await?;
        Ok(Page {
            items: Self::decode_all(documents)?,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    /// The version of `id` matching `query`; `All` means `latest`.
    pub async fn load<T: DeserializeOwned>(
        &self,
        id: &str,
        query: &VersionQuery,
    ) -> Result<Option<VersionedValue<T>>, StoreError> {
        let record = self
            .find_one(
                vec![Filter::Eq(fields::ID.to_string(), id.into())],
                &query.or_latest(),
            )
            .await?;
        Ok(record.map(Record::into_value))
    }

    /// First match per id, in the order of `ids`. Unmatched ids are omitted.
    pub async fn load_all<T: DeserializeOwned>(
        &self,
        ids: &[String],
        query: &VersionQuery,
    ) -> Result<Vec<VersionedValue<T>>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self
            .find::<T>(
                vec![Filter::In(fields::ID.to_string(), ids.into())],
                &query.or_latest(),
            )
            .await?;

        let mut first: HashMap<String, VersionedValue<T>> = HashMap::new();
        for record in records {
            first.entry(record.id).or_insert(record.value);
        }
        Ok(ids.iter().filter_map(|id| first.remove(id)).collect())
    }

    pub async fn history<T: DeserializeOwned>(
        &self,
        id: &str,
    ) -> Result<Vec<VersionedValue<T>>, StoreError> {
        let records = self
            .find(
                vec![Filter::Eq(fields::ID.to_string(), id.into())],
                &VersionQuery::All,
            )
            .await?;
        Ok(records.into_iter().map(Record::into_value).collect())
    }

    /// Identity of the row of `id` at `selector`, `latest` when unset.
    ///
    /// A miss is `NotFound` for every selector, including `latest` on an id
    /// that was never committed.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn meta(
        &self,
        id: &str,
        selector: Option<&VersionOrRef>,
    ) -> Result<VersionedValue<()>, StoreError> {
        let resolved = VersionOrRef::or_latest(selector.cloned());
        let query = self
            .version_query(
                vec![Filter::Eq(fields::ID.to_string(), id.into())],
                &VersionQuery::Equal(resolved.clone()),
            )
            .project([
                fields::ID,
                fields::VERSION,
                fields::PARENTS,
                fields::REFS,
                fields::TIMESTAMP,
            ]);

        match self.executor.fetch_optional(query).await? {
            Some(document) => Ok(decode_meta(document)?.1),
            None => Err(StoreError::NotFound(format!("{} of {}", resolved, id))),
        }
    }

    /// Commit `payload` as a new version of `id` at `dest`.
    ///
    /// The destination ref is detached from its holder before the new row is
    /// inserted. A failed insert leaves the ref with no holder.
    #[instrument(skip(self, payload), fields(collection = %self.collection))]
    pub async fn save_one<T: Serialize + Send + Sync>(
        &self,
        id: &str,
        payload: T,
        dest: Option<VersionOrRef>,
    ) -> Result<VersionedValue<T>, StoreError> {
        if self.is_archived(id).await? {
            return Err(StoreError::Archived(id.to_string()));
        }

        let dest = VersionOrRef::or_latest(dest);
        // a missing `latest` is the first write of `id`
        let current = match self.meta(id, Some(&dest)).await {
            Ok(current) => Some(current),
            Err(e) if e.is_not_found() && dest.is_latest() => None,
            Err(e) => return Err(e),
        };

        let value = VersionedValue::new(
            Version::new(),
            current.as_ref().map(VersionedValue::version),
            dest.reference().cloned(),
            StorageDatetime::now(),
            payload,
        )?;
        let document = encode_version(id, &value)?;

        let Some(reference) = dest.reference() else {
            self.executor.insert(&self.collection, document).await?;
            debug!(version = %value.version(), "committed");
            return Ok(value);
        };

        self.detach(id, reference, None).await?;
        if let Err(e) = self.executor.insert(&self.collection, document).await {
            // hand the ref back to the version it was taken from
            if let Some(holder) = &current {
                if let Err(restore) = self.attach(id, reference, &holder.version()).await {
                    warn!(%reference, error = %restore, "could not restore ref after failed insert");
                }
            }
            return Err(e);
        }
        debug!(version = %value.version(), "committed");

        Ok(value)
    }

    /// Move `reference` to the version at `dest`, or only detach it when
    /// `dest` is `None`.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn update_ref(
        &self,
        id: &str,
        reference: &Ref,
        dest: Option<VersionOrRef>,
    ) -> Result<(), StoreError> {
        let target = self.resolve_target(id, dest.as_ref()).await?;
        self.detach(id, reference, None).await?;
        if let Some(target) = target {
            self.attach(id, reference, &target).await?;
        }
        Ok(())
    }

    /// Like [`update_ref`](Self::update_ref), but only when `expected`
    /// still holds `reference`. Otherwise fails with `Conflict` and changes
    /// nothing.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn update_ref_expecting(
        &self,
        id: &str,
        reference: &Ref,
        expected: &Version,
        dest: Option<VersionOrRef>,
    ) -> Result<(), StoreError> {
        let target = self.resolve_target(id, dest.as_ref()).await?;
        if self.detach(id, reference, Some(expected)).await? == 0 {
            return Err(StoreError::Conflict(format!(
                "ref {} of {} is not held by {}",
                reference, id, expected
            )));
        }
        if let Some(target) = target {
            self.attach(id, reference, &target).await?;
        }
        Ok(())
    }

    pub async fn delete_ref(&self, id: &str, reference: &Ref) -> Result<(), StoreError> {
        self.update_ref(id, reference, None).await
    }

    async fn resolve_target(
        &self,
        id: &str,
        dest: Option<&VersionOrRef>,
    ) -> Result<Option<Version>, StoreError> {
        let Some(dest) = dest else {
            return Ok(None);
        };
        Ok(Some(self.meta(id, Some(dest)).await?.version()))
    }

    async fn detach(
        &self,
        id: &str,
        reference: &Ref,
        expected: Option<&Version>,
    ) -> Result<u64, StoreError> {
        let mut update = Update::new(&self.collection)
            .eq(fields::ID, id)
            .contains(fields::REFS, reference);
        if let Some(expected) = expected {
            update = update.eq(fields::VERSION, expected);
        }
        let modified = self.executor.update_one(update.pull(fields::REFS, reference)).await?;
        debug!(%reference, modified, "detached ref");
        Ok(modified)
    }

    async fn attach(&self, id: &str, reference: &Ref, target: &Version) -> Result<(), StoreError> {
        let update = Update::new(&self.collection)
            .eq(fields::ID, id)
            .eq(fields::VERSION, target)
            .add_to_set(fields::REFS, reference);
        let modified = self.executor.update_one(update).await?;
        debug!(%reference, version = %target, modified, "attached ref");
        Ok(())
    }

    /// True when `id` has an archived metadata row.
    pub async fn is_archived(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .metadata(id)
            .await?
            .map(|row| row.archived)
            .unwrap_or(false))
    }

    /// The metadata row of `id`, if one was ever written.
    pub async fn metadata(&self, id: &str) -> Result<Option<MetadataRow>, StoreError> {
        let query = Query::new(&self.collection)
            .eq(fields::ID, id)
            .eq(fields::META, true);
        self.executor
            .fetch_optional(query)
            .await?
            .map(MetadataRow::from_document)
            .transpose()
    }

    /// Set or clear the archival flag. Clearing deletes the metadata row.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn archive_one(&self, id: &str, archived: bool) -> Result<(), StoreError> {
        if !archived {
            let deleted = self
                .executor
                .delete(
                    Delete::new(&self.collection)
                        .eq(fields::ID, id)
                        .eq(fields::META, true),
                )
                .await?;
            debug!(deleted, "cleared archival flag");
            return Ok(());
        }

        let now = StorageDatetime::now();
        let upsert = Upsert::new(&self.collection)
            .key(fields::ID, id)
            .key(fields::META, true)
            .set(fields::ARCHIVED, true)
            .set(fields::UPDATED, now)
            .set_on_insert(fields::CREATED, now);
        self.executor.upsert(upsert).await?;
        debug!("set archival flag");
        Ok(())
    }

    pub async fn archive_all(&self, ids: &[String], archived: bool) -> Result<(), StoreError> {
        for id in ids {
            self.archive_one(id, archived).await?;
        }
        Ok(())
    }

    /// Hard delete every row of `id`, metadata included.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn remove_one(&self, id: &str) -> Result<u64, StoreError> {
        self.executor
            .delete(Delete::new(&self.collection).eq(fields::ID, id))
            .await
    }

    pub async fn remove_all(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.executor
            .delete(Delete::new(&self.collection).r#in(fields::ID, ids))
            .await
    }

    /// Drop the whole collection.
    pub async fn empty(&self) -> Result<(), StoreError> {
        self.executor.drop_collection(&self.collection).await
    }

    /// Declare the built-in indexes plus the caller's.
    ///
    /// A caller key may name several comma-separated fields for a compound
    /// index. Caller unique keys only cover the versions holding `latest`, so
    /// they mean "unique among current heads". Returns the names of every
    /// declared index.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn create_indexes(
        &self,
        keys: &[&str],
        unique_keys: &[&str],
    ) -> Result<Vec<String>, StoreError> {
        self.executor.ensure_collection(&self.collection).await?;

        let mut indexes = vec![
            Index::new(&self.collection, [fields::ID, fields::VERSION]).unique(),
            Index::new(&self.collection, [fields::ID, fields::META])
                .unique()
                .sparse(),
            Index::new(&self.collection, [fields::REFS]).array(),
            Index::new(&self.collection, [fields::PARENTS]).array(),
        ];
        indexes.extend(keys.iter().map(|key| Index::new(&self.collection, split_key(key))));
        indexes.extend(
            unique_keys
                .iter()
                .map(|key| {
                    Index::new(&self.collection, split_key(key))
                        .unique()
                        .within(fields::REFS, LATEST)
                }),
        );

        let mut names = Vec::with_capacity(indexes.len());
        for index in indexes {
            names.push(self.executor.create_index(index).await?);
        }
        Ok(names)
    }
}

fn split_key(key: &str) -> Vec<String> {
    key.split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl<T, E> VersionedRepository<T> for DocumentStore<E>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    E: DocumentExecutor,
{
    async fn load(
        &self,
        id: &str,
        query: &VersionQuery,
    ) -> Result<Option<VersionedValue<T>>, StoreError> {
        DocumentStore::load(self, id, query).await
    }

    async fn load_all(
        &self,
        ids: &[String],
        query: &VersionQuery,
    ) -> Result<Vec<VersionedValue<T>>, StoreError> {
        DocumentStore::load_all(self, ids, query).await
    }

    async fn history(&self, id: &str) -> Result<Vec<VersionedValue<T>>, StoreError> {
        DocumentStore::history(self, id).await
    }

    async fn save(
        &self,
        id: &str,
        payload: T,
        dest: Option<VersionOrRef>,
    ) -> Result<VersionedValue<T>, StoreError> {
        self.save_one(id, payload, dest).await
    }

    async fn update_ref(
        &self,
        id: &str,
        reference: &Ref,
        dest: Option<VersionOrRef>,
    ) -> Result<(), StoreError> {
        DocumentStore::update_ref(self, id, reference, dest).await
    }

    async fn is_archived(&self, id: &str) -> Result<bool, StoreError> {
        DocumentStore::is_archived(self, id).await
    }

    async fn archive(&self, id: &str, archived: bool) -> Result<(), StoreError> {
        self.archive_one(id, archived).await
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.remove_one(id).await.map(|_| ())
    }

    async fn remove_all(&self, ids: &[String]) -> Result<(), StoreError> {
        DocumentStore::remove_all(self, ids).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::document::MemoryExecutor;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
    }

    fn note(title: &str) -> Note {
        Note {
            title: title.to_string(),
        }
    }

    fn store() -> DocumentStore<MemoryExecutor> {
        DocumentStore::new(MemoryExecutor::new(), "pages")
    }

    #[test]
    fn selector_filter_translation() {
        let v = Version::new();
        let w = Version::new();

        assert!(selector_filters(&VersionQuery::all()).is_empty());
        assert_eq!(
            selector_filters(&VersionQuery::from(v)),
            vec![Filter::Eq("__v".to_string(), v.into())]
        );
        assert_eq!(
            selector_filters(&VersionQuery::latest()),
            vec![Filter::Contains("__r".to_string(), "latest".into())]
        );
        assert_eq!(
            selector_filters(&VersionQuery::range(v, w)),
            vec![
                Filter::Gt("__v".to_string(), v.into()),
                Filter::Lt("__v".to_string(), w.into()),
            ]
        );
    }

    #[tokio::test]
    async fn save_links_parents_and_moves_latest() {
        let store = store();
        let first = store.save_one("x", note("A"), None).await.unwrap();
        let second = store.save_one("x", note("B"), None).await.unwrap();

        assert!(first.parents().is_empty());
        assert!(second.has_parent(&first.version()));

        let history = store.history::<Note>("x").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].refs().is_empty());
        assert!(history[1].has_ref(&Ref::latest()));

        let latest = store
            .load::<Note>("x", &VersionQuery::all())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.payload(), &note("B"));
    }

    #[tokio::test]
    async fn save_to_unknown_ref_is_not_found() {
        let store = store();
        store.save_one("x", note("A"), None).await.unwrap();

        let err = store
            .save_one("x", note("B"), Some(Ref::new("draft").or_version()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.history::<Note>("x").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn meta_misses_are_not_found() {
        let store = store();
        assert!(store.meta("x", None).await.unwrap_err().is_not_found());
        assert!(
            store
                .meta("x", Some(&Ref::new("stage").or_version()))
                .await
                .unwrap_err()
                .is_not_found()
        );

        let saved = store.save_one("x", note("A"), None).await.unwrap();
        let meta = store.meta("x", None).await.unwrap();
        assert_eq!(meta.version(), saved.version());
        assert!(meta.has_ref(&Ref::latest()));
    }

    #[tokio::test]
    async fn update_ref_moves_and_detaches() {
        let store = store();
        let v1 = store.save_one("x", note("A"), None).await.unwrap().version();
        let v2 = store.save_one("x", note("B"), None).await.unwrap().version();
        let stage = Ref::new("stage");

        store.update_ref("x", &stage, Some(v1.or_ref())).await.unwrap();
        store.update_ref("x", &stage, Some(v2.or_ref())).await.unwrap();

        let holders: Vec<_> = store
            .history::<Note>("x")
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.has_ref(&stage))
            .map(|v| v.version())
            .collect();
        assert_eq!(holders, vec![v2]);

        store.delete_ref("x", &stage).await.unwrap();
        assert!(
            store
                .load::<Note>("x", &stage.clone().into())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn update_ref_to_missing_destination_keeps_holder() {
        let store = store();
        let v1 = store.save_one("x", note("A"), None).await.unwrap().version();
        let stage = Ref::new("stage");
        store.update_ref("x", &stage, Some(v1.or_ref())).await.unwrap();

        let err = store
            .update_ref("x", &stage, Some(Version::new().or_ref()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.meta("x", Some(&stage.or_version())).await.is_ok());
    }

    #[tokio::test]
    async fn update_ref_expecting_detects_a_moved_ref() {
        let store = store();
        let v1 = store.save_one("x", note("A"), None).await.unwrap().version();
        let v2 = store.save_one("x", note("B"), None).await.unwrap().version();
        let stage = Ref::new("stage");
        store.update_ref("x", &stage, Some(v1.or_ref())).await.unwrap();

        let err = store
            .update_ref_expecting("x", &stage, &v2, Some(v2.or_ref()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store
            .update_ref_expecting("x", &stage, &v1, Some(v2.or_ref()))
            .await
            .unwrap();
        let at_stage = store
            .meta("x", Some(&stage.or_version()))
            .await
            .unwrap();
        assert_eq!(at_stage.version(), v2);
    }

    #[tokio::test]
    async fn archive_gates_save_and_live_reads() {
        let store = store();
        store.save_one("x", note("A"), None).await.unwrap();
        store.save_one("y", note("B"), None).await.unwrap();

        store.archive_one("x", true).await.unwrap();
        store.archive_one("x", true).await.unwrap();
        assert!(store.is_archived("x").await.unwrap());
        assert!(
            store
                .save_one("x", note("C"), None)
                .await
                .unwrap_err()
                .is_archived()
        );

        let live = store
            .find_live::<Note>(Vec::new(), &VersionQuery::latest())
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "y");

        // history is untouched by archival
        assert!(store.load::<Note>("x", &VersionQuery::all()).await.unwrap().is_some());

        store.archive_one("x", false).await.unwrap();
        store.archive_one("x", false).await.unwrap();
        assert!(!store.is_archived("x").await.unwrap());
        store.save_one("x", note("C"), None).await.unwrap();
    }

    #[tokio::test]
    async fn archive_keeps_created_across_rewrites() {
        let store = store();
        store.archive_one("x", true).await.unwrap();
        let first = store.metadata("x").await.unwrap().unwrap();
        store.archive_one("x", true).await.unwrap();
        let second = store.metadata("x").await.unwrap().unwrap();

        assert!(second.archived);
        assert_eq!(first.created, second.created);
        assert!(second.updated >= first.updated);
    }

    #[tokio::test]
    async fn load_all_keeps_input_order() {
        let store = store();
        store.save_one("b", note("B"), None).await.unwrap();
        store.save_one("a", note("A1"), None).await.unwrap();
        store.save_one("a", note("A2"), None).await.unwrap();

        let ids = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let loaded = store
            .load_all::<Note>(&ids, &VersionQuery::all())
            .await
            .unwrap();
        let titles: Vec<_> = loaded.iter().map(|v| v.payload().title.as_str()).collect();
        assert_eq!(titles, vec!["A2", "B"]);
    }

    #[tokio::test]
    async fn ordering_queries_walk_history() {
        let store = store();
        let v1 = store.save_one("x", note("1"), None).await.unwrap().version();
        let v2 = store.save_one("x", note("2"), None).await.unwrap().version();
        let v3 = store.save_one("x", note("3"), None).await.unwrap().version();
        let by_id = vec![Filter::Eq(fields::ID.to_string(), "x".into())];

        let newer = store
            .find::<Note>(by_id.clone(), &VersionQuery::newer_than(v1))
            .await
            .unwrap();
        assert_eq!(newer.len(), 2);

        let between = store
            .find::<Note>(by_id.clone(), &VersionQuery::range(v1, v3))
            .await
            .unwrap();
        assert_eq!(between.len(), 1);
        assert_eq!(between[0].value.version(), v2);

        let page = store
            .paginate::<Note>(by_id, &VersionQuery::all(), Pagination::first(2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_next());
    }

    #[tokio::test]
    async fn remove_and_empty() {
        let store = store();
        store.save_one("x", note("A"), None).await.unwrap();
        store.save_one("y", note("B"), None).await.unwrap();
        store.archive_one("x", true).await.unwrap();

        assert_eq!(store.remove_one("x").await.unwrap(), 2);
        assert!(!store.is_archived("x").await.unwrap());
        assert!(store.history::<Note>("x").await.unwrap().is_empty());

        store.empty().await.unwrap();
        assert!(store.history::<Note>("y").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unique_keys_do_not_block_archival() {
        let store = store();
        store.create_indexes(&[], &["title"]).await.unwrap();
        store.save_one("a", note("A"), None).await.unwrap();
        store.save_one("b", note("B"), None).await.unwrap();

        store.archive_one("a", true).await.unwrap();
        store.archive_one("b", true).await.unwrap();
        assert!(store.is_archived("a").await.unwrap());
        assert!(store.is_archived("b").await.unwrap());
    }

    #[tokio::test]
    async fn unique_keys_apply_to_current_heads() {
        let store = store();
        store.create_indexes(&[], &["title"]).await.unwrap();

        // a new head may repeat the value of the head it replaces
        let first = store.save_one("a", note("A"), None).await.unwrap();
        let second = store.save_one("a", note("A"), None).await.unwrap();
        assert!(second.has_parent(&first.version()));

        let b1 = store.save_one("b", note("B"), None).await.unwrap();
        let err = store.save_one("b", note("A"), None).await.unwrap_err();
        assert!(err.is_internal());

        // the rejected insert hands `latest` back to its holder
        let latest = store
            .load::<Note>("b", &VersionQuery::all())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.version(), b1.version());
        assert_eq!(store.history::<Note>("b").await.unwrap().len(), 1);

        let b2 = store.save_one("b", note("C"), None).await.unwrap();
        assert!(b2.has_parent(&b1.version()));
    }

    #[tokio::test]
    async fn create_indexes_declares_builtins_and_compounds() {
        let store = store();
        let names = store
            .create_indexes(&["title", "author,slug"], &["slug"])
            .await
            .unwrap();
        assert_eq!(
            names,
            vec![
                "pages___id___v_unique",
                "pages___id___m_unique",
                "pages___r",
                "pages___w",
                "pages_title",
                "pages_author_slug",
                "pages_slug_unique",
            ]
        );
    }
}
