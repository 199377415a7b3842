//! Scenarios every `VersionedRepository` backend has to pass.
//!
//! Each scenario is written once against the trait and run for the
//! in-memory store and for the document store over the in-process executor.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)]

use revstore::{
    DocumentStore, InMemoryStore, MemoryExecutor, Ref, StoreError, Version, VersionQuery,
    VersionedRepository,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Article {
    title: String,
    body: String,
}

fn article(title: &str) -> Article {
    Article {
        title: title.to_string(),
        body: format!("{} body", title),
    }
}

async fn linear_history(repo: &impl VersionedRepository<Article>) {
    let v1 = repo.save("x", article("A"), None).await.unwrap();
    let v2 = repo.save("x", article("B"), None).await.unwrap();
    let v3 = repo.save("x", article("C"), None).await.unwrap();

    let history = repo.history("x").await.unwrap();
    let versions: Vec<Version> = history.iter().map(|v| v.version()).collect();
    assert_eq!(versions, vec![v1.version(), v2.version(), v3.version()]);

    assert!(history[0].parents().is_empty());
    assert!(history[1].has_parent(&v1.version()));
    assert!(history[2].has_parent(&v2.version()));

    let holders: Vec<_> = history.iter().filter(|v| v.has_ref(&Ref::latest())).collect();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].version(), v3.version());

    let latest = repo.load("x", &VersionQuery::all()).await.unwrap().unwrap();
    assert_eq!(latest.payload(), &article("C"));

    let first = repo
        .load("x", &VersionQuery::from(v1.version()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.payload(), &article("A"));
}

async fn named_ref_fork(repo: &impl VersionedRepository<Article>) {
    let v1 = repo.save("x", article("A"), None).await.unwrap().version();
    let v2 = repo.save("x", article("B"), None).await.unwrap().version();
    let stage = Ref::new("stage");

    repo.update_ref("x", &stage, Some(v1.or_ref())).await.unwrap();
    let v3 = repo
        .save("x", article("A2"), Some(stage.clone().or_version()))
        .await
        .unwrap();

    assert!(v3.has_parent(&v1));
    assert!(v3.has_ref(&stage));
    assert!(!v3.has_ref(&Ref::latest()));

    let history = repo.history("x").await.unwrap();
    let at_v1 = history.iter().find(|v| v.version() == v1).unwrap();
    assert!(!at_v1.has_ref(&stage));

    let latest = repo.load("x", &VersionQuery::latest()).await.unwrap().unwrap();
    assert_eq!(latest.version(), v2);
    let staged = repo.load("x", &stage.into()).await.unwrap().unwrap();
    assert_eq!(staged.payload(), &article("A2"));
}

async fn archive_blocks_write(repo: &impl VersionedRepository<Article>) {
    repo.save("x", article("A"), None).await.unwrap();
    repo.archive("x", true).await.unwrap();

    let err = repo.save("x", article("B"), None).await.unwrap_err();
    assert!(matches!(err, StoreError::Archived(ref id) if id == "x"));
    assert_eq!(repo.history("x").await.unwrap().len(), 1);
    assert!(repo.is_archived("x").await.unwrap());

    repo.archive("x", false).await.unwrap();
    repo.save("x", article("B"), None).await.unwrap();
    assert_eq!(repo.history("x").await.unwrap().len(), 2);
}

async fn first_write_constraint(repo: &impl VersionedRepository<Article>) {
    let err = repo
        .save("fresh", article("A"), Some(Ref::new("draft").or_version()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = repo
        .save("fresh", article("A"), Some(Version::new().or_ref()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(repo.history("fresh").await.unwrap().is_empty());

    let first = repo
        .save("fresh", article("A"), Some(Ref::latest().or_version()))
        .await
        .unwrap();
    assert!(first.parents().is_empty());
    assert!(first.has_ref(&Ref::latest()));
}

async fn unknown_ref_lookup(repo: &impl VersionedRepository<Article>) {
    repo.save("x", article("A"), None).await.unwrap();
    let missing = repo
        .load("x", &Ref::new("nope").into())
        .await
        .unwrap();
    assert!(missing.is_none());
    assert!(!repo.is_archived("never-archived").await.unwrap());
}

async fn load_all_and_remove(repo: &impl VersionedRepository<Article>) {
    repo.save("a", article("A"), None).await.unwrap();
    repo.save("b", article("B"), None).await.unwrap();
    repo.save("c", article("C"), None).await.unwrap();

    let ids: Vec<String> = ["c", "missing", "a"].iter().map(|s| s.to_string()).collect();
    let loaded = repo.load_all(&ids, &VersionQuery::all()).await.unwrap();
    let titles: Vec<_> = loaded.iter().map(|v| v.payload().title.clone()).collect();
    assert_eq!(titles, vec!["C", "A"]);

    repo.archive("a", true).await.unwrap();
    repo.remove("a").await.unwrap();
    assert!(repo.history("a").await.unwrap().is_empty());
    assert!(!repo.is_archived("a").await.unwrap());

    repo.remove_all(&["b".to_string(), "c".to_string()]).await.unwrap();
    assert!(repo.load_all(&ids, &VersionQuery::all()).await.unwrap().is_empty());
}

async fn delete_ref_detaches(repo: &impl VersionedRepository<Article>) {
    let v1 = repo.save("x", article("A"), None).await.unwrap().version();
    let stage = Ref::new("stage");
    repo.update_ref("x", &stage, Some(v1.or_ref())).await.unwrap();
    repo.delete_ref("x", &stage).await.unwrap();

    assert!(repo.load("x", &stage.into()).await.unwrap().is_none());
    assert!(repo.load("x", &VersionQuery::all()).await.unwrap().is_some());
}

async fn update_ref_to_missing_destination(repo: &impl VersionedRepository<Article>) {
    let v1 = repo.save("x", article("A"), None).await.unwrap().version();
    let stage = Ref::new("stage");
    repo.update_ref("x", &stage, Some(v1.or_ref())).await.unwrap();

    let err = repo
        .update_ref("x", &stage, Some(Version::new().or_ref()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let err = repo
        .update_ref("x", &stage, Some(Ref::new("nope").or_version()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    // the holder keeps the ref
    let staged = repo.load("x", &stage.into()).await.unwrap().unwrap();
    assert_eq!(staged.version(), v1);
}

macro_rules! scenarios {
    ($($name:ident),* $(,)?) => {
        mod in_memory {
            use super::*;

            $(
                #[tokio::test]
                async fn $name() {
                    let store: InMemoryStore<Article> = InMemoryStore::new();
                    super::$name(&store).await;
                }
            )*
        }

        mod document {
            use super::*;

            $(
                #[tokio::test]
                async fn $name() {
                    let store = DocumentStore::new(MemoryExecutor::new(), "articles");
                    store.create_indexes(&["title"], &[]).await.unwrap();
                    super::$name(&store).await;
                }
            )*
        }
    };
}

scenarios!(
    linear_history,
    named_ref_fork,
    archive_blocks_write,
    first_write_constraint,
    unknown_ref_lookup,
    load_all_and_remove,
    delete_ref_detaches,
    update_ref_to_missing_destination,
);

#[tokio::test]
async fn in_memory_store_round_trip() {
    let store = InMemoryStore::new();
    let version = Version::new();
    store.store("x", article("A"), version).unwrap();
    assert_eq!(store.load("x", &version.into()), Some(article("A")));
}

#[tokio::test]
async fn document_store_unknown_ref_lookup() {
    let store = DocumentStore::new(MemoryExecutor::new(), "articles");
    store.save_one("x", article("A"), None).await.unwrap();

    let err = store
        .meta("x", Some(&Ref::new("nope").or_version()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(store.meta("y", None).await.unwrap_err().is_not_found());
}
