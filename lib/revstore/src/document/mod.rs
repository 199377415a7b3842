//! Document-database backed storage.
//!
//! Each version of a logical id is one document: the caller's payload fields
//! inline, plus the reserved `__`-prefixed fields listed in [`fields`]. A
//! second document per id, marked with `__m`, carries the archival flag.

mod memory;
mod query;
mod store;

pub use memory::MemoryExecutor;
pub use query::{
    Delete, Document, DocumentExecutor, Filter, Index, Order, Page, Pagination, Query,
    TransactionControl, Transactional, Update, UpdateOp, Upsert, Value, is_valid_field,
};
pub use store::{DocumentStore, Record, selector_filters};

use std::collections::BTreeSet;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{
    Ref, StorageDatetime, StoreError, Version, VersionedValue, compute_digest, verify_digest,
};

/// Reserved field names.
pub mod fields {
    /// Logical id, stable across versions.
    pub const ID: &str = "__id";
    /// Version id of this row.
    pub const VERSION: &str = "__v";
    /// Parent version ids.
    pub const PARENTS: &str = "__w";
    /// Refs currently held by this version.
    pub const REFS: &str = "__r";
    /// Commit timestamp.
    pub const TIMESTAMP: &str = "__t";
    /// Content digest.
    pub const DIGEST: &str = "__d";
    /// Marks the metadata row.
    pub const META: &str = "__m";
    /// Metadata row: archived.
    pub const ARCHIVED: &str = "__a";
    /// Metadata row: created.
    pub const CREATED: &str = "__c";
    /// Metadata row: last updated.
    pub const UPDATED: &str = "__u";

    pub const RESERVED_PREFIX: &str = "__";
}

/// Encode one version of `id` as a document.
///
/// The payload has to serialize to a JSON object whose keys stay clear of the
/// reserved prefix.
pub fn encode_version<T: Serialize>(
    id: &str,
    value: &VersionedValue<T>,
) -> Result<Document, StoreError> {
    let parents = value.parents();
    let payload = serde_json::to_value(value.payload())?;
    let digest = compute_digest(&value.version(), &parents, &payload)?;

    let mut document = match payload {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(StoreError::InvalidPayload(format!(
                "expected an object, got {}",
                json_kind(&other)
            )));
        }
    };

    if let Some(key) = document.keys().find(|k| k.starts_with(fields::RESERVED_PREFIX)) {
        return Err(StoreError::InvalidPayload(format!(
            "field '{}' uses the reserved prefix",
            key
        )));
    }

    document.insert(fields::ID.to_string(), id.into());
    document.insert(fields::VERSION.to_string(), value.version().to_string().into());
    document.insert(
        fields::PARENTS.to_string(),
        parents.iter().map(|p| p.to_string()).collect::<Vec<_>>().into(),
    );
    document.insert(
        fields::REFS.to_string(),
        value
            .refs()
            .iter()
            .map(|r| r.as_str().to_string())
            .collect::<Vec<_>>()
            .into(),
    );
    document.insert(fields::TIMESTAMP.to_string(), value.timestamp().to_string().into());
    document.insert(fields::DIGEST.to_string(), digest.into());

    Ok(document)
}

/// Decode a version document back into its logical id and value.
///
/// The digest is checked when the document carries one.
pub fn decode_version<T: DeserializeOwned>(
    mut document: Document,
) -> Result<(String, VersionedValue<T>), StoreError> {
    let (id, version, parents, refs, timestamp) = take_identity(&mut document)?;
    let digest = document
        .remove(fields::DIGEST)
        .and_then(|d| d.as_str().map(str::to_string));
    document.retain(|key, _| !key.starts_with(fields::RESERVED_PREFIX));

    let payload = serde_json::Value::Object(document);
    if let Some(expected) = digest {
        verify_digest(&version, &parents, &payload, &expected)?;
    }

    let payload: T = serde_json::from_value(payload)?;
    let value = VersionedValue::new(version, parents, refs, timestamp, payload)?;
    Ok((id, value))
}

/// Decode only the identity of a version document.
pub fn decode_meta(mut document: Document) -> Result<(String, VersionedValue<()>), StoreError> {
    let (id, version, parents, refs, timestamp) = take_identity(&mut document)?;
    let value = VersionedValue::new(version, parents, refs, timestamp, ())?;
    Ok((id, value))
}

type Identity = (String, Version, BTreeSet<Version>, BTreeSet<Ref>, StorageDatetime);

fn take_identity(document: &mut Document) -> Result<Identity, StoreError> {
    let id = take_string(document, fields::ID)?;
    let version: Version = take_string(document, fields::VERSION)?.parse()?;

    let parents = take_strings(document, fields::PARENTS)?
        .iter()
        .map(|p| p.parse())
        .collect::<Result<BTreeSet<Version>, _>>()?;
    let refs = take_strings(document, fields::REFS)?
        .into_iter()
        .map(Ref::new)
        .collect();

    let timestamp = match document.remove(fields::TIMESTAMP) {
        Some(serde_json::Value::Null) | None => version.timestamp().unwrap_or_default(),
        Some(ts) => serde_json::from_value(ts)?,
    };

    Ok((id, version, parents, refs, timestamp))
}

fn take_string(document: &mut Document, field: &str) -> Result<String, StoreError> {
    match document.remove(field) {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(other) => Err(StoreError::Internal(format!(
            "field '{}' holds {}, expected a string",
            field,
            json_kind(&other)
        ))),
        None => Err(StoreError::Internal(format!("missing field '{}'", field))),
    }
}

fn take_strings(document: &mut Document, field: &str) -> Result<Vec<String>, StoreError> {
    match document.remove(field) {
        Some(value @ serde_json::Value::Array(_)) => Ok(serde_json::from_value(value)?),
        Some(serde_json::Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(StoreError::Internal(format!(
            "field '{}' holds {}, expected an array",
            field,
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// The per-id archival record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    pub id: String,
    pub archived: bool,
    pub created: Option<StorageDatetime>,
    pub updated: Option<StorageDatetime>,
}

impl MetadataRow {
    pub fn from_document(mut document: Document) -> Result<Self, StoreError> {
        let id = take_string(&mut document, fields::ID)?;
        let archived = document
            .get(fields::ARCHIVED)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let created = match document.remove(fields::CREATED) {
            Some(serde_json::Value::Null) | None => None,
            Some(ts) => Some(serde_json::from_value(ts)?),
        };
        let updated = match document.remove(fields::UPDATED) {
            Some(serde_json::Value::Null) | None => None,
            Some(ts) => Some(serde_json::from_value(ts)?),
        };
        Ok(Self {
            id,
            archived,
            created,
            updated,
        })
    }
}
