use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::{StoreError, Version};

/// Compute the content digest of a version.
///
/// Blake3-256 over the canonical JSON of `{parents, payload, version}`,
/// hex encoded. Canonical means object keys sorted at every depth, so the
/// digest survives backends that reorder document fields.
pub fn compute_digest(
    version: &Version,
    parents: &BTreeSet<Version>,
    payload: &Value,
) -> Result<String, StoreError> {
    let mut subject = Map::new();
    subject.insert(
        "parents".to_string(),
        Value::Array(parents.iter().map(|p| Value::String(p.to_string())).collect()),
    );
    subject.insert("payload".to_string(), canonicalize(payload));
    subject.insert("version".to_string(), Value::String(version.to_string()));

    let bytes = serde_json::to_vec(&Value::Object(subject))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Verify `expected` against the digest of the given parts.
pub fn verify_digest(
    version: &Version,
    parents: &BTreeSet<Version>,
    payload: &Value,
    expected: &str,
) -> Result<(), StoreError> {
    let actual = compute_digest(version, parents, payload)?;
    if actual != expected {
        return Err(StoreError::InvalidDigest(format!(
            "version {}: expected {}, computed {}",
            version, expected, actual
        )));
    }
    Ok(())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_order_does_not_matter() {
        let version = Version::new();
        let parents = BTreeSet::new();
        let a = compute_digest(&version, &parents, &json!({"a": 1, "b": {"x": 1, "y": 2}})).unwrap();
        let b = compute_digest(&version, &parents, &json!({"b": {"y": 2, "x": 1}, "a": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let version = Version::new();
        let parents = BTreeSet::from([Version::new()]);
        let digest = compute_digest(&version, &parents, &json!({"title": "a"})).unwrap();

        verify_digest(&version, &parents, &json!({"title": "a"}), &digest).unwrap();
        let err = verify_digest(&version, &parents, &json!({"title": "b"}), &digest).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDigest(_)));
    }
}
