use std::collections::BTreeMap;

use bson::{Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

/// One record per live API object, per kind (spec §3 `StoredResource`).
/// Kind-specific projected fields live in `fields` rather than as typed
/// struct members — the registry is generic over kinds, so the store
/// record has to be too; only the projector function knows what belongs
/// in `fields` for a given kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    pub uid: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "resourceVersion")]
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    #[serde(rename = "createdAt")]
    pub created_at: BsonDateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: BsonDateTime,
    /// Kind-specific projected fields (spec §3).
    #[serde(default)]
    pub fields: Document,
    /// Opaque verbatim copy of the API object (spec §9 "Schema `raw` field").
    /// The core never introspects this; it exists for pass-through use by
    /// the gateway (manifest views, diffing, etc).
    pub raw: Document,
}

impl StoredResource {
    /// The identity value this record should be upserted/deleted by, per
    /// the descriptor's `identityField` (spec §3, §4.1).
    pub fn identity(&self, field: crate::registry::IdentityField) -> Option<&str> {
        match field {
            crate::registry::IdentityField::Uid => self.uid.as_deref(),
            crate::registry::IdentityField::Name => self.name.as_deref(),
        }
    }

    /// A record is valid for storage only if it has both a uid and a name
    /// (spec §3 invariant: "records with null uid or null name must never
    /// exist").
    pub fn is_valid(&self) -> bool {
        self.uid.as_deref().is_some_and(|s| !s.is_empty())
            && self.name.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Converts a raw Kubernetes object (already deserialized into a
/// `serde_json::Value`) into the opaque verbatim `raw` copy stored
/// alongside the projection.
pub fn to_raw_document(value: &serde_json::Value) -> Document {
    match bson::to_document(value) {
        Ok(doc) => doc,
        Err(_) => {
            let mut doc = Document::new();
            doc.insert("_unrepresentable", Bson::String(value.to_string()));
            doc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::IdentityField;

    fn sample(uid: Option<&str>, name: Option<&str>) -> StoredResource {
        StoredResource {
            uid: uid.map(str::to_string),
            name: name.map(str::to_string),
            namespace: Some("default".into()),
            kind: "Pod".into(),
            api_version: "v1".into(),
            resource_version: Some("1".into()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            created_at: BsonDateTime::now(),
            updated_at: BsonDateTime::now(),
            fields: Document::new(),
            raw: Document::new(),
        }
    }

    #[test]
    fn invalid_without_uid_or_name() {
        assert!(!sample(None, Some("a")).is_valid());
        assert!(!sample(Some("u"), None).is_valid());
        assert!(sample(Some("u"), Some("a")).is_valid());
    }

    #[test]
    fn identity_selects_configured_field() {
        let r = sample(Some("u-1"), Some("n-1"));
        assert_eq!(r.identity(IdentityField::Uid), Some("u-1"));
        assert_eq!(r.identity(IdentityField::Name), Some("n-1"));
    }
}
