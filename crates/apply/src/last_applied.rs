//! Last-applied snapshots kept in an annotation on the object itself, so the
//! engine holds no state between reconciles.

use std::collections::BTreeMap;

use kube::core::DynamicObject;
use serde_json::{Map, Value as Json};
use tether_core::{ApplyError, Result, Shape};
use tracing::debug;

pub const DEFAULT_LAST_APPLIED_KEY: &str = "tether.dev/last-applied-configuration";

/// Anything that carries string annotations.
pub trait Annotated {
    fn annotation(&self, key: &str) -> Result<Option<&str>>;
    fn set_annotation(&mut self, key: &str, value: String) -> Result<()>;
    /// `apiVersion:kind:namespace:name`, for error context.
    fn describe(&self) -> String;
}

fn malformed(object: String, reason: &str) -> ApplyError {
    ApplyError::MalformedMetadata { object, reason: reason.to_string() }
}

fn str_at<'a>(v: &'a Json, pointer: &str) -> &'a str {
    v.pointer(pointer).and_then(Json::as_str).unwrap_or("")
}

fn mapping_entry<'a>(
    parent: &'a mut Map<String, Json>,
    key: &str,
    object: &str,
) -> Result<&'a mut Map<String, Json>> {
    let slot = parent.entry(key).or_insert(Json::Null);
    if slot.is_null() {
        *slot = Json::Object(Map::new());
    }
    slot.as_object_mut()
        .ok_or_else(|| malformed(object.to_string(), &format!("{key} is not a mapping")))
}

impl Annotated for Json {
    fn annotation(&self, key: &str) -> Result<Option<&str>> {
        let found = self
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key));
        match found {
            None | Some(Json::Null) => Ok(None),
            Some(Json::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(malformed(self.describe(), &format!("annotation {key:?} is not a string"))),
        }
    }

    fn set_annotation(&mut self, key: &str, value: String) -> Result<()> {
        let object = self.describe();
        let root = self
            .as_object_mut()
            .ok_or_else(|| malformed(object.clone(), "object is not a mapping"))?;
        let meta = mapping_entry(root, "metadata", &object)?;
        let annotations = mapping_entry(meta, "annotations", &object)?;
        annotations.insert(key.to_string(), Json::String(value));
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            str_at(self, "/apiVersion"),
            str_at(self, "/kind"),
            str_at(self, "/metadata/namespace"),
            str_at(self, "/metadata/name"),
        )
    }
}

impl Annotated for DynamicObject {
    fn annotation(&self, key: &str) -> Result<Option<&str>> {
        Ok(self.metadata.annotations.as_ref().and_then(|a| a.get(key)).map(String::as_str))
    }

    fn set_annotation(&mut self, key: &str, value: String) -> Result<()> {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn describe(&self) -> String {
        let (api_version, kind) = self
            .types
            .as_ref()
            .map(|t| (t.api_version.as_str(), t.kind.as_str()))
            .unwrap_or(("", ""));
        format!(
            "{}:{}:{}:{}",
            api_version,
            kind,
            self.metadata.namespace.as_deref().unwrap_or(""),
            self.metadata.name.as_deref().unwrap_or(""),
        )
    }
}

/// Reads and writes last-applied snapshots under one annotation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastAppliedStore {
    key: String,
}

impl Default for LastAppliedStore {
    fn default() -> Self {
        Self::new(DEFAULT_LAST_APPLIED_KEY)
    }
}

impl LastAppliedStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stores `last_applied` as compact JSON on `obj`. `null` and `{}` are
    /// skipped; anything but an object is refused since `get` could not read it.
    pub fn set<O: Annotated + ?Sized>(&self, obj: &mut O, last_applied: &Json) -> Result<()> {
        match last_applied {
            Json::Null => return Ok(()),
            Json::Object(m) if m.is_empty() => return Ok(()),
            Json::Object(_) => {}
            other => {
                return Err(ApplyError::SnapshotNotMapping {
                    object: obj.describe(),
                    key: self.key.clone(),
                    found: Shape::of(other),
                })
            }
        }
        let encoded = serde_json::to_string(last_applied).map_err(|source| ApplyError::EncodeLastApplied {
            object: obj.describe(),
            key: self.key.clone(),
            source,
        })?;
        obj.set_annotation(&self.key, encoded)?;
        debug!(object = %obj.describe(), key = %self.key, "stored last applied state");
        Ok(())
    }

    /// Returns the recorded snapshot, `None` when nothing was applied yet.
    pub fn get<O: Annotated + ?Sized>(&self, obj: &O) -> Result<Option<Json>> {
        let raw = match obj.annotation(&self.key)? {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };
        let snapshot: Map<String, Json> = serde_json::from_str(raw).map_err(|source| ApplyError::DecodeLastApplied {
            object: obj.describe(),
            key: self.key.clone(),
            source,
        })?;
        Ok(Some(Json::Object(snapshot)))
    }

    /// Drops the snapshot annotation from `doc`, otherwise every snapshot
    /// would embed the previous one.
    pub fn sanitize(&self, doc: &mut Json) {
        let annotations = doc
            .get_mut("metadata")
            .and_then(|m| m.get_mut("annotations"))
            .and_then(Json::as_object_mut);
        if let Some(annotations) = annotations {
            annotations.shift_remove(&self.key);
        }
    }

    /// Copy of `desired` carrying its own sanitized snapshot under the key.
    pub fn stamp(&self, desired: &Json) -> Result<Json> {
        let mut snapshot = desired.clone();
        self.sanitize(&mut snapshot);
        let mut stamped = snapshot.clone();
        self.set(&mut stamped, &snapshot)?;
        Ok(stamped)
    }

    /// One reconcile step: merge `desired` into `observed` against the
    /// snapshot recorded on `observed`, recording the new snapshot.
    pub fn apply(&self, observed: &Json, desired: &Json) -> Result<Json> {
        let last_applied = self.get(observed)?;
        let stamped = self.stamp(desired)?;
        crate::apply_merge(observed, last_applied.as_ref(), &stamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ApiResource, GroupVersionKind};
    use serde_json::json;

    fn config_map() -> Json {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cm", "namespace": "ns" },
            "data": { "k": "v" }
        })
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = LastAppliedStore::default();
        let mut obj = config_map();
        let snapshot = json!({ "data": { "k": "v", "n": 1 }, "list": [1, "two", null] });
        store.set(&mut obj, &snapshot).unwrap();

        let raw = obj["metadata"]["annotations"][DEFAULT_LAST_APPLIED_KEY].as_str().unwrap();
        assert!(!raw.contains('\n'));
        assert_eq!(store.get(&obj).unwrap(), Some(snapshot));
    }

    #[test]
    fn empty_snapshot_is_not_stored() {
        let store = LastAppliedStore::default();
        let mut obj = config_map();
        store.set(&mut obj, &json!({})).unwrap();
        store.set(&mut obj, &Json::Null).unwrap();
        assert!(obj["metadata"].get("annotations").is_none());
    }

    #[test]
    fn set_refuses_non_object_snapshots() {
        let store = LastAppliedStore::default();
        let mut obj = json!({ "metadata": {} });
        for snapshot in [json!([{ "name": "a" }]), json!([]), json!("x"), json!(3)] {
            let err = store.set(&mut obj, &snapshot).unwrap_err();
            assert!(matches!(err, ApplyError::SnapshotNotMapping { .. }), "{err}");
            assert!(err.is_serialization());
        }
        assert_eq!(obj, json!({ "metadata": {} }));
        assert_eq!(store.get(&obj).unwrap(), None);
    }

    #[test]
    fn missing_or_empty_annotation_is_no_state() {
        let store = LastAppliedStore::new("example.com/last");
        assert_eq!(store.get(&config_map()).unwrap(), None);

        let mut obj = config_map();
        obj["metadata"]["annotations"] = json!({ "example.com/last": "" });
        assert_eq!(store.get(&obj).unwrap(), None);
    }

    #[test]
    fn undecodable_annotation_fails() {
        let store = LastAppliedStore::default();
        let mut obj = config_map();
        obj["metadata"]["annotations"] = json!({ DEFAULT_LAST_APPLIED_KEY: "{not json" });
        let err = store.get(&obj).unwrap_err();
        assert!(err.is_serialization());
        assert!(err.to_string().starts_with("v1:ConfigMap:ns:cm:"), "{err}");

        obj["metadata"]["annotations"] = json!({ DEFAULT_LAST_APPLIED_KEY: "[1, 2]" });
        assert!(store.get(&obj).unwrap_err().is_serialization());
    }

    #[test]
    fn set_creates_metadata_when_absent() {
        let store = LastAppliedStore::new("k");
        let mut obj = json!({ "kind": "Thing" });
        store.set(&mut obj, &json!({ "a": 1 })).unwrap();
        assert_eq!(obj["metadata"]["annotations"]["k"], json!(r#"{"a":1}"#));

        let mut obj = json!({ "metadata": { "annotations": null } });
        store.set(&mut obj, &json!({ "a": 1 })).unwrap();
        assert_eq!(store.get(&obj).unwrap(), Some(json!({ "a": 1 })));
    }

    #[test]
    fn set_rejects_malformed_metadata() {
        let store = LastAppliedStore::default();
        let mut obj = json!({ "metadata": { "annotations": ["x"] } });
        let err = store.set(&mut obj, &json!({ "a": 1 })).unwrap_err();
        assert!(matches!(err, ApplyError::MalformedMetadata { .. }));

        let mut scalar = json!("nope");
        assert!(store.set(&mut scalar, &json!({ "a": 1 })).is_err());
    }

    #[test]
    fn sanitize_removes_only_the_marker() {
        let store = LastAppliedStore::default();
        let mut doc = json!({
            "metadata": { "annotations": { DEFAULT_LAST_APPLIED_KEY: "{}", "other": "x" } }
        });
        store.sanitize(&mut doc);
        assert_eq!(doc, json!({ "metadata": { "annotations": { "other": "x" } } }));

        let mut bare = json!({ "spec": {} });
        store.sanitize(&mut bare);
        assert_eq!(bare, json!({ "spec": {} }));
    }

    #[test]
    fn stamp_embeds_sanitized_snapshot() {
        let store = LastAppliedStore::default();
        let desired = json!({
            "metadata": { "name": "cm", "annotations": { DEFAULT_LAST_APPLIED_KEY: "{\"stale\":true}" } },
            "data": { "k": "v" }
        });
        let stamped = store.stamp(&desired).unwrap();
        let snapshot = store.get(&stamped).unwrap().unwrap();
        assert_eq!(snapshot, json!({ "metadata": { "name": "cm", "annotations": {} }, "data": { "k": "v" } }));
    }

    #[test]
    fn dynamic_object_round_trips() {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("example.com", "v1", "Widget"));
        let mut obj = DynamicObject::new("w", &ar).within("team-a");
        let store = LastAppliedStore::default();
        assert_eq!(store.get(&obj).unwrap(), None);

        let snapshot = json!({ "spec": { "size": 3 } });
        store.set(&mut obj, &snapshot).unwrap();
        assert_eq!(store.get(&obj).unwrap(), Some(snapshot));
        assert_eq!(obj.describe(), "example.com/v1:Widget:team-a:w");
    }
}
