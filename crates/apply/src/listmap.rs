//! Guessing whether a list is a k8s-style "list map" without a schema.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value as Json};

/// Field names we will guess as merge keys.
///
/// The order determines precedence if several of them are shared by every
/// element, the first entry wins.
///
/// Status is never merged this way because the controller owns all of it, so
/// things like `status.conditions` are not considered here.
pub const KNOWN_MERGE_KEYS: [&str; 5] = ["containerPort", "port", "name", "uid", "ip"];

/// Element of a list that may be an object with named fields.
pub trait FieldNames {
    /// Names of the fields, or `None` when the element is not an object.
    fn field_names(&self) -> Option<BTreeSet<&str>>;
}

impl FieldNames for Json {
    fn field_names(&self) -> Option<BTreeSet<&str>> {
        self.as_object().map(|o| o.keys().map(String::as_str).collect())
    }
}

impl<V> FieldNames for BTreeMap<String, V> {
    fn field_names(&self) -> Option<BTreeSet<&str>> {
        Some(self.keys().map(String::as_str).collect())
    }
}

/// Returns the merge key shared by every element of every list, if any.
///
/// Pass all known values of a field (destination, last applied, desired).
/// A single non-object element rules the lists out. Empty lists add no
/// constraint; if no list has any element there is nothing to key on.
pub fn detect_list_map_key<T: FieldNames>(lists: &[&[T]]) -> Option<&'static str> {
    let mut common: Option<BTreeSet<&str>> = None;

    for item in lists.iter().flat_map(|list| list.iter()) {
        let names = item.field_names()?;
        match common.as_mut() {
            None => common = Some(names),
            Some(keys) => keys.retain(|k| names.contains(k)),
        }
    }

    let common = common?;
    KNOWN_MERGE_KEYS.iter().copied().find(|k| common.contains(k))
}

/// Renders a merge key value as a map key. Strings are taken verbatim, anything
/// else as compact JSON (`80`, `true`, `null`). Integral floats render like
/// integers so `80` and `80.0` name the same element.
pub(crate) fn string_merge_key(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

pub(crate) fn item_key(merge_key: &str, item: &Json) -> String {
    string_merge_key(item.get(merge_key).unwrap_or(&Json::Null))
}

/// Projects a list of objects into a map keyed by `merge_key`.
/// Elements sharing a key collapse: the later one wins.
pub(crate) fn make_list_map<I>(merge_key: &str, items: I) -> Map<String, Json>
where
    I: IntoIterator<Item = Json>,
{
    let mut out = Map::new();
    for item in items {
        out.insert(item_key(merge_key, &item), item);
    }
    out
}
