//! Recursive three-way merge over schema-less documents.
//!
//! Every helper takes the destination by value and hands back the merged
//! replacement, so the only copy is the one made by [`crate::apply_merge`].

use serde_json::{Map, Value as Json};
use tether_core::prelude::*;
use tracing::{debug, trace};

use crate::listmap::{detect_list_map_key, item_key, make_list_map};

/// Finds the diff from `last_applied` to `desired` and applies it to
/// `destination`, returning the replacement value.
///
/// Callers only invoke this for fields present in `desired`.
pub(crate) fn merge(
    path: &FieldPath,
    destination: Json,
    last_applied: Option<&Json>,
    desired: &Json,
) -> Result<Json> {
    trace!(path = %path, "merge field");

    match destination {
        Json::Object(dest) => {
            let last = expect_object(Side::LastApplied, path, last_applied)?;
            let des = expect_object(Side::Desired, path, Some(desired))?;
            merge_object(path, dest, last, des).map(Json::Object)
        }
        Json::Array(dest) => {
            let last = expect_array(Side::LastApplied, path, last_applied)?;
            let des = expect_array(Side::Desired, path, Some(desired))?;
            merge_array(path, dest, last, des, desired)
        }
        // Scalar or null destination: desired wins outright.
        _ => Ok(desired.clone()),
    }
}

fn expect_object<'a>(
    side: Side,
    path: &FieldPath,
    v: Option<&'a Json>,
) -> Result<Option<&'a Map<String, Json>>> {
    match v {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Object(m)) => Ok(Some(m)),
        Some(other) => Err(mismatch(side, path, Shape::Object, other)),
    }
}

fn expect_array<'a>(side: Side, path: &FieldPath, v: Option<&'a Json>) -> Result<&'a [Json]> {
    match v {
        None | Some(Json::Null) => Ok(&[]),
        Some(Json::Array(items)) => Ok(items),
        Some(other) => Err(mismatch(side, path, Shape::Array, other)),
    }
}

fn mismatch(side: Side, path: &FieldPath, expected: Shape, found: &Json) -> ApplyError {
    ApplyError::ShapeMismatch { side, path: path.clone(), expected, found: Shape::of(found) }
}

/// Removes what `desired` dropped since `last_applied`, then merges every
/// field `desired` carries. Fields neither of them mention stay untouched.
pub(crate) fn merge_object(
    path: &FieldPath,
    mut destination: Map<String, Json>,
    last_applied: Option<&Map<String, Json>>,
    desired: Option<&Map<String, Json>>,
) -> Result<Map<String, Json>> {
    trace!(path = %path, "merge object");

    if let Some(last) = last_applied {
        for key in last.keys() {
            let still_desired = desired.is_some_and(|d| d.contains_key(key));
            if !still_desired && destination.shift_remove(key).is_some() {
                debug!(path = %path, key = %key, "removed field no longer desired");
            }
        }
    }

    let Some(desired) = desired else {
        return Ok(destination);
    };
    for (key, des_val) in desired {
        // Take the current value out in place so updated keys keep their position.
        let current = destination.get_mut(key).map(Json::take).unwrap_or(Json::Null);
        let last_val = last_applied.and_then(|l| l.get(key));
        let merged = merge(&path.child(key), current, last_val, des_val)?;
        destination.insert(key.clone(), merged);
    }

    Ok(destination)
}

fn merge_array(
    path: &FieldPath,
    destination: Vec<Json>,
    last_applied: &[Json],
    desired_items: &[Json],
    desired: &Json,
) -> Result<Json> {
    trace!(path = %path, "merge array");

    if let Some(merge_key) = detect_list_map_key(&[&destination[..], last_applied, desired_items]) {
        return merge_list_map(path, merge_key, destination, last_applied, desired_items);
    }

    // Plain array: replace wholesale.
    Ok(desired.clone())
}

/// Merges lists of objects as if they were maps keyed by `merge_key`.
///
/// Output order: surviving destination elements in their original order,
/// then new elements in desired order. Each key appears once.
fn merge_list_map(
    path: &FieldPath,
    merge_key: &str,
    destination: Vec<Json>,
    last_applied: &[Json],
    desired: &[Json],
) -> Result<Json> {
    trace!(path = %path, merge_key, "merge list map");

    let dest_keys: Vec<String> = destination.iter().map(|item| item_key(merge_key, item)).collect();
    let dest_map = make_list_map(merge_key, destination);
    let last_map = make_list_map(merge_key, last_applied.iter().cloned());
    let des_map = make_list_map(merge_key, desired.iter().cloned());

    let mut merged = merge_object(path, dest_map, Some(&last_map), Some(&des_map))?;

    let mut out = Vec::with_capacity(merged.len());
    let desired_keys = desired.iter().map(|item| item_key(merge_key, item));
    for key in dest_keys.into_iter().chain(desired_keys) {
        if let Some(item) = merged.shift_remove(&key) {
            out.push(item);
        }
    }

    Ok(Json::Array(out))
}
