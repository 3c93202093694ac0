//! Tether apply: a client-side substitute for `kubectl apply` that works on
//! schema-less documents.
//!
//! The patch is computed and applied locally and a full object comes back,
//! with everything the caller did not manage (resourceVersion included) left
//! intact. Without type information the merge has to guess, so lists of
//! objects sharing a conventional identity field (see [`KNOWN_MERGE_KEYS`])
//! are merged element-wise and every other list is replaced.

#![forbid(unsafe_code)]

use metrics::{counter, histogram};
use serde_json::Value as Json;
use tether_core::Result;
use tracing::debug;

pub mod last_applied;
pub mod listmap;
mod merge;
pub mod summary;

pub use last_applied::{Annotated, LastAppliedStore, DEFAULT_LAST_APPLIED_KEY};
pub use listmap::{detect_list_map_key, FieldNames, KNOWN_MERGE_KEYS};
pub use summary::{diff_summary, DiffSummary};
pub use tether_core::{ApplyError, FieldPath, Shape, Side};

/// Folds the change from `last_applied` to `desired` into a copy of `observed`.
///
/// `last_applied` is the diff baseline: a field it holds that `desired` no
/// longer does is removed even if someone changed it since. Fields neither of
/// them mention are kept as observed. Inputs are never modified, and on error
/// nothing is returned rather than a half-merged object.
pub fn apply_merge(observed: &Json, last_applied: Option<&Json>, desired: &Json) -> Result<Json> {
    let started = std::time::Instant::now();
    counter!("apply_merge_total", 1u64);

    let destination = observed.clone();
    match merge::merge(&FieldPath::root(), destination, last_applied, desired) {
        Ok(merged) => {
            histogram!("apply_merge_ms", started.elapsed().as_secs_f64() * 1000.0);
            Ok(merged)
        }
        Err(e) => {
            counter!("apply_merge_err", 1u64);
            debug!(error = %e, "can't merge desired changes");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inputs_are_left_untouched() {
        let observed = json!({ "a": 1, "b": [{ "name": "x" }] });
        let last = json!({ "a": 1 });
        let desired = json!({ "b": [{ "name": "y" }] });
        let (o, l, d) = (observed.clone(), last.clone(), desired.clone());

        let merged = apply_merge(&observed, Some(&last), &desired).unwrap();
        assert_eq!(merged, json!({ "b": [{ "name": "x" }, { "name": "y" }] }));
        assert_eq!((observed, last, desired), (o, l, d));
    }

    #[test]
    fn missing_last_applied_only_adds() {
        let observed = json!({ "metadata": { "resourceVersion": "7" }, "spec": { "a": 1 } });
        let desired = json!({ "spec": { "b": 2 } });
        let merged = apply_merge(&observed, None, &desired).unwrap();
        assert_eq!(merged, json!({ "metadata": { "resourceVersion": "7" }, "spec": { "a": 1, "b": 2 } }));
        assert_eq!(apply_merge(&observed, Some(&Json::Null), &desired).unwrap(), merged);
    }

    #[test]
    fn error_surfaces_instead_of_partial_result() {
        let observed = json!({ "a": { "x": 1 }, "b": { "y": 1 } });
        let desired = json!({ "a": { "x": 2 }, "b": 3 });
        let err = apply_merge(&observed, None, &desired).unwrap_err();
        assert_eq!(err.path().map(FieldPath::as_str), Some("[b]"));
    }
}
