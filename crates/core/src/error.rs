use thiserror::Error;

use crate::{FieldPath, Shape, Side};

pub type Result<T, E = ApplyError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ApplyError {
    /// A last-applied or desired node does not have the shape the destination requires.
    #[error("{side}{path}: expecting {expected}, got {found}")]
    ShapeMismatch {
        side: Side,
        path: FieldPath,
        expected: Shape,
        found: Shape,
    },

    #[error("{object}: failed to encode last applied state for annotation {key:?}")]
    EncodeLastApplied {
        object: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{object}: last applied state for annotation {key:?} must be an object, got {found}")]
    SnapshotNotMapping { object: String, key: String, found: Shape },

    #[error("{object}: failed to decode last applied state from annotation {key:?}")]
    DecodeLastApplied {
        object: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{object}: cannot carry annotations: {reason}")]
    MalformedMetadata { object: String, reason: String },
}

impl ApplyError {
    /// True for failures encoding or decoding a last-applied snapshot.
    pub fn is_serialization(&self) -> bool {
        matches!(
            self,
            ApplyError::EncodeLastApplied { .. }
                | ApplyError::SnapshotNotMapping { .. }
                | ApplyError::DecodeLastApplied { .. }
        )
    }

    pub fn path(&self) -> Option<&FieldPath> {
        match self {
            ApplyError::ShapeMismatch { path, .. } => Some(path),
            _ => None,
        }
    }
}
