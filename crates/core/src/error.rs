use std::path::PathBuf;

use crate::overrides::FieldPosition;

/// Errors raised by the graph model, override engine, media codec and
/// workflow store.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Malformed workflow graph: {0}")]
    MalformedGraph(String),

    #[error(
        "Field '{field}' maps to position {position} on node {node_type}:{node_id}, \
         which only has {len} widget values"
    )]
    FieldIndexOutOfRange {
        node_type: String,
        node_id: String,
        field: String,
        position: FieldPosition,
        len: usize,
    },

    #[error("Invalid base64 payload for media item '{name}': {reason}")]
    InvalidEncoding { name: String, reason: String },

    #[error("Invalid media item name: '{0}'")]
    InvalidMediaName(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Wrap an [`std::io::Error`] together with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
