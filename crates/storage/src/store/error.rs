#![forbid(unsafe_code)]

use arbor_core::{MergeError, ServerId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("unknown id {0}")]
    UnknownId(ServerId),
    #[error("corrupt row {id}: {reason}")]
    CorruptRow { id: i64, reason: &'static str },
    #[error("hierarchy mismatch (expected={expected}, stored={stored})")]
    HierarchyMismatch { expected: String, stored: String },
}
