#![forbid(unsafe_code)]

use crate::config::ConfigError;
use arbor_core::{ReplicaError, ServerId};
use arbor_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Replica(#[from] ReplicaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("wire: {0}")]
    Wire(#[from] serde_json::Error),
    /// The authority failed the request; the message is its rendering.
    #[error("authority: {0}")]
    Remote(String),
    #[error("root {0} no longer exists at the authority")]
    RootGone(ServerId),
    #[error("replica root has never been pushed")]
    NotPublished,
    #[error("expected a {expected} response from the authority, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}
