#![forbid(unsafe_code)]

use crate::disposition::{Disposition, DispositionError};
use crate::hierarchy::Level;
use crate::ids::{ClientId, ServerId};
use crate::order::OrderError;
use crate::timestamp::Timestamp;

/// A broken structural invariant of the replica or a merge sequence that a
/// correct engine never produces. Always a defect, never user-correctable.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("server id of {client_id} cannot change from {was} to {now}")]
    ServerIdChanged {
        client_id: ClientId,
        was: ServerId,
        now: ServerId,
    },
    #[error("{client_id}: deleted_at {deleted_at} precedes created_at {created_at}")]
    TombstoneBeforeCreation {
        client_id: ClientId,
        created_at: Timestamp,
        deleted_at: Timestamp,
    },
    #[error("children of {parent} break the order spacing: {source}")]
    OrderSpacing {
        parent: ClientId,
        #[source]
        source: OrderError,
    },
    #[error("{parent} (last_modified {parent_at}) is older than unsynced child {child} ({child_at})")]
    StaleAncestor {
        parent: ClientId,
        parent_at: Timestamp,
        child: ClientId,
        child_at: Timestamp,
    },
    #[error("{client_id} is newer than the authority ({local} > {server}) yet {disposition}")]
    NewerButUnmodified {
        client_id: ClientId,
        local: Timestamp,
        server: Timestamp,
        disposition: Disposition,
    },
}

/// Rejections for subtrees that do not fit the deployment's hierarchy, raised
/// by either merge engine before it touches any state.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
    #[error("level {found} cannot be a child of level {parent}")]
    LevelMismatch { parent: Level, found: Level },
    #[error("unknown level {0}")]
    UnknownLevel(Level),
    #[error("parent {0} does not exist")]
    UnknownParent(ServerId),
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("no node at path {0}")]
    PathNotFound(String),
    #[error("level {0} is the leaf level and has no children")]
    LeafLevel(String),
    #[error("no pending draft at {0}")]
    NoDraft(String),
    #[error("reorder sequence does not match the children of {0}")]
    BadSequence(String),
    #[error("children of {0} are not orderable")]
    NotOrderable(String),
    #[error("authority sent a node without a server id")]
    MissingServerId,
    #[error("replica holds root {local}, authority answered for {server}")]
    RootMismatch { local: ServerId, server: ServerId },
    #[error("authority sent level {found} for {client_id}, replica has {expected}")]
    LevelMismatch {
        client_id: ClientId,
        expected: Level,
        found: Level,
    },
    #[error("authority sent a subtree that does not fit the hierarchy: {0}")]
    InvalidPayload(#[from] MergeError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Disposition(#[from] DispositionError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}
