#![forbid(unsafe_code)]

use crate::error::MergeError;
use crate::hierarchy::Level;
use crate::ids::ServerId;
use crate::node::Fields;
use crate::timestamp::Timestamp;

/// Persisted columns of one authoritative node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    pub parent_id: Option<ServerId>,
    pub level: Level,
    pub created_at: Timestamp,
    pub last_modified: Timestamp,
    pub deleted_at: Option<Timestamp>,
    pub order: Option<f64>,
    pub fields: Fields,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredNode {
    pub id: ServerId,
    pub record: NodeRecord,
}

/// The persistence collaborator used by the authoritative merge.
///
/// An implementation wraps one caller-owned unit of work: every call made
/// during a single push lands in the same transaction, and the caller decides
/// whether it commits.
pub trait NodeStore {
    type Error: From<MergeError>;

    fn find_by_id(&self, id: ServerId) -> Result<Option<StoredNode>, Self::Error>;

    /// Every child of `parent`, tombstoned ones included, in sibling order.
    fn find_many_by_parent(&self, parent: ServerId) -> Result<Vec<StoredNode>, Self::Error>;

    fn create(&mut self, record: &NodeRecord) -> Result<ServerId, Self::Error>;

    fn update(&mut self, id: ServerId, record: &NodeRecord) -> Result<(), Self::Error>;

    fn set_last_modified(&mut self, id: ServerId, at: Timestamp) -> Result<(), Self::Error>;

    /// Tombstones one row at `at` and raises its `last_modified` to at least `at`.
    fn soft_delete_by_id(&mut self, id: ServerId, at: Timestamp) -> Result<(), Self::Error>;
}
