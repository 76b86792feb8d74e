#![forbid(unsafe_code)]

//! Offline-first hierarchical records: a local replica with drafts and
//! dispositions, and the authoritative merge that reconciles pushed subtrees.

pub mod authority;
pub mod cascade;
pub mod clock;
pub mod disposition;
pub mod draft;
pub mod error;
pub mod hierarchy;
pub mod ids;
pub mod node;
pub mod order;
pub mod paths;
pub mod persistence;
pub mod replica;
pub mod timestamp;

pub use authority::{MergeStats, PushOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use disposition::{Disposition, DispositionError};
pub use draft::{AcceptAll, Draft, DraftOutcome, RequiredFields, SchemaValidator};
pub use error::{InvariantViolation, MergeError, ReplicaError};
pub use hierarchy::{Hierarchy, Level, LevelDef};
pub use ids::{ClientId, ServerId};
pub use node::{Fields, Node, NodeSnapshot};
pub use order::{OrderError, OrderPolicy, OrderValueManager};
pub use paths::NodePath;
pub use persistence::{NodeRecord, NodeStore, StoredNode};
pub use replica::{Replica, ReplicaMergeReport};
pub use timestamp::Timestamp;
