#![forbid(unsafe_code)]

use crate::error::SyncError;
use crate::transport::Transport;
use arbor_core::{
    Clock, Hierarchy, MergeStats, OrderValueManager, PushOutcome, Replica, ReplicaMergeReport,
    ServerId,
};
use serde::Serialize;
use std::sync::Arc;

/// What one [`SyncClient::push`] ended with.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PushReport {
    /// The authority already held this state; `settled` nodes became synced.
    NoUpdate { settled: usize },
    Merged {
        stats: MergeStats,
        merge: ReplicaMergeReport,
    },
    /// The authority was newer; its subtree replaced the local one.
    Superseded { merge: ReplicaMergeReport },
}

/// Drives one replica against an authority.
pub struct SyncClient<T: Transport> {
    replica: Replica,
    transport: T,
}

impl<T: Transport> SyncClient<T> {
    pub fn new(replica: Replica, transport: T) -> Self {
        Self { replica, transport }
    }

    /// Pulls `root` from the authority and starts a replica from it.
    pub fn checkout(
        mut transport: T,
        hierarchy: Hierarchy,
        orders: OrderValueManager,
        clock: Arc<dyn Clock>,
        root: ServerId,
    ) -> Result<Self, SyncError> {
        let snapshot = transport.pull(root)?.ok_or(SyncError::RootGone(root))?;
        let replica = Replica::from_snapshot(hierarchy, orders, clock, &snapshot)?;
        Ok(Self::new(replica, transport))
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn replica_mut(&mut self) -> &mut Replica {
        &mut self.replica
    }

    pub fn into_parts(self) -> (Replica, T) {
        (self.replica, self.transport)
    }

    /// Submits every pending local change and folds the answer back in.
    pub fn push(&mut self) -> Result<PushReport, SyncError> {
        let submitted = self.replica.prepare_push()?;
        let outcome = self.transport.push(&submitted)?;
        tracing::info!(
            target: "arbor::sync",
            outcome = outcome.kind(),
            root = ?submitted.server_id.map(ServerId::get),
            "push answered"
        );
        let report = match outcome {
            PushOutcome::NoUpdate => PushReport::NoUpdate {
                settled: self.replica.settle(submitted.last_modified)?,
            },
            PushOutcome::Merged { subtree, stats } => PushReport::Merged {
                stats,
                merge: self.replica.apply(&subtree)?,
            },
            PushOutcome::Superseded { subtree } => PushReport::Superseded {
                merge: self.replica.apply(&subtree)?,
            },
            PushOutcome::Gone { server_id } => return Err(SyncError::RootGone(server_id)),
        };
        Ok(report)
    }

    /// Fetches the canonical subtree for the replica's root and applies it.
    pub fn pull(&mut self) -> Result<ReplicaMergeReport, SyncError> {
        let root = self.replica.root().server_id().ok_or(SyncError::NotPublished)?;
        let snapshot = self.transport.pull(root)?.ok_or(SyncError::RootGone(root))?;
        let report = self.replica.apply(&snapshot)?;
        tracing::info!(
            target: "arbor::sync",
            root = root.get(),
            adopted = report.adopted,
            obsoleted = report.obsoleted.len(),
            "pull applied"
        );
        Ok(report)
    }
}
