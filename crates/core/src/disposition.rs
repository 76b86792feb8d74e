#![forbid(unsafe_code)]

use std::fmt;

/// Sync lifecycle tag of a replica node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Hydrated from the authority, not edited since.
    Initial,
    /// Created on this replica, never accepted by the authority.
    New,
    /// Edited locally since the last merge.
    Modified,
    Synced,
    /// Terminal. The authority does not know the node; it is being dropped.
    Obsoleted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispositionEvent {
    LocalEdit,
    Merged,
    Obsoleted,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::New => "new",
            Self::Modified => "modified",
            Self::Synced => "synced",
            Self::Obsoleted => "obsoleted",
        }
    }

    /// `New` and `Modified` nodes carry work the authority has not seen yet.
    pub fn has_local_changes(self) -> bool {
        matches!(self, Self::New | Self::Modified)
    }

    /// A node that was never accepted stays `New` through further edits so the
    /// next push still creates it.
    pub fn on_local_edit(self) -> Result<Self, DispositionError> {
        match self {
            Self::Initial | Self::Synced | Self::Modified => Ok(Self::Modified),
            Self::New => Ok(Self::New),
            Self::Obsoleted => Err(DispositionError::new(self, DispositionEvent::LocalEdit)),
        }
    }

    pub fn on_merged(self) -> Result<Self, DispositionError> {
        match self {
            Self::Obsoleted => Err(DispositionError::new(self, DispositionEvent::Merged)),
            _ => Ok(Self::Synced),
        }
    }

    pub fn on_obsoleted(self) -> Result<Self, DispositionError> {
        match self {
            Self::Obsoleted => Err(DispositionError::new(self, DispositionEvent::Obsoleted)),
            _ => Ok(Self::Obsoleted),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid disposition transition from {from} on {event:?}")]
pub struct DispositionError {
    pub from: Disposition,
    pub event: DispositionEvent,
}

impl DispositionError {
    fn new(from: Disposition, event: DispositionEvent) -> Self {
        Self { from, event }
    }
}
