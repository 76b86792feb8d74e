#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier assigned by the authoritative store. Positive, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct ServerId(i64);

impl ServerId {
    pub fn get(self) -> i64 {
        self.0
    }

    pub fn try_new(value: i64) -> Result<Self, ServerIdError> {
        if value <= 0 {
            return Err(ServerIdError::NotPositive(value));
        }
        Ok(Self(value))
    }
}

impl TryFrom<i64> for ServerId {
    type Error = ServerIdError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<ServerId> for i64 {
    fn from(value: ServerId) -> Self {
        value.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ServerIdError {
    #[error("server id must be positive, got {0}")]
    NotPositive(i64),
}

/// Replica-local identity of a node. Travels with the snapshot so the
/// authority can echo it back for nodes it has just created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(value: &str) -> Result<Self, ClientIdError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ClientIdError::Empty);
        }
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| ClientIdError::Malformed)
    }
}

impl From<Uuid> for ClientId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientIdError {
    #[error("client id must not be empty")]
    Empty,
    #[error("client id is not a uuid")]
    Malformed,
}
