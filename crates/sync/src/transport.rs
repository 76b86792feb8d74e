#![forbid(unsafe_code)]

//! The client/server boundary. Requests and responses travel as JSON; the
//! in-process transport still serializes both ways so the replica only ever
//! sees what a remote authority would send.

use crate::config::SyncConfig;
use crate::error::SyncError;
use arbor_core::{NodeSnapshot, PushOutcome, ServerId};
use arbor_storage::SqliteStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    Push { subtree: NodeSnapshot },
    Pull { root: ServerId },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Response {
    Push { result: PushOutcome },
    Pull { subtree: Option<NodeSnapshot> },
    Error { message: String },
}

impl Response {
    fn kind(&self) -> &'static str {
        match self {
            Self::Push { .. } => "push",
            Self::Pull { .. } => "pull",
            Self::Error { .. } => "error",
        }
    }
}

pub trait Transport {
    fn push(&mut self, submitted: &NodeSnapshot) -> Result<PushOutcome, SyncError>;

    /// `None` when the root no longer exists at the authority.
    fn pull(&mut self, root: ServerId) -> Result<Option<NodeSnapshot>, SyncError>;
}

/// Serves wire requests against one authoritative store.
#[derive(Debug)]
pub struct AuthorityService {
    store: Mutex<SqliteStore>,
}

impl AuthorityService {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn open(config: &SyncConfig) -> Result<Self, SyncError> {
        let store = SqliteStore::open(&config.storage_dir, config.hierarchy()?)?;
        Ok(Self::new(store))
    }

    /// Handles one JSON request and renders the JSON response. Failures are
    /// answered with an `error` response rather than dropped.
    pub fn handle(&self, body: &str) -> String {
        let response = serde_json::from_str::<Request>(body)
            .map_err(SyncError::from)
            .and_then(|request| self.dispatch(request))
            .unwrap_or_else(|err| {
                tracing::warn!(target: "arbor::sync", error = %err, "request failed");
                Response::Error {
                    message: err.to_string(),
                }
            });
        serde_json::to_string(&response).unwrap_or_else(|err| {
            serde_json::json!({"op": "error", "message": err.to_string()}).to_string()
        })
    }

    /// Runs `op` against the store, for server-side maintenance such as
    /// soft deletes and tombstone purges.
    pub fn with_store<R>(
        &self,
        op: impl FnOnce(&mut SqliteStore) -> Result<R, arbor_storage::StoreError>,
    ) -> Result<R, SyncError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| SyncError::Remote("store lock poisoned".to_string()))?;
        Ok(op(&mut store)?)
    }

    fn dispatch(&self, request: Request) -> Result<Response, SyncError> {
        match request {
            Request::Push { subtree } => {
                let result = self.with_store(|store| store.push(&subtree))?;
                Ok(Response::Push { result })
            }
            Request::Pull { root } => {
                let subtree = self.with_store(|store| store.pull(root))?;
                Ok(Response::Pull { subtree })
            }
        }
    }
}

/// In-process transport to an [`AuthorityService`].
#[derive(Clone, Debug)]
pub struct LocalTransport {
    service: Arc<AuthorityService>,
}

impl LocalTransport {
    pub fn new(service: Arc<AuthorityService>) -> Self {
        Self { service }
    }

    fn round_trip(&self, request: &Request) -> Result<Response, SyncError> {
        let body = serde_json::to_string(request)?;
        let reply = self.service.handle(&body);
        let response: Response = serde_json::from_str(&reply)?;
        if let Response::Error { message } = response {
            return Err(SyncError::Remote(message));
        }
        Ok(response)
    }
}

impl Transport for LocalTransport {
    fn push(&mut self, submitted: &NodeSnapshot) -> Result<PushOutcome, SyncError> {
        match self.round_trip(&Request::Push {
            subtree: submitted.clone(),
        })? {
            Response::Push { result } => Ok(result),
            other => Err(SyncError::UnexpectedResponse {
                expected: "push",
                got: other.kind(),
            }),
        }
    }

    fn pull(&mut self, root: ServerId) -> Result<Option<NodeSnapshot>, SyncError> {
        match self.round_trip(&Request::Pull { root })? {
            Response::Pull { subtree } => Ok(subtree),
            other => Err(SyncError::UnexpectedResponse {
                expected: "pull",
                got: other.kind(),
            }),
        }
    }
}
