#![forbid(unsafe_code)]

use crate::disposition::Disposition;
use crate::draft::Draft;
use crate::error::InvariantViolation;
use crate::hierarchy::Level;
use crate::ids::{ClientId, ServerId};
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// Scalar payload of a node. Opaque to the sync engine.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// One record of the replica tree. Each parent exclusively owns its children.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    server_id: Option<ServerId>,
    pub client_id: ClientId,
    pub parent_server_id: Option<ServerId>,
    pub parent_client_id: Option<ClientId>,
    pub level: Level,
    pub created_at: Timestamp,
    pub last_modified: Timestamp,
    pub deleted_at: Option<Timestamp>,
    pub disposition: Disposition,
    pub order: Option<f64>,
    pub fields: Fields,
    pub children: Vec<Node>,
    pub draft: Option<Draft>,
}

impl Node {
    /// A node created by a local user action.
    pub fn new_local(
        level: Level,
        parent: Option<&Node>,
        fields: Fields,
        order: Option<f64>,
        now: Timestamp,
    ) -> Self {
        Self {
            server_id: None,
            client_id: ClientId::mint(),
            parent_server_id: parent.and_then(|p| p.server_id),
            parent_client_id: parent.map(|p| p.client_id),
            level,
            created_at: now,
            last_modified: now,
            deleted_at: None,
            disposition: Disposition::New,
            order,
            fields,
            children: Vec::new(),
            draft: None,
        }
    }

    /// Builds a replica subtree from an authoritative snapshot, minting client
    /// ids where the authority did not echo one.
    pub fn hydrate(
        snapshot: &NodeSnapshot,
        parent_client_id: Option<ClientId>,
        disposition: Disposition,
    ) -> Self {
        let client_id = snapshot.client_id.unwrap_or_else(ClientId::mint);
        let children = snapshot
            .children
            .iter()
            .map(|child| Self::hydrate(child, Some(client_id), disposition))
            .collect();
        Self {
            server_id: snapshot.server_id,
            client_id,
            parent_server_id: snapshot.parent_server_id,
            parent_client_id,
            level: snapshot.level,
            created_at: snapshot.created_at,
            last_modified: snapshot.last_modified,
            deleted_at: snapshot.deleted_at,
            disposition,
            order: snapshot.order,
            fields: snapshot.fields.clone(),
            children,
            draft: None,
        }
    }

    pub fn server_id(&self) -> Option<ServerId> {
        self.server_id
    }

    /// Records the authority's id. Once set it never changes.
    pub fn assign_server_id(&mut self, id: ServerId) -> Result<(), InvariantViolation> {
        match self.server_id {
            Some(existing) if existing != id => Err(InvariantViolation::ServerIdChanged {
                client_id: self.client_id,
                was: existing,
                now: id,
            }),
            _ => {
                self.server_id = Some(id);
                for child in &mut self.children {
                    child.parent_server_id = Some(id);
                }
                Ok(())
            }
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn child(&self, id: ClientId) -> Option<&Node> {
        self.children.iter().find(|c| c.client_id == id)
    }

    pub fn child_mut(&mut self, id: ClientId) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.client_id == id)
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Node::subtree_len).sum::<usize>()
    }

    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn to_snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            server_id: self.server_id,
            client_id: Some(self.client_id),
            parent_server_id: self.parent_server_id,
            parent_client_id: self.parent_client_id,
            level: self.level,
            created_at: self.created_at,
            last_modified: self.last_modified,
            deleted_at: self.deleted_at,
            order: self.order,
            fields: self.fields.clone(),
            children: self.children.iter().map(Node::to_snapshot).collect(),
        }
    }
}

/// The node model as it crosses the client/server boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_server_id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_client_id: Option<ClientId>,
    pub level: Level,
    pub created_at: Timestamp,
    pub last_modified: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// A tombstone declaration: the deletion is the node's latest change.
    pub fn declares_tombstone(&self) -> bool {
        self.deleted_at
            .is_some_and(|deleted_at| deleted_at >= self.last_modified)
    }

    pub fn subtree_len(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(NodeSnapshot::subtree_len)
            .sum::<usize>()
    }

    pub fn find(&self, id: ServerId) -> Option<&NodeSnapshot> {
        if self.server_id == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}
