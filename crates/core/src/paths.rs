#![forbid(unsafe_code)]

use crate::ids::{ClientId, ClientIdError};
use std::fmt;

/// Root-to-target chain of client ids addressing one node in a replica.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodePath {
    ids: Vec<ClientId>,
}

impl NodePath {
    pub fn root(id: ClientId) -> Self {
        Self { ids: vec![id] }
    }

    pub fn ids(&self) -> &[ClientId] {
        &self.ids
    }

    pub fn target(&self) -> ClientId {
        // Constructors never produce an empty path.
        self.ids[self.ids.len() - 1]
    }

    pub fn child(&self, id: ClientId) -> Self {
        let mut ids = self.ids.clone();
        ids.push(id);
        Self { ids }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.ids.len() < 2 {
            return None;
        }
        Some(Self {
            ids: self.ids[..self.ids.len() - 1].to_vec(),
        })
    }

    pub fn depth(&self) -> usize {
        self.ids.len() - 1
    }

    pub fn parse(value: &str) -> Result<Self, NodePathError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(NodePathError::Empty);
        }
        let mut ids = Vec::new();
        for segment in value.split('/') {
            let id = ClientId::parse(segment).map_err(NodePathError::Segment)?;
            ids.push(id);
        }
        Ok(Self { ids })
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NodePathError {
    #[error("node path must not be empty")]
    Empty,
    #[error("invalid path segment: {0}")]
    Segment(ClientIdError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let root = ClientId::mint();
        let leaf = ClientId::mint();
        let path = NodePath::root(root).child(leaf);
        let parsed = NodePath::parse(&path.to_string()).unwrap();
        assert_eq!(parsed, path);
        assert_eq!(parsed.target(), leaf);
        assert_eq!(parsed.depth(), 1);
        assert_eq!(parsed.parent(), Some(NodePath::root(root)));
    }

    #[test]
    fn rejects_blank_and_malformed_segments() {
        assert_eq!(NodePath::parse("  "), Err(NodePathError::Empty));
        assert_eq!(
            NodePath::parse("not-a-uuid"),
            Err(NodePathError::Segment(ClientIdError::Malformed))
        );
    }
}
