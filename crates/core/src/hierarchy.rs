#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Depth of a node in the fixed level chain; `Level::ROOT` is the top level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(u8);

impl Level {
    pub const ROOT: Level = Level(0);

    pub fn new(depth: u8) -> Self {
        Self(depth)
    }

    pub fn depth(self) -> u8 {
        self.0
    }

    pub fn parent(self) -> Option<Level> {
        self.0.checked_sub(1).map(Level)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDef {
    pub name: String,
    #[serde(default)]
    pub orderable: bool,
}

impl LevelDef {
    pub fn new(name: impl Into<String>, orderable: bool) -> Self {
        Self {
            name: name.into(),
            orderable,
        }
    }
}

/// The deployment's level chain, e.g. owner -> document -> section -> item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LevelDef>", into = "Vec<LevelDef>")]
pub struct Hierarchy {
    levels: Vec<LevelDef>,
}

impl Hierarchy {
    pub fn try_new(levels: Vec<LevelDef>) -> Result<Self, HierarchyError> {
        if levels.is_empty() {
            return Err(HierarchyError::Empty);
        }
        if levels.len() > usize::from(u8::MAX) {
            return Err(HierarchyError::TooDeep(levels.len()));
        }
        let mut seen = BTreeSet::new();
        for def in &levels {
            let name = def.name.trim();
            if name.is_empty() {
                return Err(HierarchyError::BlankName);
            }
            if !seen.insert(name.to_string()) {
                return Err(HierarchyError::DuplicateName(name.to_string()));
            }
        }
        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn def(&self, level: Level) -> Option<&LevelDef> {
        self.levels.get(usize::from(level.depth()))
    }

    pub fn name(&self, level: Level) -> &str {
        self.def(level).map(|d| d.name.as_str()).unwrap_or("?")
    }

    pub fn level(&self, name: &str) -> Option<Level> {
        self.levels
            .iter()
            .position(|d| d.name == name)
            .and_then(|i| u8::try_from(i).ok())
            .map(Level)
    }

    pub fn contains(&self, level: Level) -> bool {
        self.def(level).is_some()
    }

    pub fn child_of(&self, level: Level) -> Option<Level> {
        let next = Level(level.depth().checked_add(1)?);
        self.contains(next).then_some(next)
    }

    pub fn is_leaf(&self, level: Level) -> bool {
        self.child_of(level).is_none()
    }

    pub fn is_orderable(&self, level: Level) -> bool {
        self.def(level).is_some_and(|d| d.orderable)
    }
}

impl TryFrom<Vec<LevelDef>> for Hierarchy {
    type Error = HierarchyError;

    fn try_from(value: Vec<LevelDef>) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<Hierarchy> for Vec<LevelDef> {
    fn from(value: Hierarchy) -> Self {
        value.levels
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    #[error("hierarchy must declare at least one level")]
    Empty,
    #[error("hierarchy has {0} levels, at most 255 are supported")]
    TooDeep(usize),
    #[error("level name must not be blank")]
    BlankName,
    #[error("level name {0:?} is declared twice")]
    DuplicateName(String),
}
