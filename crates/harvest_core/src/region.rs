use std::fmt;

use serde::{Deserialize, Serialize};

pub type RegionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionKind {
    State,
    Municipality,
}

/// A node of the two-level geographic hierarchy. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    /// Two-letter abbreviation; only states carry one.
    pub abbrev: Option<String>,
    pub kind: RegionKind,
    pub parent_state: Option<RegionId>,
}

impl Region {
    pub fn state(id: RegionId, name: impl Into<String>, abbrev: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            abbrev,
            kind: RegionKind::State,
            parent_state: None,
        }
    }

    pub fn municipality(id: RegionId, name: impl Into<String>, parent_state: RegionId) -> Self {
        Self {
            id,
            name: name.into(),
            abbrev: None,
            kind: RegionKind::Municipality,
            parent_state: Some(parent_state),
        }
    }

    /// Abbreviation when present, otherwise the full name.
    pub fn label(&self) -> &str {
        self.abbrev.as_deref().unwrap_or(&self.name)
    }
}

/// Filter combination of one hierarchical query bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPath {
    pub state_id: RegionId,
    pub municipality_id: Option<RegionId>,
}

impl RegionPath {
    pub fn state(state_id: RegionId) -> Self {
        Self {
            state_id,
            municipality_id: None,
        }
    }

    pub fn municipality(state_id: RegionId, municipality_id: RegionId) -> Self {
        Self {
            state_id,
            municipality_id: Some(municipality_id),
        }
    }

    pub fn is_state_level(&self) -> bool {
        self.municipality_id.is_none()
    }

    /// `uf_{state}` or `uf_{state}_municipio_{municipality}`.
    pub fn file_prefix(&self) -> String {
        match self.municipality_id {
            Some(municipality_id) => format!("uf_{}_municipio_{}", self.state_id, municipality_id),
            None => format!("uf_{}", self.state_id),
        }
    }
}

impl fmt::Display for RegionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.municipality_id {
            Some(municipality_id) => write!(f, "state {}/municipality {}", self.state_id, municipality_id),
            None => write!(f, "state {}", self.state_id),
        }
    }
}
