//! Assignment scopes
//!
//! A TM is assigned at exactly one of three levels. `ScopeRef` enforces the
//! at-most-one-target invariant by construction, so it can never represent
//! the illegal "two scope columns set" state.

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// Level at which a TM assignment applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Platform,
    Project,
    Folder,
}

impl ScopeKind {
    /// Specificity rank; higher shadows lower in resolution
    #[must_use]
    pub const fn specificity(self) -> u8 {
        match self {
            Self::Platform => 0,
            Self::Project => 1,
            Self::Folder => 2,
        }
    }
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Platform => "platform",
            Self::Project => "project",
            Self::Folder => "folder",
        };
        write!(f, "{s}")
    }
}

/// Reference to a concrete scope target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ScopeRef {
    Platform(EntityId),
    Project(EntityId),
    Folder(EntityId),
}

impl ScopeRef {
    /// The id of the scope target
    #[must_use]
    pub const fn id(self) -> EntityId {
        match self {
            Self::Platform(id) | Self::Project(id) | Self::Folder(id) => id,
        }
    }

    /// The level of this scope
    #[must_use]
    pub const fn kind(self) -> ScopeKind {
        match self {
            Self::Platform(_) => ScopeKind::Platform,
            Self::Project(_) => ScopeKind::Project,
            Self::Folder(_) => ScopeKind::Folder,
        }
    }
}

impl std::fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specificity_ordering() {
        assert!(ScopeKind::Folder.specificity() > ScopeKind::Project.specificity());
        assert!(ScopeKind::Project.specificity() > ScopeKind::Platform.specificity());
    }

    #[test]
    fn test_scope_serde_roundtrip() {
        let scope = ScopeRef::Folder(12);
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"{"kind":"folder","id":12}"#);
        let back: ScopeRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);
    }
}
