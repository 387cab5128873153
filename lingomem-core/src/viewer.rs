//! Viewer identity injected into concrete repositories
//!
//! Access control is baked into repositories, not layered above them: the
//! factory resolves a `Viewer` per request and every concrete repository
//! enforces restricted-flag and ownership checks against it.

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, OFFLINE_CREDENTIAL_PREFIX};

/// Identity of the caller a repository instance acts for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewer {
    /// User id in the authoritative store
    pub user_id: EntityId,

    /// Opaque credential; the `offline:` prefix selects the local backend
    pub credential: String,

    /// Administrators bypass ownership checks
    pub admin: bool,
}

impl Viewer {
    /// Create a regular viewer
    #[must_use]
    pub fn new(user_id: EntityId, credential: impl Into<String>) -> Self {
        Self {
            user_id,
            credential: credential.into(),
            admin: false,
        }
    }

    /// Create an administrator viewer
    #[must_use]
    pub fn admin(user_id: EntityId, credential: impl Into<String>) -> Self {
        Self {
            user_id,
            credential: credential.into(),
            admin: true,
        }
    }

    /// Identity used by background jobs (indexer, maintenance)
    #[must_use]
    pub fn system() -> Self {
        Self {
            user_id: 0,
            credential: "system".to_string(),
            admin: true,
        }
    }

    /// Viewer operating against the local shadow backend
    #[must_use]
    pub fn offline(user_id: EntityId) -> Self {
        Self {
            user_id,
            credential: format!("{OFFLINE_CREDENTIAL_PREFIX}{user_id}"),
            admin: false,
        }
    }

    /// Whether the credential routes this viewer to the local backend
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.credential.starts_with(OFFLINE_CREDENTIAL_PREFIX)
    }

    /// Whether this viewer may mutate an entity owned by `owner_id`
    #[must_use]
    pub const fn can_modify(&self, owner_id: EntityId) -> bool {
        self.admin || self.user_id == owner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_detection() {
        assert!(Viewer::offline(7).is_offline());
        assert!(!Viewer::new(7, "token-abc").is_offline());
    }

    #[test]
    fn test_can_modify() {
        let viewer = Viewer::new(7, "token");
        assert!(viewer.can_modify(7));
        assert!(!viewer.can_modify(8));
        assert!(Viewer::system().can_modify(8));
    }
}
