//! Platform / project / folder hierarchy entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// Top level of the scope hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: EntityId,
    /// Restricted platforms are visible only to their owner and admins
    pub restricted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload for a platform; the owner comes from the viewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlatform {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub restricted: bool,
}

/// Partial update for a platform; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub restricted: Option<bool>,
}

impl PlatformPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.restricted.is_none()
    }
}

/// A project, optionally owned by a platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    /// Owning platform; `None` means the project stands alone
    pub platform_id: Option<EntityId>,
    pub owner_id: EntityId,
    pub restricted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload for a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub platform_id: Option<EntityId>,
    #[serde(default)]
    pub restricted: bool,
}

/// Partial update for a project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub platform_id: Option<EntityId>,
    pub restricted: Option<bool>,
}

impl ProjectPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.platform_id.is_none()
            && self.restricted.is_none()
    }
}

/// A folder inside a project; folders form a tree rooted at the project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: EntityId,
    pub name: String,
    pub project_id: EntityId,
    /// `None` means the folder sits at the project root
    pub parent_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload for a folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFolder {
    pub name: String,
    pub project_id: EntityId,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
}
