//! Soft-delete trash entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::EntityId;

/// Kind of entity a trash entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrashedKind {
    Project,
    Folder,
    File,
}

impl TrashedKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Folder => "folder",
            Self::File => "file",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Self::Project),
            "folder" => Some(Self::Folder),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Record of a soft-deleted entity, auto-purged after the retention window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashEntry {
    pub id: EntityId,
    pub kind: TrashedKind,
    pub entity_id: EntityId,
    pub deleted_by: EntityId,
    pub deleted_at: DateTime<Utc>,
    /// Everything needed to undelete, including re-activation of assignments
    pub restore_payload: Value,
}
