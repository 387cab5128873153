//! File and row entities
//!
//! Rows are the translatable units of a document; they are distinct from TM
//! entries. A row's source text is write-once at ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::EntityId;

/// Source document format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Txt,
    Xml,
    Xlsx,
}

impl FileFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Xml => "xml",
            Self::Xlsx => "xlsx",
        }
    }

    /// Parse a stored format tag
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "txt" => Some(Self::Txt),
            "xml" => Some(Self::Xml),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }
}

/// Synchronisation state of a file relative to the authoritative store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Exists only in the local backend
    Local,
    /// Mirrored between backends
    Synced,
    /// The remote counterpart disappeared
    Orphaned,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Synced => "synced",
            Self::Orphaned => "orphaned",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "synced" => Some(Self::Synced),
            "orphaned" => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// Lifecycle tag of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    Normal,
    Reviewed,
    Approved,
}

impl RowState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "reviewed" => Some(Self::Reviewed),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }
}

/// An uploaded source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub id: EntityId,
    pub name: String,
    pub original_name: String,
    pub format: FileFormat,
    pub row_count: i64,
    pub source_lang: String,
    pub target_lang: String,
    pub project_id: EntityId,
    /// `None` places the file at the project root
    pub folder_id: Option<EntityId>,
    pub sync_state: SyncState,
    /// Format-specific extra metadata (sheet names, column maps, ...)
    pub extra: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload for a file; rows are created transactionally with it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProjectFile {
    pub name: String,
    pub original_name: String,
    pub format: FileFormat,
    pub source_lang: String,
    pub target_lang: String,
    pub project_id: EntityId,
    #[serde(default)]
    pub folder_id: Option<EntityId>,
    #[serde(default)]
    pub sync_state: Option<SyncState>,
    #[serde(default)]
    pub extra: Value,
}

/// Partial update for a file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilePatch {
    pub name: Option<String>,
    pub folder_id: Option<EntityId>,
    pub sync_state: Option<SyncState>,
    pub extra: Option<Value>,
}

impl FilePatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.folder_id.is_none()
            && self.sync_state.is_none()
            && self.extra.is_none()
    }
}

/// A single translatable unit of a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRow {
    pub id: EntityId,
    pub file_id: EntityId,
    pub row_number: i64,
    /// Optional string identifier used by string-id matching
    pub string_id: Option<String>,
    /// Write-once at ingestion
    pub source: String,
    pub target: Option<String>,
    pub memo: Option<String>,
    pub state: RowState,
    pub extra: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row payload supplied at file ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFileRow {
    pub row_number: i64,
    #[serde(default)]
    pub string_id: Option<String>,
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub extra: Value,
}

/// Mutable row fields; the source text is deliberately absent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowPatch {
    pub target: Option<String>,
    pub memo: Option<String>,
    pub state: Option<RowState>,
    pub extra: Option<Value>,
}

impl RowPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.target.is_none() && self.memo.is_none() && self.state.is_none() && self.extra.is_none()
    }
}

/// Page of rows with the unpaginated total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowPage {
    pub rows: Vec<FileRow>,
    pub total: u64,
}
