//! Translation memory and entry entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// Index lifecycle tag of a TM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TmStatus {
    /// Created, never indexed
    Pending,
    /// A build is in flight
    Indexing,
    /// Artifacts are published and current as of `indexed_at`
    Ready,
    /// The last build failed; see `error_reason`
    Error,
}

impl TmStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "indexing" => Some(Self::Indexing),
            "ready" => Some(Self::Ready),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// How cascade lookups key exact matches for this TM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMode {
    /// Exact tiers key on the source text hash
    Standard,
    /// Exact tiers key on the row's string identifier
    StringId,
}

impl MatchingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::StringId => "stringid",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Self::Standard),
            "stringid" => Some(Self::StringId),
            _ => None,
        }
    }
}

/// A named collection of bilingual entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationMemory {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    /// Cached count, maintained by repository bulk operations
    pub entry_count: i64,
    pub status: TmStatus,
    pub matching_mode: MatchingMode,
    pub owner_id: EntityId,
    /// Completion time of the last successful index build
    pub indexed_at: Option<DateTime<Utc>>,
    /// Populated when `status == Error`
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TranslationMemory {
    /// A TM is stale when entries have changed since the last build
    #[must_use]
    pub fn is_stale(&self, latest_entry_update: Option<DateTime<Utc>>) -> bool {
        match (self.indexed_at, latest_entry_update) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(indexed), Some(updated)) => indexed < updated,
        }
    }
}

/// Creation payload for a TM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTm {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default)]
    pub matching_mode: Option<MatchingMode>,
}

/// Partial update for a TM; renames never invalidate artifacts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TmPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub matching_mode: Option<MatchingMode>,
}

impl TmPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.matching_mode.is_none()
    }
}

/// A single bilingual record inside a TM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmEntry {
    pub id: EntityId,
    pub tm_id: EntityId,
    pub source: String,
    pub target: String,
    /// Lowercase hex SHA-256 of `source`, computed by the repository
    pub source_hash: String,
    pub string_id: Option<String>,
    pub confirmed: bool,
    pub confirmed_by: Option<EntityId>,
    pub created_by: EntityId,
    /// Tombstone timestamp; set instead of removing the row outright
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TmEntry {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Entry payload for bulk insertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTmEntry {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub string_id: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
}

impl NewTmEntry {
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            string_id: None,
            confirmed: false,
        }
    }
}

/// Partial update for an entry; changing the source recomputes its hash
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TmEntryPatch {
    pub source: Option<String>,
    pub target: Option<String>,
    pub string_id: Option<String>,
    pub confirmed: Option<bool>,
}

impl TmEntryPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.target.is_none()
            && self.string_id.is_none()
            && self.confirmed.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness() {
        let mut tm = TranslationMemory {
            id: 1,
            name: "tm".into(),
            description: None,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            entry_count: 0,
            status: TmStatus::Pending,
            matching_mode: MatchingMode::Standard,
            owner_id: 1,
            indexed_at: None,
            error_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        // Never indexed but has entries: stale
        assert!(tm.is_stale(Some(Utc::now())));
        // No entries at all: not stale
        assert!(!tm.is_stale(None));

        let t0 = Utc::now();
        tm.indexed_at = Some(t0);
        assert!(!tm.is_stale(Some(t0 - chrono::Duration::seconds(5))));
        assert!(tm.is_stale(Some(t0 + chrono::Duration::seconds(5))));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(MatchingMode::parse("stringid"), Some(MatchingMode::StringId));
        assert_eq!(MatchingMode::parse("bogus"), None);
        assert_eq!(TmStatus::parse("ready"), Some(TmStatus::Ready));
    }
}
