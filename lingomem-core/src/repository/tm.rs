//! Contracts for translation memories and their entries

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::ids::EntityId;
use crate::types::{
    NewTm, NewTmEntry, TmEntry, TmEntryPatch, TmFilter, TmPatch, TmStatus, TranslationMemory,
};

/// TM persistence contract
#[async_trait]
pub trait TmRepository: Send + Sync {
    async fn get(&self, id: EntityId) -> Result<TranslationMemory>;

    async fn list(&self, filter: &TmFilter) -> Result<Vec<TranslationMemory>>;

    async fn create(&self, new: NewTm) -> Result<TranslationMemory>;

    async fn update(&self, id: EntityId, patch: TmPatch) -> Result<TranslationMemory>;

    /// Hard delete: entries and assignments go with the TM; the indexer is
    /// responsible for removing artifacts
    async fn delete(&self, id: EntityId) -> Result<()>;

    /// Transition the index lifecycle tag; `reason` is recorded on `Error`
    async fn set_status(
        &self,
        id: EntityId,
        status: TmStatus,
        reason: Option<&str>,
    ) -> Result<()>;

    /// Record a successful build: `indexed_at = at`, status `Ready`
    async fn mark_indexed(&self, id: EntityId, at: DateTime<Utc>) -> Result<()>;

    /// TMs visible to the viewer whose entries changed after their last build
    async fn list_stale(&self) -> Result<Vec<TranslationMemory>>;

    /// Periodic audit: recompute every cached entry count from the entries
    /// table; returns the number of TMs corrected
    async fn recount_entries(&self) -> Result<u64>;
}

/// TM entry persistence contract
#[async_trait]
pub trait TmEntryRepository: Send + Sync {
    async fn get(&self, id: EntityId) -> Result<TmEntry>;

    /// Every live (non-tombstoned) entry of the TM
    async fn get_all(&self, tm_id: EntityId) -> Result<Vec<TmEntry>>;

    /// Transactional bulk insert; maintains the TM's cached entry count and
    /// returns the number inserted. Source hashes are computed here.
    async fn bulk_add(&self, tm_id: EntityId, entries: Vec<NewTmEntry>) -> Result<u64>;

    async fn update(&self, id: EntityId, patch: TmEntryPatch) -> Result<TmEntry>;

    /// Tombstone entries; returns the number affected and decrements the
    /// cached count
    async fn delete(&self, tm_id: EntityId, entry_ids: &[EntityId]) -> Result<u64>;

    /// Exact lookup by lowercase hex SHA-256 of the source text
    async fn search_hash(&self, tm_id: EntityId, source_hash: &str) -> Result<Vec<TmEntry>>;

    /// Exact lookup by string identifier
    async fn search_stringid(&self, tm_id: EntityId, string_id: &str) -> Result<Vec<TmEntry>>;

    /// Live entry count (recomputed, not the cached column)
    async fn count(&self, tm_id: EntityId) -> Result<i64>;

    /// Most recent `updated_at` across the TM's entries, tombstones included
    async fn latest_updated_at(&self, tm_id: EntityId) -> Result<Option<DateTime<Utc>>>;

    /// Tombstoned fraction of the TM's entries, for compaction decisions
    async fn tombstone_ratio(&self, tm_id: EntityId) -> Result<f64>;
}
