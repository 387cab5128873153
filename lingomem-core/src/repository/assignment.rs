//! Contracts for assignments and the trash

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::EntityId;
use crate::types::{Assignment, NewAssignment, ScopeRef, TrashEntry};

/// Assignment persistence contract
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn get(&self, id: EntityId) -> Result<Assignment>;

    async fn create(&self, new: NewAssignment) -> Result<Assignment>;

    /// Deactivate without removing; only a TM delete removes assignments
    async fn revoke(&self, id: EntityId) -> Result<()>;

    /// Active assignments targeting exactly this scope, ordered by priority
    /// ascending then `assigned_at` descending
    async fn list_for_scope(&self, scope: ScopeRef) -> Result<Vec<Assignment>>;

    /// All assignments of a TM, active or not
    async fn list_for_tm(&self, tm_id: EntityId) -> Result<Vec<Assignment>>;

    /// Hard delete of a TM's assignments, called from the TM delete path
    async fn delete_for_tm(&self, tm_id: EntityId) -> Result<u64>;

    /// Flip the active flag for every assignment on a scope (trash and
    /// restore hooks); returns the number affected
    async fn set_active_for_scope(&self, scope: ScopeRef, active: bool) -> Result<u64>;
}

/// Trash persistence contract
#[async_trait]
pub trait TrashRepository: Send + Sync {
    /// Trash entries visible to the viewer, newest first
    async fn list(&self) -> Result<Vec<TrashEntry>>;

    /// Undelete; re-activates the scope's assignments
    async fn restore(&self, trash_id: EntityId) -> Result<()>;

    /// Purge entries older than the retention window; returns the number
    /// permanently removed
    async fn purge_older_than(&self, days: u32) -> Result<u64>;
}
