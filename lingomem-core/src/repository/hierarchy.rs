//! Contracts for the platform / project / folder hierarchy

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::EntityId;
use crate::types::{
    Folder, NewFolder, NewPlatform, NewProject, Platform, PlatformFilter, PlatformPatch, Project,
    ProjectPatch,
};

/// Platform persistence contract
#[async_trait]
pub trait PlatformRepository: Send + Sync {
    async fn get(&self, id: EntityId) -> Result<Platform>;

    /// List platforms visible to the viewer
    async fn list(&self, filter: &PlatformFilter) -> Result<Vec<Platform>>;

    async fn create(&self, new: NewPlatform) -> Result<Platform>;

    async fn update(&self, id: EntityId, patch: PlatformPatch) -> Result<Platform>;

    /// Deleting a platform cascades to its projects
    async fn delete(&self, id: EntityId) -> Result<()>;
}

/// Project persistence contract
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get(&self, id: EntityId) -> Result<Project>;

    /// List projects visible to the viewer, optionally within one platform
    async fn list(&self, platform_id: Option<EntityId>) -> Result<Vec<Project>>;

    async fn create(&self, new: NewProject) -> Result<Project>;

    async fn update(&self, id: EntityId, patch: ProjectPatch) -> Result<Project>;

    /// Soft delete: trash entry + deactivated assignments; folders, files and
    /// rows go with the project on purge
    async fn delete(&self, id: EntityId) -> Result<()>;
}

/// Folder persistence contract
#[async_trait]
pub trait FolderRepository: Send + Sync {
    async fn get(&self, id: EntityId) -> Result<Folder>;

    /// Direct children of `parent_id` (project root when `None`)
    async fn list_children(
        &self,
        project_id: EntityId,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Folder>>;

    async fn create(&self, new: NewFolder) -> Result<Folder>;

    /// Rename; moving a folder under its own descendant is a `Conflict`
    async fn rename(&self, id: EntityId, name: &str) -> Result<Folder>;

    async fn delete(&self, id: EntityId) -> Result<()>;

    /// The folder followed by its ancestors up to the project root, nearest
    /// first. The chain terminates early at a missing ancestor; cycles fail
    /// with `Conflict`.
    async fn ancestors(&self, id: EntityId) -> Result<Vec<Folder>>;
}
