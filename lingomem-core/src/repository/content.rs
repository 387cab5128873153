//! Contracts for files and rows

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::EntityId;
use crate::types::{
    FilePatch, FileRow, NewFileRow, NewProjectFile, Pagination, ProjectFile, RowFilter, RowPage,
    RowPatch,
};

/// File persistence contract
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn get(&self, id: EntityId) -> Result<ProjectFile>;

    /// Files in a project, optionally restricted to one folder
    async fn list(
        &self,
        project_id: EntityId,
        folder_id: Option<EntityId>,
    ) -> Result<Vec<ProjectFile>>;

    /// Create the file and its rows in one transaction; `row_count` is set
    /// from the payload
    async fn create_with_rows(
        &self,
        new: NewProjectFile,
        rows: Vec<NewFileRow>,
    ) -> Result<ProjectFile>;

    async fn update(&self, id: EntityId, patch: FilePatch) -> Result<ProjectFile>;

    /// Soft delete into the trash
    async fn delete(&self, id: EntityId) -> Result<()>;
}

/// Row persistence contract
#[async_trait]
pub trait RowRepository: Send + Sync {
    async fn get(&self, id: EntityId) -> Result<FileRow>;

    /// Paginated rows of a file with the unpaginated total
    async fn get_for_file(
        &self,
        file_id: EntityId,
        page: Pagination,
        filter: Option<&RowFilter>,
    ) -> Result<RowPage>;

    /// Update mutable row fields; the source text is not reachable from the
    /// patch type
    async fn update(&self, id: EntityId, patch: RowPatch) -> Result<FileRow>;
}
