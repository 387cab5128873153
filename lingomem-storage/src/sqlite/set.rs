//! The embedded-backend repository set

use std::sync::Arc;

use lingomem_core::repository::{
    AssignmentRepository, BackendMode, FileRepository, FolderRepository, PlatformRepository,
    ProjectRepository, RepositorySet, RowRepository, TmEntryRepository, TmRepository,
    TrashRepository,
};
use lingomem_core::viewer::Viewer;

use super::repos::{
    SqliteAssignmentRepository, SqliteFileRepository, SqliteFolderRepository,
    SqlitePlatformRepository, SqliteProjectRepository, SqliteRowRepository,
    SqliteTmEntryRepository, SqliteTmRepository, SqliteTrashRepository,
};
use super::resolver::SchemaMode;
use super::{SqliteBackend, SqliteCtx};

/// One embedded backend serving either the degraded or the local mode
///
/// Trigram similarity has no realisation on the embedded engine, so
/// `similarity()` stays `None` and routes treat the capability as absent.
pub struct SqliteRepositorySet {
    mode: BackendMode,
    viewer: Viewer,
    platforms: SqlitePlatformRepository,
    projects: SqliteProjectRepository,
    folders: SqliteFolderRepository,
    files: SqliteFileRepository,
    rows: SqliteRowRepository,
    tms: SqliteTmRepository,
    tm_entries: SqliteTmEntryRepository,
    assignments: SqliteAssignmentRepository,
    trash: SqliteTrashRepository,
}

impl SqliteRepositorySet {
    /// Build a set over an opened backend for one viewer
    ///
    /// The backend mode follows the backend's schema: the local naming
    /// scheme is the local shadow, the authoritative scheme under the
    /// embedded engine is the degraded mode.
    #[must_use]
    pub fn new(backend: SqliteBackend, viewer: Viewer) -> Self {
        let mode = match backend.schema() {
            SchemaMode::Local => BackendMode::Local,
            SchemaMode::Authoritative => BackendMode::Degraded,
        };
        let ctx = Arc::new(SqliteCtx::new(backend, viewer.clone()));
        Self {
            mode,
            viewer,
            platforms: SqlitePlatformRepository::new(Arc::clone(&ctx)),
            projects: SqliteProjectRepository::new(Arc::clone(&ctx)),
            folders: SqliteFolderRepository::new(Arc::clone(&ctx)),
            files: SqliteFileRepository::new(Arc::clone(&ctx)),
            rows: SqliteRowRepository::new(Arc::clone(&ctx)),
            tms: SqliteTmRepository::new(Arc::clone(&ctx)),
            tm_entries: SqliteTmEntryRepository::new(Arc::clone(&ctx)),
            assignments: SqliteAssignmentRepository::new(Arc::clone(&ctx)),
            trash: SqliteTrashRepository::new(ctx),
        }
    }
}

impl RepositorySet for SqliteRepositorySet {
    fn mode(&self) -> BackendMode {
        self.mode
    }

    fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    fn platforms(&self) -> &dyn PlatformRepository {
        &self.platforms
    }

    fn projects(&self) -> &dyn ProjectRepository {
        &self.projects
    }

    fn folders(&self) -> &dyn FolderRepository {
        &self.folders
    }

    fn files(&self) -> &dyn FileRepository {
        &self.files
    }

    fn rows(&self) -> &dyn RowRepository {
        &self.rows
    }

    fn tms(&self) -> &dyn TmRepository {
        &self.tms
    }

    fn tm_entries(&self) -> &dyn TmEntryRepository {
        &self.tm_entries
    }

    fn assignments(&self) -> &dyn AssignmentRepository {
        &self.assignments
    }

    fn trash(&self) -> &dyn TrashRepository {
        &self.trash
    }
}
