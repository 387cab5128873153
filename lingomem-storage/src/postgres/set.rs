//! The authoritative-backend repository set

use std::sync::Arc;

use lingomem_core::repository::{
    AssignmentRepository, BackendMode, FileRepository, FolderRepository, PlatformRepository,
    ProjectRepository, RepositorySet, RowRepository, SimilaritySearch, TmEntryRepository,
    TmRepository, TrashRepository,
};
use lingomem_core::viewer::Viewer;

use super::repos::{
    PgAssignmentRepository, PgCtx, PgFileRepository, PgFolderRepository, PgPlatformRepository,
    PgProjectRepository, PgRowRepository, PgSimilaritySearch, PgTmEntryRepository, PgTmRepository,
    PgTrashRepository,
};
use super::PostgresBackend;

/// Authoritative repository set; the only one exposing trigram similarity
pub struct PostgresRepositorySet {
    viewer: Viewer,
    platforms: PgPlatformRepository,
    projects: PgProjectRepository,
    folders: PgFolderRepository,
    files: PgFileRepository,
    rows: PgRowRepository,
    tms: PgTmRepository,
    tm_entries: PgTmEntryRepository,
    assignments: PgAssignmentRepository,
    trash: PgTrashRepository,
    similarity: PgSimilaritySearch,
}

impl PostgresRepositorySet {
    #[must_use]
    pub(crate) fn new(backend: PostgresBackend, viewer: Viewer) -> Self {
        let ctx = Arc::new(PgCtx {
            backend,
            viewer: viewer.clone(),
        });
        Self {
            viewer,
            platforms: PgPlatformRepository { ctx: Arc::clone(&ctx) },
            projects: PgProjectRepository { ctx: Arc::clone(&ctx) },
            folders: PgFolderRepository { ctx: Arc::clone(&ctx) },
            files: PgFileRepository { ctx: Arc::clone(&ctx) },
            rows: PgRowRepository { ctx: Arc::clone(&ctx) },
            tms: PgTmRepository { ctx: Arc::clone(&ctx) },
            tm_entries: PgTmEntryRepository { ctx: Arc::clone(&ctx) },
            assignments: PgAssignmentRepository { ctx: Arc::clone(&ctx) },
            trash: PgTrashRepository { ctx: Arc::clone(&ctx) },
            similarity: PgSimilaritySearch { ctx },
        }
    }
}

impl RepositorySet for PostgresRepositorySet {
    fn mode(&self) -> BackendMode {
        BackendMode::Authoritative
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

    fn similarity(&self) -> Option<&dyn SimilaritySearch> {
        Some(&self.similarity)
    }
}
