//! The per-request repository aggregate and optional capabilities

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::EntityId;
use crate::types::TmEntry;
use crate::viewer::Viewer;

use super::{
    AssignmentRepository, FileRepository, FolderRepository, PlatformRepository, ProjectRepository,
    RowRepository, TmEntryRepository, TmRepository, TrashRepository,
};

/// Which concrete backend a repository set talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Networked relational store, authoritative naming scheme
    Authoritative,
    /// Embedded store on the server machine, authoritative naming scheme
    Degraded,
    /// Embedded store on the user device, local naming scheme
    Local,
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authoritative => "authoritative",
            Self::Degraded => "degraded",
            Self::Local => "local",
        };
        write!(f, "{s}")
    }
}

/// Optional capability: server-side trigram similarity over entry sources
///
/// Only the authoritative backend implements this. Callers discover it via
/// [`RepositorySet::similarity`]; its absence means the route treats the
/// lookup as "feature unavailable in this mode" and carries on.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Entries whose source trigram-matches `text` at or above `threshold`,
    /// best first
    async fn search_similar(
        &self,
        tm_id: EntityId,
        text: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<(TmEntry, f32)>>;
}

/// Everything a request needs, resolved once by the factory
pub trait RepositorySet: Send + Sync {
    fn mode(&self) -> BackendMode;

    fn viewer(&self) -> &Viewer;

    fn platforms(&self) -> &dyn PlatformRepository;
    fn projects(&self) -> &dyn ProjectRepository;
    fn folders(&self) -> &dyn FolderRepository;
    fn files(&self) -> &dyn FileRepository;
    fn rows(&self) -> &dyn RowRepository;
    fn tms(&self) -> &dyn TmRepository;
    fn tm_entries(&self) -> &dyn TmEntryRepository;
    fn assignments(&self) -> &dyn AssignmentRepository;
    fn trash(&self) -> &dyn TrashRepository;

    /// Present only on backends that can realise trigram similarity
    fn similarity(&self) -> Option<&dyn SimilaritySearch> {
        None
    }
}

impl std::fmt::Debug for dyn RepositorySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySet")
            .field("mode", &self.mode())
            .finish()
    }
}
