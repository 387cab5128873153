//! Entity types for the translation memory data model

mod assignment;
mod file;
mod filters;
mod hierarchy;
mod scope;
mod tm;
mod trash;

pub use assignment::{Assignment, NewAssignment};
pub use file::{
    FileFormat, FilePatch, FileRow, NewFileRow, NewProjectFile, ProjectFile, RowPage, RowPatch,
    RowState, SyncState,
};
pub use filters::{Pagination, PlatformFilter, RowFilter, TmFilter};
pub use hierarchy::{
    Folder, NewFolder, NewPlatform, NewProject, Platform, PlatformPatch, Project, ProjectPatch,
};
pub use scope::{ScopeKind, ScopeRef};
pub use tm::{
    MatchingMode, NewTm, NewTmEntry, TmEntry, TmEntryPatch, TmPatch, TmStatus, TranslationMemory,
};
pub use trash::{TrashEntry, TrashedKind};
