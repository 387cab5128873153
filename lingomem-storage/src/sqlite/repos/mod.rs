//! Concrete SQLite repositories, one module per entity group

mod assignment;
mod content;
mod hierarchy;
mod tm;

pub(crate) use assignment::{SqliteAssignmentRepository, SqliteTrashRepository};
pub(crate) use content::{SqliteFileRepository, SqliteRowRepository};
pub(crate) use hierarchy::{
    SqliteFolderRepository, SqlitePlatformRepository, SqliteProjectRepository,
};
pub(crate) use tm::{SqliteTmEntryRepository, SqliteTmRepository};
