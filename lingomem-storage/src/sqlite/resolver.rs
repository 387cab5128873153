//! Schema-aware table resolver
//!
//! The embedded engine hosts two parallel table families with identical
//! columns: the authoritative naming scheme (degraded mode) and the
//! `offline_`-prefixed local scheme (local shadow mode). Every statement in
//! the SQLite repositories goes through this resolver, decided once at
//! construction time by the set's `SchemaMode`.

/// Which table family the repositories address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    /// Authoritative naming scheme under the embedded engine
    Authoritative,
    /// Local naming scheme used by the on-device shadow store
    Local,
}

/// Logical entity tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Platforms,
    Projects,
    Folders,
    Files,
    Rows,
    Tms,
    TmEntries,
    Assignments,
    TrashEntries,
}

impl SchemaMode {
    /// Physical table name for a logical entity under this schema
    #[must_use]
    pub const fn table(self, table: Table) -> &'static str {
        match (self, table) {
            (Self::Authoritative, Table::Platforms) => "platforms",
            (Self::Authoritative, Table::Projects) => "projects",
            (Self::Authoritative, Table::Folders) => "folders",
            (Self::Authoritative, Table::Files) => "files",
            (Self::Authoritative, Table::Rows) => "rows",
            (Self::Authoritative, Table::Tms) => "tms",
            (Self::Authoritative, Table::TmEntries) => "tm_entries",
            (Self::Authoritative, Table::Assignments) => "assignments",
            (Self::Authoritative, Table::TrashEntries) => "trash_entries",
            (Self::Local, Table::Platforms) => "offline_platforms",
            (Self::Local, Table::Projects) => "offline_projects",
            (Self::Local, Table::Folders) => "offline_folders",
            (Self::Local, Table::Files) => "offline_files",
            (Self::Local, Table::Rows) => "offline_rows",
            (Self::Local, Table::Tms) => "offline_tms",
            (Self::Local, Table::TmEntries) => "offline_tm_entries",
            (Self::Local, Table::Assignments) => "offline_assignments",
            (Self::Local, Table::TrashEntries) => "offline_trash_entries",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authoritative_names_are_bare() {
        assert_eq!(SchemaMode::Authoritative.table(Table::TmEntries), "tm_entries");
        assert_eq!(SchemaMode::Authoritative.table(Table::Rows), "rows");
    }

    #[test]
    fn test_local_names_are_prefixed() {
        assert_eq!(SchemaMode::Local.table(Table::TmEntries), "offline_tm_entries");
        assert_eq!(SchemaMode::Local.table(Table::Platforms), "offline_platforms");
    }
}
