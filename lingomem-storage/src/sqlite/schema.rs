//! Embedded-store schema
//!
//! Two parallel table families share identical columns and differ only in
//! prefix. The local-only sync tables (`sync_meta`, `local_changes`,
//! `sync_subscriptions`) exist once per database. Timestamps are stored as
//! RFC 3339 text through the driver's chrono mapping.

use lingomem_core::ids::{OFFLINE_PLATFORM_LOCAL_ID, OFFLINE_PROJECT_LOCAL_ID, OFFLINE_STORAGE_NAME};

/// DDL for one table family under the given prefix ("" or "offline_")
fn family_ddl(prefix: &str) -> String {
    format!(
        "
        CREATE TABLE IF NOT EXISTS {prefix}platforms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            owner_id INTEGER NOT NULL,
            restricted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {prefix}projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            platform_id INTEGER REFERENCES {prefix}platforms(id) ON DELETE CASCADE,
            owner_id INTEGER NOT NULL,
            restricted INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {prefix}folders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            project_id INTEGER NOT NULL REFERENCES {prefix}projects(id) ON DELETE CASCADE,
            parent_id INTEGER REFERENCES {prefix}folders(id),
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {prefix}files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            original_name TEXT NOT NULL,
            format TEXT NOT NULL,
            row_count INTEGER NOT NULL DEFAULT 0,
            source_lang TEXT NOT NULL,
            target_lang TEXT NOT NULL,
            project_id INTEGER NOT NULL REFERENCES {prefix}projects(id) ON DELETE CASCADE,
            folder_id INTEGER REFERENCES {prefix}folders(id),
            sync_state TEXT NOT NULL DEFAULT 'synced',
            extra TEXT NOT NULL DEFAULT 'null',
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {prefix}rows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES {prefix}files(id) ON DELETE CASCADE,
            row_number INTEGER NOT NULL,
            string_id TEXT,
            source TEXT NOT NULL,
            target TEXT,
            memo TEXT,
            state TEXT NOT NULL DEFAULT 'normal',
            extra TEXT NOT NULL DEFAULT 'null',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{prefix}rows_file ON {prefix}rows(file_id, row_number);

        CREATE TABLE IF NOT EXISTS {prefix}tms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            source_lang TEXT NOT NULL,
            target_lang TEXT NOT NULL,
            entry_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            matching_mode TEXT NOT NULL DEFAULT 'standard',
            owner_id INTEGER NOT NULL,
            indexed_at TEXT,
            error_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {prefix}tm_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tm_id INTEGER NOT NULL REFERENCES {prefix}tms(id) ON DELETE CASCADE,
            source TEXT NOT NULL,
            target TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            string_id TEXT,
            confirmed INTEGER NOT NULL DEFAULT 0,
            confirmed_by INTEGER,
            created_by INTEGER NOT NULL,
            deleted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{prefix}tm_entries_hash
            ON {prefix}tm_entries(tm_id, source_hash);
        CREATE INDEX IF NOT EXISTS idx_{prefix}tm_entries_stringid
            ON {prefix}tm_entries(tm_id, string_id);

        CREATE TABLE IF NOT EXISTS {prefix}assignments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tm_id INTEGER NOT NULL REFERENCES {prefix}tms(id) ON DELETE CASCADE,
            platform_id INTEGER,
            project_id INTEGER,
            folder_id INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            priority INTEGER NOT NULL DEFAULT 0,
            assigned_by INTEGER NOT NULL,
            assigned_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (
                (platform_id IS NOT NULL) + (project_id IS NOT NULL) + (folder_id IS NOT NULL) = 1
            )
        );
        CREATE INDEX IF NOT EXISTS idx_{prefix}assignments_scope
            ON {prefix}assignments(platform_id, project_id, folder_id);

        CREATE TABLE IF NOT EXISTS {prefix}trash_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            deleted_by INTEGER NOT NULL,
            deleted_at TEXT NOT NULL,
            restore_payload TEXT NOT NULL DEFAULT 'null'
        );
        "
    )
}

/// Local-only sync plumbing, present once per embedded database
const SYNC_DDL: &str = "
    CREATE TABLE IF NOT EXISTS sync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS local_changes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_kind TEXT NOT NULL,
        entity_id INTEGER NOT NULL,
        change_kind TEXT NOT NULL,
        field TEXT,
        old_value TEXT,
        new_value TEXT,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        changed_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sync_subscriptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_kind TEXT NOT NULL,
        remote_id INTEGER NOT NULL,
        subscribed_at TEXT NOT NULL,
        UNIQUE (entity_kind, remote_id)
    );
";

/// Reserved "Offline Storage" rows, inserted unconditionally into both
/// table families so the sentinel ids are reserved from the first
/// migration on and no id assignment can ever collide with them
fn sentinel_ddl(prefix: &str) -> String {
    format!(
        "
        INSERT OR IGNORE INTO {prefix}platforms
            (id, name, description, owner_id, restricted, created_at, updated_at)
        VALUES ({OFFLINE_PLATFORM_LOCAL_ID}, '{OFFLINE_STORAGE_NAME}',
                'Reserved scope for locally created content', 0, 0,
                strftime('%Y-%m-%dT%H:%M:%S+00:00','now'),
                strftime('%Y-%m-%dT%H:%M:%S+00:00','now'));

        INSERT OR IGNORE INTO {prefix}projects
            (id, name, description, platform_id, owner_id, restricted, deleted,
             created_at, updated_at)
        VALUES ({OFFLINE_PROJECT_LOCAL_ID}, '{OFFLINE_STORAGE_NAME}',
                'Default project for locally created content',
                {OFFLINE_PLATFORM_LOCAL_ID}, 0, 0, 0,
                strftime('%Y-%m-%dT%H:%M:%S+00:00','now'),
                strftime('%Y-%m-%dT%H:%M:%S+00:00','now'));
        "
    )
}

/// Versioned migration scripts, applied in order and recorded in
/// `schema_migrations`
#[must_use]
pub fn migrations() -> Vec<(i64, String)> {
    let v1 = format!(
        "{}\n{}\n{}\n{}\n{}",
        family_ddl(""),
        family_ddl("offline_"),
        SYNC_DDL,
        sentinel_ddl(""),
        sentinel_ddl("offline_")
    );
    vec![(1, v1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_list_is_ordered() {
        let migs = migrations();
        assert!(!migs.is_empty());
        let versions: Vec<i64> = migs.iter().map(|(v, _)| *v).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_family_ddl_prefixes() {
        let ddl = family_ddl("offline_");
        assert!(ddl.contains("offline_tm_entries"));
        assert!(!family_ddl("").contains("offline_"));
    }
}
