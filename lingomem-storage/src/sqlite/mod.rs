//! ABOUTME: Embedded SQLite backend serving both schema families
//!
//! One pooled `rusqlite` backend serves two repository sets: the degraded
//! mode (authoritative naming scheme) and the local shadow mode
//! (`offline_`-prefixed scheme). Every statement resolves its table names
//! through [`resolver::SchemaMode`]; nothing else differs between the modes
//! except local-change logging and sentinel id translation, which only the
//! local scheme performs.

pub mod resolver;
pub mod schema;

mod repos;
mod set;

pub use set::SqliteRepositorySet;

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{debug, info};

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;
use lingomem_core::types::ScopeRef;
use lingomem_core::viewer::Viewer;

use resolver::{SchemaMode, Table};

/// `sync_meta` keys recording the authoritative ids of the offline scope
pub const META_OFFLINE_PLATFORM_REMOTE: &str = "offline_platform_remote_id";
pub const META_OFFLINE_PROJECT_REMOTE: &str = "offline_project_remote_id";

/// Pooled embedded store bound to one schema family
#[derive(Clone)]
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    schema: SchemaMode,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("schema", &self.schema)
            .finish()
    }
}

fn init_pragmas(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )
}

impl SqliteBackend {
    /// Open (creating if absent) a database file and apply migrations
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` when the file or pool cannot be opened.
    pub fn open(path: &Path, schema: SchemaMode) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("opening embedded store at {}", path.display());
        let manager = SqliteConnectionManager::file(path).with_init(init_pragmas);
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| TmError::BackendUnavailable(format!("sqlite pool: {e}")))?;
        let backend = Self { pool, schema };
        backend.run_migrations()?;
        Ok(backend)
    }

    /// In-memory database for tests; single connection so every statement
    /// sees the same store
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` when the pool cannot be built.
    pub fn in_memory(schema: SchemaMode) -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| TmError::BackendUnavailable(format!("sqlite pool: {e}")))?;
        let backend = Self { pool, schema };
        backend.run_migrations()?;
        Ok(backend)
    }

    /// Apply pending schema migrations idempotently
    ///
    /// # Errors
    ///
    /// Returns `Internal` when a migration script fails.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )
        .map_err(map_sqlite)?;

        let current: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .map_err(map_sqlite)?;

        for (version, sql) in schema::migrations() {
            if version <= current {
                continue;
            }
            info!(version, "applying embedded schema migration");
            conn.execute_batch(&sql)
                .map_err(|e| TmError::Internal(format!("migration v{version}: {e}")))?;
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, Utc::now()],
            )
            .map_err(map_sqlite)?;
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| TmError::BackendUnavailable(format!("sqlite pool: {e}")))
    }

    pub(crate) const fn schema(&self) -> SchemaMode {
        self.schema
    }

    /// Read a `sync_meta` value (last-sync timestamp, server URL, ...)
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn sync_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        match conn.query_row(
            "SELECT value FROM sync_meta WHERE key = ?1",
            [key],
            |row| row.get(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(map_sqlite(e)),
        }
    }

    /// Upsert a `sync_meta` value
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn set_sync_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    /// Mark a remote entity as mirrored by this store
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn subscribe(&self, entity_kind: &str, remote_id: EntityId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO sync_subscriptions (entity_kind, remote_id, subscribed_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![entity_kind, remote_id, Utc::now()],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    /// Remote ids of one kind this store mirrors
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn subscriptions(&self, entity_kind: &str) -> Result<Vec<EntityId>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT remote_id FROM sync_subscriptions
                 WHERE entity_kind = ?1 ORDER BY remote_id",
            )
            .map_err(map_sqlite)?;
        let ids = stmt
            .query_map([entity_kind], |row| row.get(0))
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(ids)
    }

    /// Number of local changes still waiting for reconciliation
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub fn pending_local_changes(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM local_changes WHERE sync_status = 'pending'",
                [],
                |row| row.get(0),
            )
            .map_err(map_sqlite)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Shared per-request context handed to every SQLite repository
pub(crate) struct SqliteCtx {
    backend: SqliteBackend,
    viewer: Viewer,
    /// Cached `(platform, project)` authoritative ids of the offline scope
    offline_remote: Mutex<Option<Option<(EntityId, EntityId)>>>,
}

impl SqliteCtx {
    pub(crate) fn new(backend: SqliteBackend, viewer: Viewer) -> Self {
        Self {
            backend,
            viewer,
            offline_remote: Mutex::new(None),
        }
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.backend.conn()
    }

    pub(crate) const fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub(crate) const fn schema(&self) -> SchemaMode {
        self.backend.schema()
    }

    pub(crate) fn table(&self, table: Table) -> &'static str {
        self.backend.schema().table(table)
    }

    /// Append to the local change log; a no-op under the authoritative scheme
    pub(crate) fn log_change(
        &self,
        conn: &Connection,
        entity_kind: &str,
        entity_id: EntityId,
        change_kind: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<()> {
        if self.schema() != SchemaMode::Local {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO local_changes
                (entity_kind, entity_id, change_kind, field, old_value, new_value,
                 sync_status, changed_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, 'pending', ?6)",
            rusqlite::params![entity_kind, entity_id, change_kind, old_value, new_value, Utc::now()],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    /// Authoritative ids of the offline scope recorded by the sync layer
    fn offline_remote_ids(&self, conn: &Connection) -> Option<(EntityId, EntityId)> {
        let mut cached = self.offline_remote.lock();
        if let Some(known) = *cached {
            return known;
        }
        let read = |key: &str| -> Option<EntityId> {
            conn.query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .ok()
            .and_then(|v| v.parse().ok())
        };
        let pair = match (
            read(META_OFFLINE_PLATFORM_REMOTE),
            read(META_OFFLINE_PROJECT_REMOTE),
        ) {
            (Some(p), Some(q)) => Some((p, q)),
            _ => None,
        };
        *cached = Some(pair);
        pair
    }

    /// Translate an authoritative offline-scope id to its local sentinel
    ///
    /// Assignments carry the authoritative surrogate id for the "Offline
    /// Storage" scope; the local scheme shadows that scope under reserved
    /// negative ids, so traversals must map between the two transparently.
    pub(crate) fn translate_scope(&self, conn: &Connection, scope: ScopeRef) -> ScopeRef {
        if self.schema() != SchemaMode::Local {
            return scope;
        }
        let Some((remote_platform, remote_project)) = self.offline_remote_ids(conn) else {
            return scope;
        };
        match scope {
            ScopeRef::Platform(id) if id == remote_platform => {
                ScopeRef::Platform(lingomem_core::ids::OFFLINE_PLATFORM_LOCAL_ID)
            }
            ScopeRef::Project(id) if id == remote_project => {
                ScopeRef::Project(lingomem_core::ids::OFFLINE_PROJECT_LOCAL_ID)
            }
            other => other,
        }
    }
}

/// Normalise driver errors into the core taxonomy
pub(crate) fn map_sqlite(e: rusqlite::Error) -> TmError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => TmError::NotFound("no matching row".into()),
        rusqlite::Error::SqliteFailure(inner, message)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            TmError::Conflict(message.unwrap_or_else(|| "constraint violation".into()))
        }
        other => TmError::Internal(format!("sqlite: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let backend = SqliteBackend::in_memory(SchemaMode::Authoritative).unwrap();
        backend.run_migrations().unwrap();
        backend.run_migrations().unwrap();
    }

    #[test]
    fn test_sentinels_exist_after_migration() {
        let backend = SqliteBackend::in_memory(SchemaMode::Local).unwrap();
        let conn = backend.conn().unwrap();
        let name: String = conn
            .query_row(
                "SELECT name FROM offline_platforms WHERE id = ?1",
                [lingomem_core::ids::OFFLINE_PLATFORM_LOCAL_ID],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, lingomem_core::ids::OFFLINE_STORAGE_NAME);
        let project: i64 = conn
            .query_row(
                "SELECT platform_id FROM offline_projects WHERE id = ?1",
                [lingomem_core::ids::OFFLINE_PROJECT_LOCAL_ID],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(project, lingomem_core::ids::OFFLINE_PLATFORM_LOCAL_ID);
    }

    #[test]
    fn test_both_families_exist() {
        let backend = SqliteBackend::in_memory(SchemaMode::Authoritative).unwrap();
        let conn = backend.conn().unwrap();
        for table in ["tm_entries", "offline_tm_entries", "sync_meta", "local_changes"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
