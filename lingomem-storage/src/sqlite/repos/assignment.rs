//! SQLite repositories for assignments and the trash

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::params;
use tracing::{debug, warn};

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;
use lingomem_core::repository::{AssignmentRepository, TrashRepository};
use lingomem_core::types::{Assignment, NewAssignment, ScopeRef, TrashEntry, TrashedKind};

use crate::sqlite::resolver::Table;
use crate::sqlite::{map_sqlite, SqliteCtx};

fn map_assignment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Assignment> {
    let platform_id: Option<EntityId> = row.get("platform_id")?;
    let project_id: Option<EntityId> = row.get("project_id")?;
    let folder_id: Option<EntityId> = row.get("folder_id")?;
    let scope = match (platform_id, project_id, folder_id) {
        (Some(id), None, None) => ScopeRef::Platform(id),
        (None, Some(id), None) => ScopeRef::Project(id),
        (None, None, Some(id)) => ScopeRef::Folder(id),
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Integer,
                "assignment scope columns violate the one-target invariant".into(),
            ))
        }
    };
    Ok(Assignment {
        id: row.get("id")?,
        tm_id: row.get("tm_id")?,
        scope,
        active: row.get("active")?,
        priority: row.get("priority")?,
        assigned_by: row.get("assigned_by")?,
        assigned_at: row.get("assigned_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const fn scope_columns(scope: ScopeRef) -> (Option<EntityId>, Option<EntityId>, Option<EntityId>) {
    match scope {
        ScopeRef::Platform(id) => (Some(id), None, None),
        ScopeRef::Project(id) => (None, Some(id), None),
        ScopeRef::Folder(id) => (None, None, Some(id)),
    }
}

pub(crate) struct SqliteAssignmentRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqliteAssignmentRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }

    fn scope_exists(&self, conn: &rusqlite::Connection, scope: ScopeRef) -> Result<bool> {
        let (table, soft_deletable) = match scope {
            ScopeRef::Platform(_) => (self.ctx.table(Table::Platforms), false),
            ScopeRef::Project(_) => (self.ctx.table(Table::Projects), true),
            ScopeRef::Folder(_) => (self.ctx.table(Table::Folders), true),
        };
        let sql = if soft_deletable {
            format!("SELECT COUNT(*) FROM {table} WHERE id = ?1 AND deleted = 0")
        } else {
            format!("SELECT COUNT(*) FROM {table} WHERE id = ?1")
        };
        let count: i64 = conn
            .query_row(&sql, [scope.id()], |row| row.get(0))
            .map_err(map_sqlite)?;
        Ok(count > 0)
    }
}

#[async_trait]
impl AssignmentRepository for SqliteAssignmentRepository {
    async fn get(&self, id: EntityId) -> Result<Assignment> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Assignments);
        conn.query_row(
            &format!("SELECT * FROM {table} WHERE id = ?1"),
            [id],
            map_assignment,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => TmError::not_found("assignment", id),
            other => map_sqlite(other),
        })
    }

    async fn create(&self, new: NewAssignment) -> Result<Assignment> {
        let conn = self.ctx.conn()?;
        let assignments = self.ctx.table(Table::Assignments);
        let tms = self.ctx.table(Table::Tms);

        let scope = self.ctx.translate_scope(&conn, new.scope);

        let tm_exists: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {tms} WHERE id = ?1"),
                [new.tm_id],
                |row| row.get(0),
            )
            .map_err(map_sqlite)?;
        if tm_exists == 0 {
            return Err(TmError::not_found("translation memory", new.tm_id));
        }
        if !self.scope_exists(&conn, scope)? {
            return Err(TmError::NotFound(format!("scope {scope} does not exist")));
        }

        let (platform_id, project_id, folder_id) = scope_columns(scope);
        let duplicate: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {assignments}
                     WHERE tm_id = ?1 AND active = 1
                       AND platform_id IS ?2 AND project_id IS ?3 AND folder_id IS ?4"
                ),
                params![new.tm_id, platform_id, project_id, folder_id],
                |row| row.get(0),
            )
            .map_err(map_sqlite)?;
        if duplicate > 0 {
            return Err(TmError::Conflict(format!(
                "TM {} is already assigned at {scope}",
                new.tm_id
            )));
        }

        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO {assignments}
                    (tm_id, platform_id, project_id, folder_id, active, priority,
                     assigned_by, assigned_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?7)"
            ),
            params![
                new.tm_id,
                platform_id,
                project_id,
                folder_id,
                new.priority,
                self.ctx.viewer().user_id,
                now
            ],
        )
        .map_err(map_sqlite)?;
        let id = conn.last_insert_rowid();
        self.ctx.log_change(&conn, "assignment", id, "add", None, None)?;
        drop(conn);
        debug!(id, tm_id = new.tm_id, %scope, "created assignment");
        self.get(id).await
    }

    async fn revoke(&self, id: EntityId) -> Result<()> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Assignments);
        let affected = conn
            .execute(
                &format!("UPDATE {table} SET active = 0, updated_at = ?1 WHERE id = ?2"),
                params![Utc::now(), id],
            )
            .map_err(map_sqlite)?;
        if affected == 0 {
            return Err(TmError::not_found("assignment", id));
        }
        self.ctx.log_change(&conn, "assignment", id, "edit", None, None)?;
        Ok(())
    }

    async fn list_for_scope(&self, scope: ScopeRef) -> Result<Vec<Assignment>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Assignments);
        let scope = self.ctx.translate_scope(&conn, scope);
        let (platform_id, project_id, folder_id) = scope_columns(scope);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE active = 1
                   AND platform_id IS ?1 AND project_id IS ?2 AND folder_id IS ?3
                 ORDER BY priority ASC, assigned_at DESC, id ASC"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![platform_id, project_id, folder_id], map_assignment)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn list_for_tm(&self, tm_id: EntityId) -> Result<Vec<Assignment>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Assignments);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table} WHERE tm_id = ?1 ORDER BY assigned_at DESC"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([tm_id], map_assignment)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn delete_for_tm(&self, tm_id: EntityId) -> Result<u64> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Assignments);
        let affected = conn
            .execute(&format!("DELETE FROM {table} WHERE tm_id = ?1"), [tm_id])
            .map_err(map_sqlite)?;
        Ok(affected as u64)
    }

    async fn set_active_for_scope(&self, scope: ScopeRef, active: bool) -> Result<u64> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Assignments);
        let scope = self.ctx.translate_scope(&conn, scope);
        let (platform_id, project_id, folder_id) = scope_columns(scope);
        let affected = conn
            .execute(
                &format!(
                    "UPDATE {table} SET active = ?1, updated_at = ?2
                     WHERE platform_id IS ?3 AND project_id IS ?4 AND folder_id IS ?5"
                ),
                params![active, Utc::now(), platform_id, project_id, folder_id],
            )
            .map_err(map_sqlite)?;
        Ok(affected as u64)
    }
}

fn map_trash(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrashEntry> {
    let kind: String = row.get("kind")?;
    let payload: String = row.get("restore_payload")?;
    Ok(TrashEntry {
        id: row.get("id")?,
        kind: TrashedKind::parse(&kind).unwrap_or(TrashedKind::File),
        entity_id: row.get("entity_id")?,
        deleted_by: row.get("deleted_by")?,
        deleted_at: row.get("deleted_at")?,
        restore_payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
    })
}

pub(crate) struct SqliteTrashRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqliteTrashRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }

    /// Hard-remove a trashed entity and everything it owns
    fn purge_entity(
        &self,
        conn: &rusqlite::Connection,
        kind: TrashedKind,
        entity_id: EntityId,
    ) -> Result<()> {
        let projects = self.ctx.table(Table::Projects);
        let folders = self.ctx.table(Table::Folders);
        let files = self.ctx.table(Table::Files);
        let rows = self.ctx.table(Table::Rows);
        match kind {
            TrashedKind::Project => {
                // Folders, files and rows cascade through foreign keys
                conn.execute(&format!("DELETE FROM {projects} WHERE id = ?1"), [entity_id])
                    .map_err(map_sqlite)?;
            }
            TrashedKind::Folder => {
                conn.execute(
                    &format!(
                        "DELETE FROM {rows} WHERE file_id IN
                            (SELECT id FROM {files} WHERE folder_id = ?1)"
                    ),
                    [entity_id],
                )
                .map_err(map_sqlite)?;
                conn.execute(&format!("DELETE FROM {files} WHERE folder_id = ?1"), [entity_id])
                    .map_err(map_sqlite)?;
                conn.execute(&format!("DELETE FROM {folders} WHERE id = ?1"), [entity_id])
                    .map_err(map_sqlite)?;
            }
            TrashedKind::File => {
                conn.execute(&format!("DELETE FROM {rows} WHERE file_id = ?1"), [entity_id])
                    .map_err(map_sqlite)?;
                conn.execute(&format!("DELETE FROM {files} WHERE id = ?1"), [entity_id])
                    .map_err(map_sqlite)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TrashRepository for SqliteTrashRepository {
    async fn list(&self) -> Result<Vec<TrashEntry>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TrashEntries);
        let viewer = self.ctx.viewer();
        let deleted_by = if viewer.admin {
            None
        } else {
            Some(viewer.user_id)
        };
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE (?1 IS NULL OR deleted_by = ?1)
                 ORDER BY deleted_at DESC"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![deleted_by], map_trash)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn restore(&self, trash_id: EntityId) -> Result<()> {
        let conn = self.ctx.conn()?;
        let trash = self.ctx.table(Table::TrashEntries);
        let entry = conn
            .query_row(
                &format!("SELECT * FROM {trash} WHERE id = ?1"),
                [trash_id],
                map_trash,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => TmError::not_found("trash entry", trash_id),
                other => map_sqlite(other),
            })?;

        let now = Utc::now();
        let (table, scope) = match entry.kind {
            TrashedKind::Project => (
                self.ctx.table(Table::Projects),
                Some(ScopeRef::Project(entry.entity_id)),
            ),
            TrashedKind::Folder => (
                self.ctx.table(Table::Folders),
                Some(ScopeRef::Folder(entry.entity_id)),
            ),
            TrashedKind::File => (self.ctx.table(Table::Files), None),
        };
        let affected = conn
            .execute(
                &format!("UPDATE {table} SET deleted = 0, updated_at = ?1 WHERE id = ?2"),
                params![now, entry.entity_id],
            )
            .map_err(map_sqlite)?;
        if affected == 0 {
            return Err(TmError::NotFound(format!(
                "{} {} no longer exists",
                entry.kind.as_str(),
                entry.entity_id
            )));
        }

        // Restoring a scope re-activates the assignments its trashing paused
        if let Some(scope) = scope {
            let assignments = self.ctx.table(Table::Assignments);
            let (platform_id, project_id, folder_id) = scope_columns(scope);
            conn.execute(
                &format!(
                    "UPDATE {assignments} SET active = 1, updated_at = ?1
                     WHERE platform_id IS ?2 AND project_id IS ?3 AND folder_id IS ?4"
                ),
                params![now, platform_id, project_id, folder_id],
            )
            .map_err(map_sqlite)?;
        }

        conn.execute(&format!("DELETE FROM {trash} WHERE id = ?1"), [trash_id])
            .map_err(map_sqlite)?;
        debug!(trash_id, "restored {} {}", entry.kind.as_str(), entry.entity_id);
        Ok(())
    }

    async fn purge_older_than(&self, days: u32) -> Result<u64> {
        let conn = self.ctx.conn()?;
        let trash = self.ctx.table(Table::TrashEntries);
        let cutoff = Utc::now() - Duration::days(i64::from(days));

        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {trash} WHERE deleted_at < ?1"))
            .map_err(map_sqlite)?;
        let expired = stmt
            .query_map(params![cutoff], map_trash)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        drop(stmt);

        let mut purged = 0u64;
        for entry in expired {
            if let Err(e) = self.purge_entity(&conn, entry.kind, entry.entity_id) {
                warn!(trash_id = entry.id, "purge failed, keeping trash entry: {e}");
                continue;
            }
            conn.execute(&format!("DELETE FROM {trash} WHERE id = ?1"), [entry.id])
                .map_err(map_sqlite)?;
            purged += 1;
        }
        if purged > 0 {
            debug!(purged, "purged expired trash entries");
        }
        Ok(purged)
    }
}
