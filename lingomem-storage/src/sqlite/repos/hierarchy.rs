//! SQLite repositories for the platform / project / folder hierarchy

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use tracing::debug;

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::{EntityId, OFFLINE_PLATFORM_LOCAL_ID, OFFLINE_STORAGE_NAME};
use lingomem_core::repository::{FolderRepository, PlatformRepository, ProjectRepository};
use lingomem_core::types::{
    Folder, NewFolder, NewPlatform, NewProject, Platform, PlatformFilter, PlatformPatch, Project,
    ProjectPatch, ScopeRef,
};

use crate::sqlite::resolver::Table;
use crate::sqlite::{map_sqlite, SqliteCtx};

fn map_platform(row: &rusqlite::Row<'_>) -> rusqlite::Result<Platform> {
    Ok(Platform {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        owner_id: row.get("owner_id")?,
        restricted: row.get("restricted")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn map_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        platform_id: row.get("platform_id")?,
        owner_id: row.get("owner_id")?,
        restricted: row.get("restricted")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn map_folder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get("id")?,
        name: row.get("name")?,
        project_id: row.get("project_id")?,
        parent_id: row.get("parent_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) struct SqlitePlatformRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqlitePlatformRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }

    fn visible(&self, platform: &Platform) -> bool {
        let viewer = self.ctx.viewer();
        !platform.restricted || viewer.admin || viewer.user_id == platform.owner_id
    }
}

#[async_trait]
impl PlatformRepository for SqlitePlatformRepository {
    async fn get(&self, id: EntityId) -> Result<Platform> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Platforms);
        let platform = conn
            .query_row(
                &format!("SELECT * FROM {table} WHERE id = ?1"),
                [id],
                map_platform,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => TmError::not_found("platform", id),
                other => map_sqlite(other),
            })?;
        if !self.visible(&platform) {
            return Err(TmError::PermissionDenied(format!(
                "platform {id} is restricted"
            )));
        }
        Ok(platform)
    }

    async fn list(&self, filter: &PlatformFilter) -> Result<Vec<Platform>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Platforms);
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {table} ORDER BY name"))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([], map_platform)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;

        let viewer = self.ctx.viewer();
        Ok(rows
            .into_iter()
            .filter(|p| self.visible(p))
            .filter(|p| {
                // The reserved offline scope stays out of listings for
                // everyone but its owner, and out of all listings when the
                // caller shows the local mirror instead
                if p.name != OFFLINE_STORAGE_NAME {
                    return true;
                }
                if filter.hide_shadowed && p.id != OFFLINE_PLATFORM_LOCAL_ID {
                    return false;
                }
                viewer.admin || viewer.user_id == p.owner_id || p.id == OFFLINE_PLATFORM_LOCAL_ID
            })
            .collect())
    }

    async fn create(&self, new: NewPlatform) -> Result<Platform> {
        let viewer = self.ctx.viewer();
        if !viewer.admin {
            return Err(TmError::PermissionDenied(
                "only administrators create platforms".into(),
            ));
        }
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("platform name is empty".into()));
        }

        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Platforms);
        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO {table}
                    (name, description, owner_id, restricted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)"
            ),
            params![new.name, new.description, viewer.user_id, new.restricted, now],
        )
        .map_err(map_sqlite)?;
        let id = conn.last_insert_rowid();

        self.ctx.log_change(
            &conn,
            "platform",
            id,
            "add",
            None,
            Some(&serde_json::to_string(&new)?),
        )?;
        drop(conn);
        debug!(id, "created platform");
        self.get(id).await
    }

    async fn update(&self, id: EntityId, patch: PlatformPatch) -> Result<Platform> {
        let current = self.get(id).await?;
        if !self.ctx.viewer().can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "platform {id} belongs to another owner"
            )));
        }
        if patch.is_empty() {
            return Ok(current);
        }

        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Platforms);
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.or(current.description);
        let restricted = patch.restricted.unwrap_or(current.restricted);
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET name = ?1, description = ?2, restricted = ?3, updated_at = ?4
                 WHERE id = ?5"
            ),
            params![name, description, restricted, Utc::now(), id],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "platform", id, "edit", None, None)?;
        drop(conn);
        self.get(id).await
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let current = self.get(id).await?;
        if !self.ctx.viewer().can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "platform {id} belongs to another owner"
            )));
        }

        let conn = self.ctx.conn()?;
        let platforms = self.ctx.table(Table::Platforms);
        let assignments = self.ctx.table(Table::Assignments);
        conn.execute(
            &format!("UPDATE {assignments} SET active = 0, updated_at = ?1 WHERE platform_id = ?2"),
            params![Utc::now(), id],
        )
        .map_err(map_sqlite)?;
        // Projects, folders, files and rows cascade through foreign keys
        conn.execute(&format!("DELETE FROM {platforms} WHERE id = ?1"), [id])
            .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "platform", id, "delete", None, None)?;
        debug!(id, "deleted platform");
        Ok(())
    }
}

pub(crate) struct SqliteProjectRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqliteProjectRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }

    fn visible(&self, project: &Project) -> bool {
        let viewer = self.ctx.viewer();
        !project.restricted || viewer.admin || viewer.user_id == project.owner_id
    }
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn get(&self, id: EntityId) -> Result<Project> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Projects);
        let project = conn
            .query_row(
                &format!("SELECT * FROM {table} WHERE id = ?1 AND deleted = 0"),
                [id],
                map_project,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => TmError::not_found("project", id),
                other => map_sqlite(other),
            })?;
        if !self.visible(&project) {
            return Err(TmError::PermissionDenied(format!(
                "project {id} is restricted"
            )));
        }
        Ok(project)
    }

    async fn list(&self, platform_id: Option<EntityId>) -> Result<Vec<Project>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Projects);

        // Callers may hold the authoritative id of the offline scope
        let platform_id = platform_id.map(|id| {
            self.ctx
                .translate_scope(&conn, ScopeRef::Platform(id))
                .id()
        });

        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE deleted = 0 AND (?1 IS NULL OR platform_id = ?1)
                 ORDER BY name"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![platform_id], map_project)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows.into_iter().filter(|p| self.visible(p)).collect())
    }

    async fn create(&self, new: NewProject) -> Result<Project> {
        let viewer = self.ctx.viewer();
        if !viewer.admin {
            return Err(TmError::PermissionDenied(
                "only administrators create projects".into(),
            ));
        }
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("project name is empty".into()));
        }

        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Projects);
        let platform_id = new
            .platform_id
            .map(|id| self.ctx.translate_scope(&conn, ScopeRef::Platform(id)).id());
        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO {table}
                    (name, description, platform_id, owner_id, restricted, deleted,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)"
            ),
            params![new.name, new.description, platform_id, viewer.user_id, new.restricted, now],
        )
        .map_err(map_sqlite)?;
        let id = conn.last_insert_rowid();
        self.ctx.log_change(
            &conn,
            "project",
            id,
            "add",
            None,
            Some(&serde_json::to_string(&new)?),
        )?;
        drop(conn);
        debug!(id, "created project");
        self.get(id).await
    }

    async fn update(&self, id: EntityId, patch: ProjectPatch) -> Result<Project> {
        let current = self.get(id).await?;
        if !self.ctx.viewer().can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "project {id} belongs to another owner"
            )));
        }
        if patch.is_empty() {
            return Ok(current);
        }

        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Projects);
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.or(current.description);
        let platform_id = patch.platform_id.or(current.platform_id);
        let restricted = patch.restricted.unwrap_or(current.restricted);
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET name = ?1, description = ?2, platform_id = ?3, restricted = ?4,
                     updated_at = ?5
                 WHERE id = ?6"
            ),
            params![name, description, platform_id, restricted, Utc::now(), id],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "project", id, "edit", None, None)?;
        drop(conn);
        self.get(id).await
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let current = self.get(id).await?;
        if !self.ctx.viewer().can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "project {id} belongs to another owner"
            )));
        }

        let conn = self.ctx.conn()?;
        let projects = self.ctx.table(Table::Projects);
        let folders = self.ctx.table(Table::Folders);
        let assignments = self.ctx.table(Table::Assignments);
        let trash = self.ctx.table(Table::TrashEntries);
        let now = Utc::now();

        conn.execute(
            &format!("UPDATE {projects} SET deleted = 1, updated_at = ?1 WHERE id = ?2"),
            params![now, id],
        )
        .map_err(map_sqlite)?;
        conn.execute(
            &format!(
                "UPDATE {assignments} SET active = 0, updated_at = ?1
                 WHERE project_id = ?2
                    OR folder_id IN (SELECT id FROM {folders} WHERE project_id = ?2)"
            ),
            params![now, id],
        )
        .map_err(map_sqlite)?;
        conn.execute(
            &format!(
                "INSERT INTO {trash} (kind, entity_id, deleted_by, deleted_at, restore_payload)
                 VALUES ('project', ?1, ?2, ?3, ?4)"
            ),
            params![
                id,
                self.ctx.viewer().user_id,
                now,
                serde_json::json!({ "project_id": id }).to_string()
            ],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "project", id, "delete", None, None)?;
        debug!(id, "trashed project");
        Ok(())
    }
}

pub(crate) struct SqliteFolderRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqliteFolderRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }

    fn sibling_exists(
        &self,
        conn: &rusqlite::Connection,
        project_id: EntityId,
        parent_id: Option<EntityId>,
        name: &str,
        exclude: Option<EntityId>,
    ) -> Result<bool> {
        let table = self.ctx.table(Table::Folders);
        let count: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {table}
                     WHERE project_id = ?1 AND parent_id IS ?2 AND name = ?3
                       AND deleted = 0 AND (?4 IS NULL OR id != ?4)"
                ),
                params![project_id, parent_id, name, exclude],
                |row| row.get(0),
            )
            .map_err(map_sqlite)?;
        Ok(count > 0)
    }
}

#[async_trait]
impl FolderRepository for SqliteFolderRepository {
    async fn get(&self, id: EntityId) -> Result<Folder> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Folders);
        conn.query_row(
            &format!("SELECT * FROM {table} WHERE id = ?1 AND deleted = 0"),
            [id],
            map_folder,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => TmError::not_found("folder", id),
            other => map_sqlite(other),
        })
    }

    async fn list_children(
        &self,
        project_id: EntityId,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Folder>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Folders);
        let project_id = self
            .ctx
            .translate_scope(&conn, ScopeRef::Project(project_id))
            .id();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE project_id = ?1 AND parent_id IS ?2 AND deleted = 0
                 ORDER BY name"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![project_id, parent_id], map_folder)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn create(&self, new: NewFolder) -> Result<Folder> {
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("folder name is empty".into()));
        }
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Folders);
        let project_id = self
            .ctx
            .translate_scope(&conn, ScopeRef::Project(new.project_id))
            .id();

        if let Some(parent_id) = new.parent_id {
            let parent_project: EntityId = conn
                .query_row(
                    &format!("SELECT project_id FROM {table} WHERE id = ?1 AND deleted = 0"),
                    [parent_id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        TmError::not_found("parent folder", parent_id)
                    }
                    other => map_sqlite(other),
                })?;
            if parent_project != project_id {
                return Err(TmError::Conflict(
                    "parent folder belongs to a different project".into(),
                ));
            }
        }
        if self.sibling_exists(&conn, project_id, new.parent_id, &new.name, None)? {
            return Err(TmError::Conflict(format!(
                "folder '{}' already exists here",
                new.name
            )));
        }

        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO {table}
                    (name, project_id, parent_id, deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)"
            ),
            params![new.name, project_id, new.parent_id, now],
        )
        .map_err(map_sqlite)?;
        let id = conn.last_insert_rowid();
        self.ctx.log_change(&conn, "folder", id, "add", None, None)?;
        drop(conn);
        self.get(id).await
    }

    async fn rename(&self, id: EntityId, name: &str) -> Result<Folder> {
        if name.trim().is_empty() {
            return Err(TmError::ValidationFailed("folder name is empty".into()));
        }
        let current = self.get(id).await?;
        let conn = self.ctx.conn()?;
        if self.sibling_exists(&conn, current.project_id, current.parent_id, name, Some(id))? {
            return Err(TmError::Conflict(format!(
                "folder '{name}' already exists here"
            )));
        }
        let table = self.ctx.table(Table::Folders);
        conn.execute(
            &format!("UPDATE {table} SET name = ?1, updated_at = ?2 WHERE id = ?3"),
            params![name, Utc::now(), id],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "folder", id, "edit", None, None)?;
        drop(conn);
        self.get(id).await
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let _current = self.get(id).await?;
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Folders);
        let assignments = self.ctx.table(Table::Assignments);
        let trash = self.ctx.table(Table::TrashEntries);
        let now = Utc::now();
        conn.execute(
            &format!("UPDATE {table} SET deleted = 1, updated_at = ?1 WHERE id = ?2"),
            params![now, id],
        )
        .map_err(map_sqlite)?;
        conn.execute(
            &format!("UPDATE {assignments} SET active = 0, updated_at = ?1 WHERE folder_id = ?2"),
            params![now, id],
        )
        .map_err(map_sqlite)?;
        conn.execute(
            &format!(
                "INSERT INTO {trash} (kind, entity_id, deleted_by, deleted_at, restore_payload)
                 VALUES ('folder', ?1, ?2, ?3, ?4)"
            ),
            params![
                id,
                self.ctx.viewer().user_id,
                now,
                serde_json::json!({ "folder_id": id }).to_string()
            ],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "folder", id, "delete", None, None)?;
        Ok(())
    }

    async fn ancestors(&self, id: EntityId) -> Result<Vec<Folder>> {
        let mut chain = Vec::new();
        let mut visited: HashSet<EntityId> = HashSet::new();
        let mut cursor = Some(id);

        while let Some(folder_id) = cursor {
            if !visited.insert(folder_id) {
                return Err(TmError::Conflict(format!(
                    "folder parent chain of {id} contains a cycle"
                )));
            }
            match self.get(folder_id).await {
                Ok(folder) => {
                    cursor = folder.parent_id;
                    chain.push(folder);
                }
                // A missing ancestor terminates the chain
                Err(TmError::NotFound(_)) if folder_id != id => break,
                Err(e) => return Err(e),
            }
        }
        Ok(chain)
    }
}
