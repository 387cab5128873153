//! Concrete PostgreSQL repositories
//!
//! Same contracts, same semantics as the embedded backend; only the engine
//! differs. Queries address the authoritative naming scheme directly, so no
//! table resolver is involved here.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio_postgres::Row;
use tracing::{debug, warn};

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::{EntityId, OFFLINE_PLATFORM_LOCAL_ID, OFFLINE_STORAGE_NAME};
use lingomem_core::repository::{
    AssignmentRepository, FileRepository, FolderRepository, PlatformRepository, ProjectRepository,
    RowRepository, SimilaritySearch, TmEntryRepository, TmRepository, TrashRepository,
};
use lingomem_core::types::{
    Assignment, FileFormat, FilePatch, FileRow, Folder, MatchingMode, NewAssignment, NewFileRow,
    NewFolder, NewPlatform, NewProject, NewProjectFile, NewTm, NewTmEntry, Pagination, Platform,
    PlatformFilter, PlatformPatch, Project, ProjectFile, ProjectPatch, RowFilter, RowPage,
    RowPatch, RowState, ScopeRef, SyncState, TmEntry, TmEntryPatch, TmFilter, TmPatch, TmStatus,
    TranslationMemory, TrashEntry, TrashedKind,
};
use lingomem_core::viewer::Viewer;

use super::{map_pg, PostgresBackend};

pub(crate) struct PgCtx {
    pub(crate) backend: PostgresBackend,
    pub(crate) viewer: Viewer,
}

impl PgCtx {
    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.backend.client().await
    }
}

fn source_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn map_platform(row: &Row) -> std::result::Result<Platform, tokio_postgres::Error> {
    Ok(Platform {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        owner_id: row.try_get("owner_id")?,
        restricted: row.try_get("restricted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_project(row: &Row) -> std::result::Result<Project, tokio_postgres::Error> {
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        platform_id: row.try_get("platform_id")?,
        owner_id: row.try_get("owner_id")?,
        restricted: row.try_get("restricted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_folder(row: &Row) -> std::result::Result<Folder, tokio_postgres::Error> {
    Ok(Folder {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        project_id: row.try_get("project_id")?,
        parent_id: row.try_get("parent_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_file(row: &Row) -> std::result::Result<ProjectFile, tokio_postgres::Error> {
    let format: String = row.try_get("format")?;
    let sync_state: String = row.try_get("sync_state")?;
    Ok(ProjectFile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        original_name: row.try_get("original_name")?,
        format: FileFormat::parse(&format).unwrap_or(FileFormat::Txt),
        row_count: row.try_get("row_count")?,
        source_lang: row.try_get("source_lang")?,
        target_lang: row.try_get("target_lang")?,
        project_id: row.try_get("project_id")?,
        folder_id: row.try_get("folder_id")?,
        sync_state: SyncState::parse(&sync_state).unwrap_or(SyncState::Synced),
        extra: row.try_get("extra")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_row(row: &Row) -> std::result::Result<FileRow, tokio_postgres::Error> {
    let state: String = row.try_get("state")?;
    Ok(FileRow {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        row_number: row.try_get("row_number")?,
        string_id: row.try_get("string_id")?,
        source: row.try_get("source")?,
        target: row.try_get("target")?,
        memo: row.try_get("memo")?,
        state: RowState::parse(&state).unwrap_or(RowState::Normal),
        extra: row.try_get("extra")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_tm(row: &Row) -> std::result::Result<TranslationMemory, tokio_postgres::Error> {
    let status: String = row.try_get("status")?;
    let mode: String = row.try_get("matching_mode")?;
    Ok(TranslationMemory {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        source_lang: row.try_get("source_lang")?,
        target_lang: row.try_get("target_lang")?,
        entry_count: row.try_get("entry_count")?,
        status: TmStatus::parse(&status).unwrap_or(TmStatus::Pending),
        matching_mode: MatchingMode::parse(&mode).unwrap_or(MatchingMode::Standard),
        owner_id: row.try_get("owner_id")?,
        indexed_at: row.try_get("indexed_at")?,
        error_reason: row.try_get("error_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_entry(row: &Row) -> std::result::Result<TmEntry, tokio_postgres::Error> {
    Ok(TmEntry {
        id: row.try_get("id")?,
        tm_id: row.try_get("tm_id")?,
        source: row.try_get("source")?,
        target: row.try_get("target")?,
        source_hash: row.try_get("source_hash")?,
        string_id: row.try_get("string_id")?,
        confirmed: row.try_get("confirmed")?,
        confirmed_by: row.try_get("confirmed_by")?,
        created_by: row.try_get("created_by")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_assignment(row: &Row) -> Result<Assignment> {
    let platform_id: Option<EntityId> = row.try_get("platform_id").map_err(|e| map_pg(&e))?;
    let project_id: Option<EntityId> = row.try_get("project_id").map_err(|e| map_pg(&e))?;
    let folder_id: Option<EntityId> = row.try_get("folder_id").map_err(|e| map_pg(&e))?;
    let scope = match (platform_id, project_id, folder_id) {
        (Some(id), None, None) => ScopeRef::Platform(id),
        (None, Some(id), None) => ScopeRef::Project(id),
        (None, None, Some(id)) => ScopeRef::Folder(id),
        _ => {
            return Err(TmError::Internal(
                "assignment scope columns violate the one-target invariant".into(),
            ))
        }
    };
    Ok(Assignment {
        id: row.try_get("id").map_err(|e| map_pg(&e))?,
        tm_id: row.try_get("tm_id").map_err(|e| map_pg(&e))?,
        scope,
        active: row.try_get("active").map_err(|e| map_pg(&e))?,
        priority: row.try_get("priority").map_err(|e| map_pg(&e))?,
        assigned_by: row.try_get("assigned_by").map_err(|e| map_pg(&e))?,
        assigned_at: row.try_get("assigned_at").map_err(|e| map_pg(&e))?,
        updated_at: row.try_get("updated_at").map_err(|e| map_pg(&e))?,
    })
}

fn map_trash(row: &Row) -> Result<TrashEntry> {
    let kind: String = row.try_get("kind").map_err(|e| map_pg(&e))?;
    Ok(TrashEntry {
        id: row.try_get("id").map_err(|e| map_pg(&e))?,
        kind: TrashedKind::parse(&kind).unwrap_or(TrashedKind::File),
        entity_id: row.try_get("entity_id").map_err(|e| map_pg(&e))?,
        deleted_by: row.try_get("deleted_by").map_err(|e| map_pg(&e))?,
        deleted_at: row.try_get("deleted_at").map_err(|e| map_pg(&e))?,
        restore_payload: row.try_get("restore_payload").map_err(|e| map_pg(&e))?,
    })
}

const fn scope_columns(scope: ScopeRef) -> (Option<EntityId>, Option<EntityId>, Option<EntityId>) {
    match scope {
        ScopeRef::Platform(id) => (Some(id), None, None),
        ScopeRef::Project(id) => (None, Some(id), None),
        ScopeRef::Folder(id) => (None, None, Some(id)),
    }
}

pub(crate) struct PgPlatformRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

impl PgPlatformRepository {
    fn visible(&self, platform: &Platform) -> bool {
        let viewer = &self.ctx.viewer;
        !platform.restricted || viewer.admin || viewer.user_id == platform.owner_id
    }
}

#[async_trait]
impl PlatformRepository for PgPlatformRepository {
    async fn get(&self, id: EntityId) -> Result<Platform> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt("SELECT * FROM platforms WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("platform", id))?;
        let platform = map_platform(&row).map_err(|e| map_pg(&e))?;
        if !self.visible(&platform) {
            return Err(TmError::PermissionDenied(format!(
                "platform {id} is restricted"
            )));
        }
        Ok(platform)
    }

    async fn list(&self, filter: &PlatformFilter) -> Result<Vec<Platform>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query("SELECT * FROM platforms ORDER BY name", &[])
            .await
            .map_err(|e| map_pg(&e))?;
        let viewer = &self.ctx.viewer;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let platform = map_platform(row).map_err(|e| map_pg(&e))?;
            if !self.visible(&platform) {
                continue;
            }
            if platform.name == OFFLINE_STORAGE_NAME {
                if filter.hide_shadowed && platform.id != OFFLINE_PLATFORM_LOCAL_ID {
                    continue;
                }
                if !viewer.admin && viewer.user_id != platform.owner_id {
                    continue;
                }
            }
            out.push(platform);
        }
        Ok(out)
    }

    async fn create(&self, new: NewPlatform) -> Result<Platform> {
        let viewer = &self.ctx.viewer;
        if !viewer.admin {
            return Err(TmError::PermissionDenied(
                "only administrators create platforms".into(),
            ));
        }
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("platform name is empty".into()));
        }
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "INSERT INTO platforms (name, description, owner_id, restricted)
                 VALUES ($1, $2, $3, $4) RETURNING *",
                &[&new.name, &new.description, &viewer.user_id, &new.restricted],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_platform(&row).map_err(|e| map_pg(&e))
    }

    async fn update(&self, id: EntityId, patch: PlatformPatch) -> Result<Platform> {
        let current = self.get(id).await?;
        if !self.ctx.viewer.can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "platform {id} belongs to another owner"
            )));
        }
        if patch.is_empty() {
            return Ok(current);
        }
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.or(current.description);
        let restricted = patch.restricted.unwrap_or(current.restricted);
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "UPDATE platforms
                 SET name = $1, description = $2, restricted = $3, updated_at = now()
                 WHERE id = $4 RETURNING *",
                &[&name, &description, &restricted, &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_platform(&row).map_err(|e| map_pg(&e))
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let current = self.get(id).await?;
        if !self.ctx.viewer.can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "platform {id} belongs to another owner"
            )));
        }
        let client = self.ctx.client().await?;
        client
            .execute(
                "UPDATE assignments SET active = FALSE, updated_at = now()
                 WHERE platform_id = $1",
                &[&id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        client
            .execute("DELETE FROM platforms WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_pg(&e))?;
        Ok(())
    }
}

pub(crate) struct PgProjectRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

impl PgProjectRepository {
    fn visible(&self, project: &Project) -> bool {
        let viewer = &self.ctx.viewer;
        !project.restricted || viewer.admin || viewer.user_id == project.owner_id
    }
}

#[async_trait]
impl ProjectRepository for PgProjectRepository {
    async fn get(&self, id: EntityId) -> Result<Project> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt(
                "SELECT * FROM projects WHERE id = $1 AND NOT deleted",
                &[&id],
            )
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("project", id))?;
        let project = map_project(&row).map_err(|e| map_pg(&e))?;
        if !self.visible(&project) {
            return Err(TmError::PermissionDenied(format!(
                "project {id} is restricted"
            )));
        }
        Ok(project)
    }

    async fn list(&self, platform_id: Option<EntityId>) -> Result<Vec<Project>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query(
                "SELECT * FROM projects
                 WHERE NOT deleted AND ($1::bigint IS NULL OR platform_id = $1)
                 ORDER BY name",
                &[&platform_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let project = map_project(row).map_err(|e| map_pg(&e))?;
            if self.visible(&project) {
                out.push(project);
            }
        }
        Ok(out)
    }

    async fn create(&self, new: NewProject) -> Result<Project> {
        let viewer = &self.ctx.viewer;
        if !viewer.admin {
            return Err(TmError::PermissionDenied(
                "only administrators create projects".into(),
            ));
        }
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("project name is empty".into()));
        }
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "INSERT INTO projects (name, description, platform_id, owner_id, restricted)
                 VALUES ($1, $2, $3, $4, $5) RETURNING *",
                &[
                    &new.name,
                    &new.description,
                    &new.platform_id,
                    &viewer.user_id,
                    &new.restricted,
                ],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_project(&row).map_err(|e| map_pg(&e))
    }

    async fn update(&self, id: EntityId, patch: ProjectPatch) -> Result<Project> {
        let current = self.get(id).await?;
        if !self.ctx.viewer.can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "project {id} belongs to another owner"
            )));
        }
        if patch.is_empty() {
            return Ok(current);
        }
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.or(current.description);
        let platform_id = patch.platform_id.or(current.platform_id);
        let restricted = patch.restricted.unwrap_or(current.restricted);
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "UPDATE projects
                 SET name = $1, description = $2, platform_id = $3, restricted = $4,
                     updated_at = now()
                 WHERE id = $5 RETURNING *",
                &[&name, &description, &platform_id, &restricted, &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_project(&row).map_err(|e| map_pg(&e))
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let current = self.get(id).await?;
        if !self.ctx.viewer.can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "project {id} belongs to another owner"
            )));
        }
        let client = self.ctx.client().await?;
        client
            .execute(
                "UPDATE projects SET deleted = TRUE, updated_at = now() WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        client
            .execute(
                "UPDATE assignments SET active = FALSE, updated_at = now()
                 WHERE project_id = $1
                    OR folder_id IN (SELECT id FROM folders WHERE project_id = $1)",
                &[&id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        client
            .execute(
                "INSERT INTO trash_entries (kind, entity_id, deleted_by, restore_payload)
                 VALUES ('project', $1, $2, $3)",
                &[
                    &id,
                    &self.ctx.viewer.user_id,
                    &serde_json::json!({ "project_id": id }),
                ],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        Ok(())
    }
}

pub(crate) struct PgFolderRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

#[async_trait]
impl FolderRepository for PgFolderRepository {
    async fn get(&self, id: EntityId) -> Result<Folder> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt("SELECT * FROM folders WHERE id = $1 AND NOT deleted", &[&id])
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("folder", id))?;
        map_folder(&row).map_err(|e| map_pg(&e))
    }

    async fn list_children(
        &self,
        project_id: EntityId,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Folder>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query(
                "SELECT * FROM folders
                 WHERE project_id = $1 AND parent_id IS NOT DISTINCT FROM $2 AND NOT deleted
                 ORDER BY name",
                &[&project_id, &parent_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter()
            .map(|row| map_folder(row).map_err(|e| map_pg(&e)))
            .collect()
    }

    async fn create(&self, new: NewFolder) -> Result<Folder> {
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("folder name is empty".into()));
        }
        let client = self.ctx.client().await?;
        if let Some(parent_id) = new.parent_id {
            let parent = client
                .query_opt(
                    "SELECT project_id FROM folders WHERE id = $1 AND NOT deleted",
                    &[&parent_id],
                )
                .await
                .map_err(|e| map_pg(&e))?
                .ok_or_else(|| TmError::not_found("parent folder", parent_id))?;
            let parent_project: EntityId = parent.try_get(0).map_err(|e| map_pg(&e))?;
            if parent_project != new.project_id {
                return Err(TmError::Conflict(
                    "parent folder belongs to a different project".into(),
                ));
            }
        }
        let duplicates: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM folders
                 WHERE project_id = $1 AND parent_id IS NOT DISTINCT FROM $2
                   AND name = $3 AND NOT deleted",
                &[&new.project_id, &new.parent_id, &new.name],
            )
            .await
            .map_err(|e| map_pg(&e))?
            .try_get(0)
            .map_err(|e| map_pg(&e))?;
        if duplicates > 0 {
            return Err(TmError::Conflict(format!(
                "folder '{}' already exists here",
                new.name
            )));
        }
        let row = client
            .query_one(
                "INSERT INTO folders (name, project_id, parent_id)
                 VALUES ($1, $2, $3) RETURNING *",
                &[&new.name, &new.project_id, &new.parent_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_folder(&row).map_err(|e| map_pg(&e))
    }

    async fn rename(&self, id: EntityId, name: &str) -> Result<Folder> {
        if name.trim().is_empty() {
            return Err(TmError::ValidationFailed("folder name is empty".into()));
        }
        let current = self.get(id).await?;
        let client = self.ctx.client().await?;
        let duplicates: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM folders
                 WHERE project_id = $1 AND parent_id IS NOT DISTINCT FROM $2
                   AND name = $3 AND NOT deleted AND id != $4",
                &[&current.project_id, &current.parent_id, &name.to_string(), &id],
            )
            .await
            .map_err(|e| map_pg(&e))?
            .try_get(0)
            .map_err(|e| map_pg(&e))?;
        if duplicates > 0 {
            return Err(TmError::Conflict(format!(
                "folder '{name}' already exists here"
            )));
        }
        let row = client
            .query_one(
                "UPDATE folders SET name = $1, updated_at = now() WHERE id = $2 RETURNING *",
                &[&name.to_string(), &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_folder(&row).map_err(|e| map_pg(&e))
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let _current = self.get(id).await?;
        let client = self.ctx.client().await?;
        client
            .execute(
                "UPDATE folders SET deleted = TRUE, updated_at = now() WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        client
            .execute(
                "UPDATE assignments SET active = FALSE, updated_at = now() WHERE folder_id = $1",
                &[&id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        client
            .execute(
                "INSERT INTO trash_entries (kind, entity_id, deleted_by, restore_payload)
                 VALUES ('folder', $1, $2, $3)",
                &[
                    &id,
                    &self.ctx.viewer.user_id,
                    &serde_json::json!({ "folder_id": id }),
                ],
            )
            .await
            .map_err(|e| map_pg(&e))?;
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
                Err(TmError::NotFound(_)) if folder_id != id => break,
                Err(e) => return Err(e),
            }
        }
        Ok(chain)
    }
}

pub(crate) struct PgFileRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

#[async_trait]
impl FileRepository for PgFileRepository {
    async fn get(&self, id: EntityId) -> Result<ProjectFile> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt("SELECT * FROM files WHERE id = $1 AND NOT deleted", &[&id])
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("file", id))?;
        map_file(&row).map_err(|e| map_pg(&e))
    }

    async fn list(
        &self,
        project_id: EntityId,
        folder_id: Option<EntityId>,
    ) -> Result<Vec<ProjectFile>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query(
                "SELECT * FROM files
                 WHERE project_id = $1 AND NOT deleted
                   AND ($2::bigint IS NULL OR folder_id IS NOT DISTINCT FROM $2)
                 ORDER BY name",
                &[&project_id, &folder_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter()
            .map(|row| map_file(row).map_err(|e| map_pg(&e)))
            .collect()
    }

    async fn create_with_rows(
        &self,
        new: NewProjectFile,
        rows: Vec<NewFileRow>,
    ) -> Result<ProjectFile> {
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("file name is empty".into()));
        }
        let mut client = self.ctx.client().await?;
        let tx = client.transaction().await.map_err(|e| map_pg(&e))?;
        let sync_state = new.sync_state.unwrap_or(SyncState::Synced);
        let row_count = i64::try_from(rows.len()).unwrap_or(i64::MAX);

        let file_row = tx
            .query_one(
                "INSERT INTO files
                    (name, original_name, format, row_count, source_lang, target_lang,
                     project_id, folder_id, sync_state, extra)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
                &[
                    &new.name,
                    &new.original_name,
                    &new.format.as_str().to_string(),
                    &row_count,
                    &new.source_lang,
                    &new.target_lang,
                    &new.project_id,
                    &new.folder_id,
                    &sync_state.as_str().to_string(),
                    &new.extra,
                ],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        let file = map_file(&file_row).map_err(|e| map_pg(&e))?;

        let insert = tx
            .prepare(
                "INSERT INTO rows (file_id, row_number, string_id, source, target, memo, extra)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .await
            .map_err(|e| map_pg(&e))?;
        for row in &rows {
            tx.execute(
                &insert,
                &[
                    &file.id,
                    &row.row_number,
                    &row.string_id,
                    &row.source,
                    &row.target,
                    &row.memo,
                    &row.extra,
                ],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        }
        tx.commit().await.map_err(|e| map_pg(&e))?;
        debug!(file_id = file.id, rows = rows.len(), "ingested file");
        Ok(file)
    }

    async fn update(&self, id: EntityId, patch: FilePatch) -> Result<ProjectFile> {
        let current = self.get(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }
        let name = patch.name.unwrap_or(current.name);
        let folder_id = patch.folder_id.or(current.folder_id);
        let sync_state = patch.sync_state.unwrap_or(current.sync_state);
        let extra = patch.extra.unwrap_or(current.extra);
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "UPDATE files
                 SET name = $1, folder_id = $2, sync_state = $3, extra = $4, updated_at = now()
                 WHERE id = $5 RETURNING *",
                &[&name, &folder_id, &sync_state.as_str().to_string(), &extra, &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_file(&row).map_err(|e| map_pg(&e))
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let _current = self.get(id).await?;
        let client = self.ctx.client().await?;
        client
            .execute(
                "UPDATE files SET deleted = TRUE, updated_at = now() WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        client
            .execute(
                "INSERT INTO trash_entries (kind, entity_id, deleted_by, restore_payload)
                 VALUES ('file', $1, $2, $3)",
                &[&id, &self.ctx.viewer.user_id, &serde_json::json!({ "file_id": id })],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        Ok(())
    }
}

pub(crate) struct PgRowRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

#[async_trait]
impl RowRepository for PgRowRepository {
    async fn get(&self, id: EntityId) -> Result<FileRow> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt("SELECT * FROM rows WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("row", id))?;
        map_row(&row).map_err(|e| map_pg(&e))
    }

    async fn get_for_file(
        &self,
        file_id: EntityId,
        page: Pagination,
        filter: Option<&RowFilter>,
    ) -> Result<RowPage> {
        let client = self.ctx.client().await?;
        let state = filter
            .and_then(|f| f.state)
            .map(|s| s.as_str().to_string());
        let search = filter
            .and_then(|f| f.search.as_deref())
            .map(|s| format!("%{s}%"));

        let total: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM rows
                 WHERE file_id = $1
                   AND ($2::text IS NULL OR state = $2)
                   AND ($3::text IS NULL OR source LIKE $3 OR target LIKE $3)",
                &[&file_id, &state, &search],
            )
            .await
            .map_err(|e| map_pg(&e))?
            .try_get(0)
            .map_err(|e| map_pg(&e))?;

        let limit = i64::try_from(page.limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(page.offset).unwrap_or(0);
        let rows = client
            .query(
                "SELECT * FROM rows
                 WHERE file_id = $1
                   AND ($2::text IS NULL OR state = $2)
                   AND ($3::text IS NULL OR source LIKE $3 OR target LIKE $3)
                 ORDER BY row_number LIMIT $4 OFFSET $5",
                &[&file_id, &state, &search, &limit, &offset],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        let rows = rows
            .iter()
            .map(|row| map_row(row).map_err(|e| map_pg(&e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(RowPage {
            rows,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    async fn update(&self, id: EntityId, patch: RowPatch) -> Result<FileRow> {
        let current = self.get(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }
        let target = patch.target.or(current.target);
        let memo = patch.memo.or(current.memo);
        let state = patch.state.unwrap_or(current.state);
        let extra = patch.extra.unwrap_or(current.extra);
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "UPDATE rows
                 SET target = $1, memo = $2, state = $3, extra = $4, updated_at = now()
                 WHERE id = $5 RETURNING *",
                &[&target, &memo, &state.as_str().to_string(), &extra, &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_row(&row).map_err(|e| map_pg(&e))
    }
}

pub(crate) struct PgTmRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

#[async_trait]
impl TmRepository for PgTmRepository {
    async fn get(&self, id: EntityId) -> Result<TranslationMemory> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt("SELECT * FROM tms WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("translation memory", id))?;
        map_tm(&row).map_err(|e| map_pg(&e))
    }

    async fn list(&self, filter: &TmFilter) -> Result<Vec<TranslationMemory>> {
        let client = self.ctx.client().await?;
        let pattern = filter.name_contains.as_deref().map(|s| format!("%{s}%"));
        let rows = client
            .query(
                "SELECT * FROM tms
                 WHERE ($1::bigint IS NULL OR owner_id = $1)
                   AND ($2::text IS NULL OR name LIKE $2)
                 ORDER BY name",
                &[&filter.owner_id, &pattern],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter()
            .map(|row| map_tm(row).map_err(|e| map_pg(&e)))
            .collect()
    }

    async fn create(&self, new: NewTm) -> Result<TranslationMemory> {
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("TM name is empty".into()));
        }
        if new.source_lang.trim().is_empty() || new.target_lang.trim().is_empty() {
            return Err(TmError::ValidationFailed(
                "TM source and target languages are required".into(),
            ));
        }
        let mode = new.matching_mode.unwrap_or(MatchingMode::Standard);
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "INSERT INTO tms
                    (name, description, source_lang, target_lang, matching_mode, owner_id)
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
                &[
                    &new.name,
                    &new.description,
                    &new.source_lang,
                    &new.target_lang,
                    &mode.as_str().to_string(),
                    &self.ctx.viewer.user_id,
                ],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_tm(&row).map_err(|e| map_pg(&e))
    }

    async fn update(&self, id: EntityId, patch: TmPatch) -> Result<TranslationMemory> {
        let current = self.get(id).await?;
        if !self.ctx.viewer.can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "TM {id} belongs to another owner"
            )));
        }
        if patch.is_empty() {
            return Ok(current);
        }
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.or(current.description);
        let mode = patch.matching_mode.unwrap_or(current.matching_mode);
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "UPDATE tms
                 SET name = $1, description = $2, matching_mode = $3, updated_at = now()
                 WHERE id = $4 RETURNING *",
                &[&name, &description, &mode.as_str().to_string(), &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_tm(&row).map_err(|e| map_pg(&e))
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let current = self.get(id).await?;
        if !self.ctx.viewer.can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "TM {id} belongs to another owner"
            )));
        }
        let client = self.ctx.client().await?;
        // Entries and assignments cascade through foreign keys
        client
            .execute("DELETE FROM tms WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_pg(&e))?;
        Ok(())
    }

    async fn set_status(
        &self,
        id: EntityId,
        status: TmStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let client = self.ctx.client().await?;
        let affected = client
            .execute(
                "UPDATE tms SET status = $1, error_reason = $2 WHERE id = $3",
                &[&status.as_str().to_string(), &reason, &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        if affected == 0 {
            return Err(TmError::not_found("translation memory", id));
        }
        Ok(())
    }

    async fn mark_indexed(&self, id: EntityId, at: DateTime<Utc>) -> Result<()> {
        let client = self.ctx.client().await?;
        let affected = client
            .execute(
                "UPDATE tms SET status = 'ready', indexed_at = $1, error_reason = NULL
                 WHERE id = $2",
                &[&at, &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        if affected == 0 {
            return Err(TmError::not_found("translation memory", id));
        }
        Ok(())
    }

    async fn list_stale(&self) -> Result<Vec<TranslationMemory>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query(
                "SELECT t.* FROM tms t
                 WHERE EXISTS (
                     SELECT 1 FROM tm_entries e
                     WHERE e.tm_id = t.id
                       AND (t.indexed_at IS NULL OR e.updated_at > t.indexed_at)
                 )",
                &[],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter()
            .map(|row| map_tm(row).map_err(|e| map_pg(&e)))
            .collect()
    }

    async fn recount_entries(&self) -> Result<u64> {
        let client = self.ctx.client().await?;
        let corrected = client
            .execute(
                "UPDATE tms SET entry_count = counted.n
                 FROM (
                     SELECT t.id, COUNT(e.id) FILTER (WHERE e.deleted_at IS NULL) AS n
                     FROM tms t LEFT JOIN tm_entries e ON e.tm_id = t.id
                     GROUP BY t.id
                 ) counted
                 WHERE tms.id = counted.id AND tms.entry_count != counted.n",
                &[],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        Ok(corrected)
    }
}

pub(crate) struct PgTmEntryRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

#[async_trait]
impl TmEntryRepository for PgTmEntryRepository {
    async fn get(&self, id: EntityId) -> Result<TmEntry> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt("SELECT * FROM tm_entries WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("TM entry", id))?;
        map_entry(&row).map_err(|e| map_pg(&e))
    }

    async fn get_all(&self, tm_id: EntityId) -> Result<Vec<TmEntry>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query(
                "SELECT * FROM tm_entries
                 WHERE tm_id = $1 AND deleted_at IS NULL ORDER BY id",
                &[&tm_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter()
            .map(|row| map_entry(row).map_err(|e| map_pg(&e)))
            .collect()
    }

    async fn bulk_add(&self, tm_id: EntityId, entries: Vec<NewTmEntry>) -> Result<u64> {
        let mut client = self.ctx.client().await?;
        let tx = client.transaction().await.map_err(|e| map_pg(&e))?;
        let exists = tx
            .query_opt("SELECT 1 FROM tms WHERE id = $1", &[&tm_id])
            .await
            .map_err(|e| map_pg(&e))?;
        if exists.is_none() {
            return Err(TmError::not_found("translation memory", tm_id));
        }

        let insert = tx
            .prepare(
                "INSERT INTO tm_entries
                    (tm_id, source, target, source_hash, string_id, confirmed,
                     confirmed_by, created_by)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .await
            .map_err(|e| map_pg(&e))?;
        let viewer_id = self.ctx.viewer.user_id;
        for entry in &entries {
            let confirmed_by = entry.confirmed.then_some(viewer_id);
            tx.execute(
                &insert,
                &[
                    &tm_id,
                    &entry.source,
                    &entry.target,
                    &source_hash(&entry.source),
                    &entry.string_id,
                    &entry.confirmed,
                    &confirmed_by,
                    &viewer_id,
                ],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        }
        let count = entries.len() as i64;
        tx.execute(
            "UPDATE tms SET entry_count = entry_count + $1, updated_at = now() WHERE id = $2",
            &[&count, &tm_id],
        )
        .await
        .map_err(|e| map_pg(&e))?;
        tx.commit().await.map_err(|e| map_pg(&e))?;
        debug!(tm_id, count, "bulk-added TM entries");
        Ok(entries.len() as u64)
    }

    async fn update(&self, id: EntityId, patch: TmEntryPatch) -> Result<TmEntry> {
        let current = self.get(id).await?;
        if current.is_deleted() {
            return Err(TmError::Conflict(format!("TM entry {id} is deleted")));
        }
        if patch.is_empty() {
            return Ok(current);
        }
        let source = patch.source.unwrap_or(current.source);
        let hash = source_hash(&source);
        let target = patch.target.unwrap_or(current.target);
        let string_id = patch.string_id.or(current.string_id);
        let confirmed = patch.confirmed.unwrap_or(current.confirmed);
        let confirmed_by = if confirmed {
            current.confirmed_by.or(Some(self.ctx.viewer.user_id))
        } else {
            None
        };
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "UPDATE tm_entries
                 SET source = $1, target = $2, source_hash = $3, string_id = $4,
                     confirmed = $5, confirmed_by = $6, updated_at = now()
                 WHERE id = $7 RETURNING *",
                &[&source, &target, &hash, &string_id, &confirmed, &confirmed_by, &id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        client
            .execute(
                "UPDATE tms SET updated_at = now() WHERE id = $1",
                &[&current.tm_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_entry(&row).map_err(|e| map_pg(&e))
    }

    async fn delete(&self, tm_id: EntityId, entry_ids: &[EntityId]) -> Result<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let client = self.ctx.client().await?;
        let ids: Vec<EntityId> = entry_ids.to_vec();
        let affected = client
            .execute(
                "UPDATE tm_entries SET deleted_at = now(), updated_at = now()
                 WHERE tm_id = $1 AND deleted_at IS NULL AND id = ANY($2)",
                &[&tm_id, &ids],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        client
            .execute(
                "UPDATE tms SET entry_count = entry_count - $1, updated_at = now()
                 WHERE id = $2",
                &[&(affected as i64), &tm_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        Ok(affected)
    }

    async fn search_hash(&self, tm_id: EntityId, hash: &str) -> Result<Vec<TmEntry>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query(
                "SELECT * FROM tm_entries
                 WHERE tm_id = $1 AND source_hash = $2 AND deleted_at IS NULL
                 ORDER BY updated_at DESC, id",
                &[&tm_id, &hash.to_string()],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter()
            .map(|row| map_entry(row).map_err(|e| map_pg(&e)))
            .collect()
    }

    async fn search_stringid(&self, tm_id: EntityId, string_id: &str) -> Result<Vec<TmEntry>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query(
                "SELECT * FROM tm_entries
                 WHERE tm_id = $1 AND string_id = $2 AND deleted_at IS NULL
                 ORDER BY updated_at DESC, id",
                &[&tm_id, &string_id.to_string()],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter()
            .map(|row| map_entry(row).map_err(|e| map_pg(&e)))
            .collect()
    }

    async fn count(&self, tm_id: EntityId) -> Result<i64> {
        let client = self.ctx.client().await?;
        client
            .query_one(
                "SELECT COUNT(*) FROM tm_entries WHERE tm_id = $1 AND deleted_at IS NULL",
                &[&tm_id],
            )
            .await
            .map_err(|e| map_pg(&e))?
            .try_get(0)
            .map_err(|e| map_pg(&e))
    }

    async fn latest_updated_at(&self, tm_id: EntityId) -> Result<Option<DateTime<Utc>>> {
        let client = self.ctx.client().await?;
        client
            .query_one(
                "SELECT MAX(updated_at) FROM tm_entries WHERE tm_id = $1",
                &[&tm_id],
            )
            .await
            .map_err(|e| map_pg(&e))?
            .try_get(0)
            .map_err(|e| map_pg(&e))
    }

    async fn tombstone_ratio(&self, tm_id: EntityId) -> Result<f64> {
        let client = self.ctx.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*), COUNT(deleted_at) FROM tm_entries WHERE tm_id = $1",
                &[&tm_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        let total: i64 = row.try_get(0).map_err(|e| map_pg(&e))?;
        let deleted: i64 = row.try_get(1).map_err(|e| map_pg(&e))?;
        if total == 0 {
            return Ok(0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(deleted as f64 / total as f64)
    }
}

pub(crate) struct PgAssignmentRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

#[async_trait]
impl AssignmentRepository for PgAssignmentRepository {
    async fn get(&self, id: EntityId) -> Result<Assignment> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt("SELECT * FROM assignments WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("assignment", id))?;
        map_assignment(&row)
    }

    async fn create(&self, new: NewAssignment) -> Result<Assignment> {
        let client = self.ctx.client().await?;
        let (platform_id, project_id, folder_id) = scope_columns(new.scope);
        let duplicate: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM assignments
                 WHERE tm_id = $1 AND active
                   AND platform_id IS NOT DISTINCT FROM $2
                   AND project_id IS NOT DISTINCT FROM $3
                   AND folder_id IS NOT DISTINCT FROM $4",
                &[&new.tm_id, &platform_id, &project_id, &folder_id],
            )
            .await
            .map_err(|e| map_pg(&e))?
            .try_get(0)
            .map_err(|e| map_pg(&e))?;
        if duplicate > 0 {
            return Err(TmError::Conflict(format!(
                "TM {} is already assigned at {}",
                new.tm_id, new.scope
            )));
        }
        let row = client
            .query_one(
                "INSERT INTO assignments
                    (tm_id, platform_id, project_id, folder_id, priority, assigned_by)
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
                &[
                    &new.tm_id,
                    &platform_id,
                    &project_id,
                    &folder_id,
                    &new.priority,
                    &self.ctx.viewer.user_id,
                ],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        map_assignment(&row)
    }

    async fn revoke(&self, id: EntityId) -> Result<()> {
        let client = self.ctx.client().await?;
        let affected = client
            .execute(
                "UPDATE assignments SET active = FALSE, updated_at = now() WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        if affected == 0 {
            return Err(TmError::not_found("assignment", id));
        }
        Ok(())
    }

    async fn list_for_scope(&self, scope: ScopeRef) -> Result<Vec<Assignment>> {
        let client = self.ctx.client().await?;
        let (platform_id, project_id, folder_id) = scope_columns(scope);
        let rows = client
            .query(
                "SELECT * FROM assignments
                 WHERE active
                   AND platform_id IS NOT DISTINCT FROM $1
                   AND project_id IS NOT DISTINCT FROM $2
                   AND folder_id IS NOT DISTINCT FROM $3
                 ORDER BY priority ASC, assigned_at DESC, id ASC",
                &[&platform_id, &project_id, &folder_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter().map(map_assignment).collect()
    }

    async fn list_for_tm(&self, tm_id: EntityId) -> Result<Vec<Assignment>> {
        let client = self.ctx.client().await?;
        let rows = client
            .query(
                "SELECT * FROM assignments WHERE tm_id = $1 ORDER BY assigned_at DESC",
                &[&tm_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter().map(map_assignment).collect()
    }

    async fn delete_for_tm(&self, tm_id: EntityId) -> Result<u64> {
        let client = self.ctx.client().await?;
        client
            .execute("DELETE FROM assignments WHERE tm_id = $1", &[&tm_id])
            .await
            .map_err(|e| map_pg(&e))
    }

    async fn set_active_for_scope(&self, scope: ScopeRef, active: bool) -> Result<u64> {
        let client = self.ctx.client().await?;
        let (platform_id, project_id, folder_id) = scope_columns(scope);
        client
            .execute(
                "UPDATE assignments SET active = $1, updated_at = now()
                 WHERE platform_id IS NOT DISTINCT FROM $2
                   AND project_id IS NOT DISTINCT FROM $3
                   AND folder_id IS NOT DISTINCT FROM $4",
                &[&active, &platform_id, &project_id, &folder_id],
            )
            .await
            .map_err(|e| map_pg(&e))
    }
}

pub(crate) struct PgTrashRepository {
    pub(crate) ctx: Arc<PgCtx>,
}

#[async_trait]
impl TrashRepository for PgTrashRepository {
    async fn list(&self) -> Result<Vec<TrashEntry>> {
        let client = self.ctx.client().await?;
        let viewer = &self.ctx.viewer;
        let deleted_by = if viewer.admin {
            None
        } else {
            Some(viewer.user_id)
        };
        let rows = client
            .query(
                "SELECT * FROM trash_entries
                 WHERE ($1::bigint IS NULL OR deleted_by = $1)
                 ORDER BY deleted_at DESC",
                &[&deleted_by],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        rows.iter().map(map_trash).collect()
    }

    async fn restore(&self, trash_id: EntityId) -> Result<()> {
        let client = self.ctx.client().await?;
        let row = client
            .query_opt("SELECT * FROM trash_entries WHERE id = $1", &[&trash_id])
            .await
            .map_err(|e| map_pg(&e))?
            .ok_or_else(|| TmError::not_found("trash entry", trash_id))?;
        let entry = map_trash(&row)?;

        let (table, scope) = match entry.kind {
            TrashedKind::Project => ("projects", Some(ScopeRef::Project(entry.entity_id))),
            TrashedKind::Folder => ("folders", Some(ScopeRef::Folder(entry.entity_id))),
            TrashedKind::File => ("files", None),
        };
        let affected = client
            .execute(
                &format!("UPDATE {table} SET deleted = FALSE, updated_at = now() WHERE id = $1"),
                &[&entry.entity_id],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        if affected == 0 {
            return Err(TmError::NotFound(format!(
                "{} {} no longer exists",
                entry.kind.as_str(),
                entry.entity_id
            )));
        }
        if let Some(scope) = scope {
            let (platform_id, project_id, folder_id) = scope_columns(scope);
            client
                .execute(
                    "UPDATE assignments SET active = TRUE, updated_at = now()
                     WHERE platform_id IS NOT DISTINCT FROM $1
                       AND project_id IS NOT DISTINCT FROM $2
                       AND folder_id IS NOT DISTINCT FROM $3",
                    &[&platform_id, &project_id, &folder_id],
                )
                .await
                .map_err(|e| map_pg(&e))?;
        }
        client
            .execute("DELETE FROM trash_entries WHERE id = $1", &[&trash_id])
            .await
            .map_err(|e| map_pg(&e))?;
        Ok(())
    }

    async fn purge_older_than(&self, days: u32) -> Result<u64> {
        let client = self.ctx.client().await?;
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let rows = client
            .query(
                "SELECT * FROM trash_entries WHERE deleted_at < $1",
                &[&cutoff],
            )
            .await
            .map_err(|e| map_pg(&e))?;

        let mut purged = 0u64;
        for row in &rows {
            let entry = map_trash(row)?;
            let sql = match entry.kind {
                TrashedKind::Project => "DELETE FROM projects WHERE id = $1",
                TrashedKind::Folder => "DELETE FROM folders WHERE id = $1",
                TrashedKind::File => "DELETE FROM files WHERE id = $1",
            };
            if let Err(e) = client.execute(sql, &[&entry.entity_id]).await {
                warn!(trash_id = entry.id, "purge failed, keeping trash entry: {e}");
                continue;
            }
            client
                .execute("DELETE FROM trash_entries WHERE id = $1", &[&entry.id])
                .await
                .map_err(|e| map_pg(&e))?;
            purged += 1;
        }
        Ok(purged)
    }
}

/// pg_trgm similarity over entry sources; the capability only the
/// authoritative backend offers
pub(crate) struct PgSimilaritySearch {
    pub(crate) ctx: Arc<PgCtx>,
}

#[async_trait]
impl SimilaritySearch for PgSimilaritySearch {
    async fn search_similar(
        &self,
        tm_id: EntityId,
        text: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<(TmEntry, f32)>> {
        let client = self.ctx.client().await?;
        let limit = i64::try_from(limit).unwrap_or(10);
        let rows = client
            .query(
                "SELECT *, similarity(source, $2) AS sim FROM tm_entries
                 WHERE tm_id = $1 AND deleted_at IS NULL AND similarity(source, $2) >= $3
                 ORDER BY sim DESC, updated_at DESC, id ASC
                 LIMIT $4",
                &[&tm_id, &text.to_string(), &threshold, &limit],
            )
            .await
            .map_err(|e| map_pg(&e))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = map_entry(row).map_err(|e| map_pg(&e))?;
            let sim: f32 = row.try_get("sim").map_err(|e| map_pg(&e))?;
            out.push((entry, sim));
        }
        Ok(out)
    }
}
