//! SQLite repositories for files and rows

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use tracing::debug;

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;
use lingomem_core::repository::{FileRepository, RowRepository};
use lingomem_core::types::{
    FileFormat, FilePatch, FileRow, NewFileRow, NewProjectFile, Pagination, ProjectFile, RowFilter,
    RowPage, RowPatch, RowState, ScopeRef, SyncState,
};

use crate::sqlite::resolver::Table;
use crate::sqlite::{map_sqlite, SqliteCtx};

fn map_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectFile> {
    let format: String = row.get("format")?;
    let sync_state: String = row.get("sync_state")?;
    Ok(ProjectFile {
        id: row.get("id")?,
        name: row.get("name")?,
        original_name: row.get("original_name")?,
        format: FileFormat::parse(&format).unwrap_or(FileFormat::Txt),
        row_count: row.get("row_count")?,
        source_lang: row.get("source_lang")?,
        target_lang: row.get("target_lang")?,
        project_id: row.get("project_id")?,
        folder_id: row.get("folder_id")?,
        sync_state: SyncState::parse(&sync_state).unwrap_or(SyncState::Synced),
        extra: row.get("extra")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRow> {
    let state: String = row.get("state")?;
    Ok(FileRow {
        id: row.get("id")?,
        file_id: row.get("file_id")?,
        row_number: row.get("row_number")?,
        string_id: row.get("string_id")?,
        source: row.get("source")?,
        target: row.get("target")?,
        memo: row.get("memo")?,
        state: RowState::parse(&state).unwrap_or(RowState::Normal),
        extra: row.get("extra")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) struct SqliteFileRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqliteFileRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn get(&self, id: EntityId) -> Result<ProjectFile> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Files);
        conn.query_row(
            &format!("SELECT * FROM {table} WHERE id = ?1 AND deleted = 0"),
            [id],
            map_file,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => TmError::not_found("file", id),
            other => map_sqlite(other),
        })
    }

    async fn list(
        &self,
        project_id: EntityId,
        folder_id: Option<EntityId>,
    ) -> Result<Vec<ProjectFile>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Files);
        let project_id = self
            .ctx
            .translate_scope(&conn, ScopeRef::Project(project_id))
            .id();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE project_id = ?1 AND deleted = 0
                   AND (?2 IS NULL OR folder_id IS ?2)
                 ORDER BY name"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![project_id, folder_id], map_file)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn create_with_rows(
        &self,
        new: NewProjectFile,
        rows: Vec<NewFileRow>,
    ) -> Result<ProjectFile> {
        if new.name.trim().is_empty() {
            return Err(TmError::ValidationFailed("file name is empty".into()));
        }

        let file_id = {
        let mut conn = self.ctx.conn()?;
        let files = self.ctx.table(Table::Files);
        let rows_table = self.ctx.table(Table::Rows);
        let project_id = self
            .ctx
            .translate_scope(&conn, ScopeRef::Project(new.project_id))
            .id();
        let now = Utc::now();
        let sync_state = new.sync_state.unwrap_or(SyncState::Synced);
        let row_count = i64::try_from(rows.len()).unwrap_or(i64::MAX);

        let tx = conn.transaction().map_err(map_sqlite)?;
        tx.execute(
            &format!(
                "INSERT INTO {files}
                    (name, original_name, format, row_count, source_lang, target_lang,
                     project_id, folder_id, sync_state, extra, deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)"
            ),
            params![
                new.name,
                new.original_name,
                new.format.as_str(),
                row_count,
                new.source_lang,
                new.target_lang,
                project_id,
                new.folder_id,
                sync_state.as_str(),
                new.extra,
                now
            ],
        )
        .map_err(map_sqlite)?;
        let file_id = tx.last_insert_rowid();

        {
            let mut insert = tx
                .prepare(&format!(
                    "INSERT INTO {rows_table}
                        (file_id, row_number, string_id, source, target, memo, state, extra,
                         created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'normal', ?7, ?8, ?8)"
                ))
                .map_err(map_sqlite)?;
            for row in &rows {
                insert
                    .execute(params![
                        file_id,
                        row.row_number,
                        row.string_id,
                        row.source,
                        row.target,
                        row.memo,
                        row.extra,
                        now
                    ])
                    .map_err(map_sqlite)?;
            }
        }
        tx.commit().map_err(map_sqlite)?;

        self.ctx.log_change(&conn, "file", file_id, "add", None, None)?;
        file_id
        };
        debug!(file_id, rows = rows.len(), "ingested file");
        self.get(file_id).await
    }

    async fn update(&self, id: EntityId, patch: FilePatch) -> Result<ProjectFile> {
        let current = self.get(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Files);
        let name = patch.name.unwrap_or(current.name);
        let folder_id = patch.folder_id.or(current.folder_id);
        let sync_state = patch.sync_state.unwrap_or(current.sync_state);
        let extra = patch.extra.unwrap_or(current.extra);
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET name = ?1, folder_id = ?2, sync_state = ?3, extra = ?4, updated_at = ?5
                 WHERE id = ?6"
            ),
            params![name, folder_id, sync_state.as_str(), extra, Utc::now(), id],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "file", id, "edit", None, None)?;
        drop(conn);
        self.get(id).await
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let _current = self.get(id).await?;
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Files);
        let trash = self.ctx.table(Table::TrashEntries);
        let now = Utc::now();
        conn.execute(
            &format!("UPDATE {table} SET deleted = 1, updated_at = ?1 WHERE id = ?2"),
            params![now, id],
        )
        .map_err(map_sqlite)?;
        conn.execute(
            &format!(
                "INSERT INTO {trash} (kind, entity_id, deleted_by, deleted_at, restore_payload)
                 VALUES ('file', ?1, ?2, ?3, ?4)"
            ),
            params![
                id,
                self.ctx.viewer().user_id,
                now,
                serde_json::json!({ "file_id": id }).to_string()
            ],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "file", id, "delete", None, None)?;
        debug!(id, "trashed file");
        Ok(())
    }
}

pub(crate) struct SqliteRowRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqliteRowRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RowRepository for SqliteRowRepository {
    async fn get(&self, id: EntityId) -> Result<FileRow> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Rows);
        conn.query_row(&format!("SELECT * FROM {table} WHERE id = ?1"), [id], map_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => TmError::not_found("row", id),
                other => map_sqlite(other),
            })
    }

    async fn get_for_file(
        &self,
        file_id: EntityId,
        page: Pagination,
        filter: Option<&RowFilter>,
    ) -> Result<RowPage> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Rows);

        let state = filter.and_then(|f| f.state).map(RowState::as_str);
        let search = filter
            .and_then(|f| f.search.as_deref())
            .map(|s| format!("%{s}%"));

        let clause = format!(
            "FROM {table}
             WHERE file_id = ?1
               AND (?2 IS NULL OR state = ?2)
               AND (?3 IS NULL OR source LIKE ?3 OR target LIKE ?3)"
        );

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) {clause}"),
                params![file_id, state, search],
                |row| row.get(0),
            )
            .map_err(map_sqlite)?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT * {clause} ORDER BY row_number LIMIT ?4 OFFSET ?5"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(
                params![
                    file_id,
                    state,
                    search,
                    i64::try_from(page.limit).unwrap_or(i64::MAX),
                    i64::try_from(page.offset).unwrap_or(0)
                ],
                map_row,
            )
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;

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
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Rows);
        let target = patch.target.or(current.target);
        let memo = patch.memo.or(current.memo);
        let state = patch.state.unwrap_or(current.state);
        let extra = patch.extra.unwrap_or(current.extra);
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET target = ?1, memo = ?2, state = ?3, extra = ?4, updated_at = ?5
                 WHERE id = ?6"
            ),
            params![target, memo, state.as_str(), extra, Utc::now(), id],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "row", id, "edit", None, None)?;
        drop(conn);
        self.get(id).await
    }
}
