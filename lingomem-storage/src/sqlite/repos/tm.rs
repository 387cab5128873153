//! SQLite repositories for translation memories and entries

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use sha2::{Digest, Sha256};
use tracing::debug;

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;
use lingomem_core::repository::{TmEntryRepository, TmRepository};
use lingomem_core::types::{
    MatchingMode, NewTm, NewTmEntry, TmEntry, TmEntryPatch, TmFilter, TmPatch, TmStatus,
    TranslationMemory,
};

use crate::sqlite::resolver::Table;
use crate::sqlite::{map_sqlite, SqliteCtx};

fn source_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn map_tm(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranslationMemory> {
    let status: String = row.get("status")?;
    let mode: String = row.get("matching_mode")?;
    Ok(TranslationMemory {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        source_lang: row.get("source_lang")?,
        target_lang: row.get("target_lang")?,
        entry_count: row.get("entry_count")?,
        status: TmStatus::parse(&status).unwrap_or(TmStatus::Pending),
        matching_mode: MatchingMode::parse(&mode).unwrap_or(MatchingMode::Standard),
        owner_id: row.get("owner_id")?,
        indexed_at: row.get("indexed_at")?,
        error_reason: row.get("error_reason")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<TmEntry> {
    Ok(TmEntry {
        id: row.get("id")?,
        tm_id: row.get("tm_id")?,
        source: row.get("source")?,
        target: row.get("target")?,
        source_hash: row.get("source_hash")?,
        string_id: row.get("string_id")?,
        confirmed: row.get("confirmed")?,
        confirmed_by: row.get("confirmed_by")?,
        created_by: row.get("created_by")?,
        deleted_at: row.get("deleted_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) struct SqliteTmRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqliteTmRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TmRepository for SqliteTmRepository {
    async fn get(&self, id: EntityId) -> Result<TranslationMemory> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Tms);
        conn.query_row(&format!("SELECT * FROM {table} WHERE id = ?1"), [id], map_tm)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    TmError::not_found("translation memory", id)
                }
                other => map_sqlite(other),
            })
    }

    async fn list(&self, filter: &TmFilter) -> Result<Vec<TranslationMemory>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Tms);
        let pattern = filter.name_contains.as_deref().map(|s| format!("%{s}%"));
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE (?1 IS NULL OR owner_id = ?1)
                   AND (?2 IS NULL OR name LIKE ?2)
                 ORDER BY name"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![filter.owner_id, pattern], map_tm)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
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

        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Tms);
        let mode = new.matching_mode.unwrap_or(MatchingMode::Standard);
        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO {table}
                    (name, description, source_lang, target_lang, entry_count, status,
                     matching_mode, owner_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 'pending', ?5, ?6, ?7, ?7)"
            ),
            params![
                new.name,
                new.description,
                new.source_lang,
                new.target_lang,
                mode.as_str(),
                self.ctx.viewer().user_id,
                now
            ],
        )
        .map_err(map_sqlite)?;
        let id = conn.last_insert_rowid();
        self.ctx.log_change(&conn, "tm", id, "add", None, None)?;
        drop(conn);
        debug!(id, "created TM");
        self.get(id).await
    }

    async fn update(&self, id: EntityId, patch: TmPatch) -> Result<TranslationMemory> {
        let current = self.get(id).await?;
        if !self.ctx.viewer().can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "TM {id} belongs to another owner"
            )));
        }
        if patch.is_empty() {
            return Ok(current);
        }
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Tms);
        let name = patch.name.unwrap_or(current.name);
        let description = patch.description.or(current.description);
        let mode = patch.matching_mode.unwrap_or(current.matching_mode);
        // A rename or mode flip never touches indexed_at: artifacts stay valid
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET name = ?1, description = ?2, matching_mode = ?3, updated_at = ?4
                 WHERE id = ?5"
            ),
            params![name, description, mode.as_str(), Utc::now(), id],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "tm", id, "edit", None, None)?;
        drop(conn);
        self.get(id).await
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        let current = self.get(id).await?;
        if !self.ctx.viewer().can_modify(current.owner_id) {
            return Err(TmError::PermissionDenied(format!(
                "TM {id} belongs to another owner"
            )));
        }
        let conn = self.ctx.conn()?;
        let tms = self.ctx.table(Table::Tms);
        let entries = self.ctx.table(Table::TmEntries);
        let assignments = self.ctx.table(Table::Assignments);
        conn.execute(&format!("DELETE FROM {assignments} WHERE tm_id = ?1"), [id])
            .map_err(map_sqlite)?;
        conn.execute(&format!("DELETE FROM {entries} WHERE tm_id = ?1"), [id])
            .map_err(map_sqlite)?;
        conn.execute(&format!("DELETE FROM {tms} WHERE id = ?1"), [id])
            .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "tm", id, "delete", None, None)?;
        debug!(id, "deleted TM with entries and assignments");
        Ok(())
    }

    async fn set_status(
        &self,
        id: EntityId,
        status: TmStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Tms);
        let affected = conn
            .execute(
                &format!("UPDATE {table} SET status = ?1, error_reason = ?2 WHERE id = ?3"),
                params![status.as_str(), reason, id],
            )
            .map_err(map_sqlite)?;
        if affected == 0 {
            return Err(TmError::not_found("translation memory", id));
        }
        Ok(())
    }

    async fn mark_indexed(&self, id: EntityId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::Tms);
        let affected = conn
            .execute(
                &format!(
                    "UPDATE {table}
                     SET status = 'ready', indexed_at = ?1, error_reason = NULL
                     WHERE id = ?2"
                ),
                params![at, id],
            )
            .map_err(map_sqlite)?;
        if affected == 0 {
            return Err(TmError::not_found("translation memory", id));
        }
        Ok(())
    }

    async fn list_stale(&self) -> Result<Vec<TranslationMemory>> {
        let tms = self.list(&TmFilter::default()).await?;
        let conn = self.ctx.conn()?;
        let entries = self.ctx.table(Table::TmEntries);

        let mut stale = Vec::new();
        for tm in tms {
            let latest: Option<DateTime<Utc>> = conn
                .query_row(
                    &format!("SELECT MAX(updated_at) FROM {entries} WHERE tm_id = ?1"),
                    [tm.id],
                    |row| row.get(0),
                )
                .map_err(map_sqlite)?;
            if tm.is_stale(latest) {
                stale.push(tm);
            }
        }
        Ok(stale)
    }

    async fn recount_entries(&self) -> Result<u64> {
        let conn = self.ctx.conn()?;
        let tms = self.ctx.table(Table::Tms);
        let entries = self.ctx.table(Table::TmEntries);
        let corrected = conn
            .execute(
                &format!(
                    "UPDATE {tms}
                     SET entry_count = (
                         SELECT COUNT(*) FROM {entries} e
                         WHERE e.tm_id = {tms}.id AND e.deleted_at IS NULL
                     )
                     WHERE entry_count != (
                         SELECT COUNT(*) FROM {entries} e
                         WHERE e.tm_id = {tms}.id AND e.deleted_at IS NULL
                     )"
                ),
                [],
            )
            .map_err(map_sqlite)?;
        if corrected > 0 {
            debug!(corrected, "entry count audit corrected cached counts");
        }
        Ok(corrected as u64)
    }
}

pub(crate) struct SqliteTmEntryRepository {
    ctx: Arc<SqliteCtx>,
}

impl SqliteTmEntryRepository {
    pub(crate) const fn new(ctx: Arc<SqliteCtx>) -> Self {
        Self { ctx }
    }

    fn touch_tm(&self, conn: &rusqlite::Connection, tm_id: EntityId) -> Result<()> {
        let tms = self.ctx.table(Table::Tms);
        conn.execute(
            &format!("UPDATE {tms} SET updated_at = ?1 WHERE id = ?2"),
            params![Utc::now(), tm_id],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }
}

#[async_trait]
impl TmEntryRepository for SqliteTmEntryRepository {
    async fn get(&self, id: EntityId) -> Result<TmEntry> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        conn.query_row(&format!("SELECT * FROM {table} WHERE id = ?1"), [id], map_entry)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => TmError::not_found("TM entry", id),
                other => map_sqlite(other),
            })
    }

    async fn get_all(&self, tm_id: EntityId) -> Result<Vec<TmEntry>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE tm_id = ?1 AND deleted_at IS NULL
                 ORDER BY id"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([tm_id], map_entry)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn bulk_add(&self, tm_id: EntityId, entries: Vec<NewTmEntry>) -> Result<u64> {
        let tms = self.ctx.table(Table::Tms);
        let table = self.ctx.table(Table::TmEntries);
        let mut conn = self.ctx.conn()?;
        let now = Utc::now();
        let viewer_id = self.ctx.viewer().user_id;
        let count = entries.len() as u64;

        let tx = conn.transaction().map_err(map_sqlite)?;
        // Fail fast when the TM is gone
        let exists: i64 = tx
            .query_row(&format!("SELECT COUNT(*) FROM {tms} WHERE id = ?1"), [tm_id], |r| {
                r.get(0)
            })
            .map_err(map_sqlite)?;
        if exists == 0 {
            return Err(TmError::not_found("translation memory", tm_id));
        }

        {
            let mut insert = tx
                .prepare(&format!(
                    "INSERT INTO {table}
                        (tm_id, source, target, source_hash, string_id, confirmed,
                         confirmed_by, created_by, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"
                ))
                .map_err(map_sqlite)?;
            for entry in &entries {
                let confirmed_by = entry.confirmed.then_some(viewer_id);
                insert
                    .execute(params![
                        tm_id,
                        entry.source,
                        entry.target,
                        source_hash(&entry.source),
                        entry.string_id,
                        entry.confirmed,
                        confirmed_by,
                        viewer_id,
                        now
                    ])
                    .map_err(map_sqlite)?;
            }
        }
        tx.execute(
            &format!(
                "UPDATE {tms} SET entry_count = entry_count + ?1, updated_at = ?2 WHERE id = ?3"
            ),
            params![count as i64, now, tm_id],
        )
        .map_err(map_sqlite)?;
        tx.commit().map_err(map_sqlite)?;

        self.ctx.log_change(&conn, "tm_entries", tm_id, "add", None, None)?;
        debug!(tm_id, count, "bulk-added TM entries");
        Ok(count)
    }

    async fn update(&self, id: EntityId, patch: TmEntryPatch) -> Result<TmEntry> {
        let current = self.get(id).await?;
        if current.is_deleted() {
            return Err(TmError::Conflict(format!("TM entry {id} is deleted")));
        }
        if patch.is_empty() {
            return Ok(current);
        }

        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        let source = patch.source.unwrap_or(current.source);
        let hash = source_hash(&source);
        let target = patch.target.unwrap_or(current.target);
        let string_id = patch.string_id.or(current.string_id);
        let confirmed = patch.confirmed.unwrap_or(current.confirmed);
        let confirmed_by = if confirmed {
            current
                .confirmed_by
                .or(Some(self.ctx.viewer().user_id))
        } else {
            None
        };
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET source = ?1, target = ?2, source_hash = ?3, string_id = ?4,
                     confirmed = ?5, confirmed_by = ?6, updated_at = ?7
                 WHERE id = ?8"
            ),
            params![source, target, hash, string_id, confirmed, confirmed_by, Utc::now(), id],
        )
        .map_err(map_sqlite)?;
        self.touch_tm(&conn, current.tm_id)?;
        self.ctx.log_change(&conn, "tm_entry", id, "edit", None, None)?;
        drop(conn);
        self.get(id).await
    }

    async fn delete(&self, tm_id: EntityId, entry_ids: &[EntityId]) -> Result<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        let tms = self.ctx.table(Table::Tms);
        let now = Utc::now();

        let placeholders = entry_ids
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} SET deleted_at = ?1, updated_at = ?1
             WHERE tm_id = ?2 AND deleted_at IS NULL AND id IN ({placeholders})"
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now), Box::new(tm_id)];
        for id in entry_ids {
            params.push(Box::new(*id));
        }
        let affected = conn
            .execute(&sql, rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())))
            .map_err(map_sqlite)?;

        conn.execute(
            &format!(
                "UPDATE {tms} SET entry_count = entry_count - ?1, updated_at = ?2 WHERE id = ?3"
            ),
            params![affected as i64, now, tm_id],
        )
        .map_err(map_sqlite)?;
        self.ctx.log_change(&conn, "tm_entries", tm_id, "delete", None, None)?;
        debug!(tm_id, affected, "tombstoned TM entries");
        Ok(affected as u64)
    }

    async fn search_hash(&self, tm_id: EntityId, hash: &str) -> Result<Vec<TmEntry>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE tm_id = ?1 AND source_hash = ?2 AND deleted_at IS NULL
                 ORDER BY updated_at DESC, id"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![tm_id, hash], map_entry)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn search_stringid(&self, tm_id: EntityId, string_id: &str) -> Result<Vec<TmEntry>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM {table}
                 WHERE tm_id = ?1 AND string_id = ?2 AND deleted_at IS NULL
                 ORDER BY updated_at DESC, id"
            ))
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![tm_id, string_id], map_entry)
            .map_err(map_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    async fn count(&self, tm_id: EntityId) -> Result<i64> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE tm_id = ?1 AND deleted_at IS NULL"),
            [tm_id],
            |row| row.get(0),
        )
        .map_err(map_sqlite)
    }

    async fn latest_updated_at(&self, tm_id: EntityId) -> Result<Option<DateTime<Utc>>> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        conn.query_row(
            &format!("SELECT MAX(updated_at) FROM {table} WHERE tm_id = ?1"),
            [tm_id],
            |row| row.get(0),
        )
        .map_err(map_sqlite)
    }

    async fn tombstone_ratio(&self, tm_id: EntityId) -> Result<f64> {
        let conn = self.ctx.conn()?;
        let table = self.ctx.table(Table::TmEntries);
        let (total, deleted): (i64, i64) = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*), COUNT(deleted_at) FROM {table} WHERE tm_id = ?1"
                ),
                [tm_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(map_sqlite)?;
        if total == 0 {
            return Ok(0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(deleted as f64 / total as f64)
    }
}
