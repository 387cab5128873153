//! ABOUTME: Scope identity bridge for the "Offline Storage" shadow scope
//!
//! The reserved "Offline Storage" platform and its default project must be
//! addressable from both backends: assignments carry the authoritative
//! surrogate ids, while locally created content lives under fixed negative
//! sentinels. The authoritative pair is auto-created on first use; its ids
//! are recorded in the local `sync_meta` table so local repositories can
//! translate them to the sentinels when traversing parent/child relations.

use tracing::{debug, info};

use lingomem_core::error::Result;
use lingomem_core::ids::{
    EntityId, OFFLINE_PLATFORM_LOCAL_ID, OFFLINE_PROJECT_LOCAL_ID, OFFLINE_STORAGE_NAME,
};

use crate::postgres::{map_pg, PostgresBackend};
use crate::sqlite::{SqliteBackend, META_OFFLINE_PLATFORM_REMOTE, META_OFFLINE_PROJECT_REMOTE};

/// The authoritative and local identities of the offline scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineScopeIds {
    pub platform_id: EntityId,
    pub project_id: EntityId,
}

/// Local sentinel identities, fixed by the schema migrations
#[must_use]
pub const fn local_sentinels() -> OfflineScopeIds {
    OfflineScopeIds {
        platform_id: OFFLINE_PLATFORM_LOCAL_ID,
        project_id: OFFLINE_PROJECT_LOCAL_ID,
    }
}

/// Ensure the authoritative `(platform, project)` pair exists and return
/// its surrogate ids
///
/// Idempotent: looks the pair up by the well-known name first and only
/// inserts what is missing.
///
/// # Errors
///
/// Propagates backend errors.
pub async fn ensure_authoritative(backend: &PostgresBackend) -> Result<OfflineScopeIds> {
    let client = backend.client().await?;

    let platform_id: EntityId = match client
        .query_opt(
            "SELECT id FROM platforms WHERE name = $1",
            &[&OFFLINE_STORAGE_NAME],
        )
        .await
        .map_err(|e| map_pg(&e))?
    {
        Some(row) => row.try_get(0).map_err(|e| map_pg(&e))?,
        None => {
            let row = client
                .query_one(
                    "INSERT INTO platforms (name, description, owner_id, restricted)
                     VALUES ($1, 'Reserved scope for locally created content', 0, FALSE)
                     RETURNING id",
                    &[&OFFLINE_STORAGE_NAME],
                )
                .await
                .map_err(|e| map_pg(&e))?;
            info!("created authoritative offline platform");
            row.try_get(0).map_err(|e| map_pg(&e))?
        }
    };

    let project_id: EntityId = match client
        .query_opt(
            "SELECT id FROM projects WHERE name = $1 AND platform_id = $2",
            &[&OFFLINE_STORAGE_NAME, &platform_id],
        )
        .await
        .map_err(|e| map_pg(&e))?
    {
        Some(row) => row.try_get(0).map_err(|e| map_pg(&e))?,
        None => {
            let row = client
                .query_one(
                    "INSERT INTO projects (name, description, platform_id, owner_id, restricted)
                     VALUES ($1, 'Default project for locally created content', $2, 0, FALSE)
                     RETURNING id",
                    &[&OFFLINE_STORAGE_NAME, &platform_id],
                )
                .await
                .map_err(|e| map_pg(&e))?;
            info!("created authoritative offline project");
            row.try_get(0).map_err(|e| map_pg(&e))?
        }
    };

    Ok(OfflineScopeIds {
        platform_id,
        project_id,
    })
}

/// Record the authoritative offline-scope ids in the local store so its
/// repositories can translate them to the sentinels
///
/// # Errors
///
/// Propagates backend errors.
pub fn record_remote_ids(local: &SqliteBackend, ids: OfflineScopeIds) -> Result<()> {
    for (key, value) in [
        (META_OFFLINE_PLATFORM_REMOTE, ids.platform_id),
        (META_OFFLINE_PROJECT_REMOTE, ids.project_id),
    ] {
        local.set_sync_meta(key, &value.to_string())?;
    }
    debug!(
        platform = ids.platform_id,
        project = ids.project_id,
        "recorded authoritative offline scope ids"
    );
    Ok(())
}
