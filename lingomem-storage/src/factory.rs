//! ABOUTME: Per-request repository factory with backend mode detection
//!
//! Routes never construct a backend connection themselves: they ask the
//! factory for a repository set, and the factory decides the mode from the
//! viewer's credential, the configured override, and authoritative-store
//! reachability. `backend_unavailable` triggers at most one failover to the
//! degraded mode per request, when policy allows.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use lingomem_core::config::{BackendOverride, CoreConfig};
use lingomem_core::error::{Result, TmError};
use lingomem_core::repository::RepositorySet;
use lingomem_core::viewer::Viewer;

use crate::bridge;
use crate::postgres::PostgresBackend;
use crate::sqlite::resolver::SchemaMode;
use crate::sqlite::{SqliteBackend, SqliteRepositorySet};

/// Chooses a concrete repository set per request
pub struct RepositoryFactory {
    config: CoreConfig,
    /// Authoritative backend, re-attempted lazily after a failed connect
    postgres: Mutex<Option<PostgresBackend>>,
    degraded: SqliteBackend,
    local: SqliteBackend,
}

impl RepositoryFactory {
    /// Open the embedded stores and, when configured, the authoritative one
    ///
    /// A failed authoritative connect is not fatal here: detection retries
    /// per request and the degraded store answers in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` when an embedded store cannot be opened.
    pub async fn new(config: CoreConfig) -> Result<Self> {
        let degraded = SqliteBackend::open(&config.sqlite_path, SchemaMode::Authoritative)?;
        let local = SqliteBackend::open(&config.offline_sqlite_path, SchemaMode::Local)?;

        let postgres = if let Some(url) = &config.postgres_url {
            match PostgresBackend::connect(url).await {
                Ok(backend) => {
                    Self::bootstrap_bridge(&backend, &local).await;
                    Some(backend)
                }
                Err(e) => {
                    warn!("authoritative store unreachable at startup: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            postgres: Mutex::new(postgres),
            degraded,
            local,
        })
    }

    /// In-memory factory without an authoritative store, for tests
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` when the pools cannot be built.
    pub fn in_memory(config: CoreConfig) -> Result<Self> {
        Ok(Self {
            config,
            postgres: Mutex::new(None),
            degraded: SqliteBackend::in_memory(SchemaMode::Authoritative)?,
            local: SqliteBackend::in_memory(SchemaMode::Local)?,
        })
    }

    async fn bootstrap_bridge(backend: &PostgresBackend, local: &SqliteBackend) {
        match bridge::ensure_authoritative(backend).await {
            Ok(ids) => {
                if let Err(e) = bridge::record_remote_ids(local, ids) {
                    warn!("failed to record offline scope ids locally: {e}");
                }
            }
            Err(e) => warn!("failed to ensure offline scope: {e}"),
        }
    }

    /// Attempt to (re)connect the authoritative backend
    async fn authoritative(&self) -> Result<PostgresBackend> {
        let connected = self.postgres.lock().clone();
        if let Some(backend) = connected {
            backend.ping().await?;
            return Ok(backend);
        }
        let url = self
            .config
            .postgres_url
            .as_deref()
            .ok_or_else(|| TmError::BackendUnavailable("no authoritative store configured".into()))?;
        let backend = PostgresBackend::connect(url).await?;
        Self::bootstrap_bridge(&backend, &self.local).await;
        *self.postgres.lock() = Some(backend.clone());
        Ok(backend)
    }

    /// Resolve the repository set for one request
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` when neither the requested nor the
    /// fallback backend can serve the request.
    pub async fn repositories_for(&self, viewer: Viewer) -> Result<Arc<dyn RepositorySet>> {
        if viewer.is_offline() {
            debug!(user = viewer.user_id, "offline credential, local shadow mode");
            return Ok(Arc::new(SqliteRepositorySet::new(
                self.local.clone(),
                viewer,
            )));
        }

        match self.config.backend_mode {
            BackendOverride::Embedded => {
                debug!(user = viewer.user_id, "configured override: embedded");
                Ok(Arc::new(SqliteRepositorySet::new(
                    self.degraded.clone(),
                    viewer,
                )))
            }
            BackendOverride::Authoritative => {
                let backend = self.authoritative().await?;
                Ok(Arc::new(backend.repositories(viewer)))
            }
            BackendOverride::Auto => match self.authoritative().await {
                Ok(backend) => Ok(Arc::new(backend.repositories(viewer))),
                Err(e) if e.is_backend_unavailable() && self.config.degraded_fallback => {
                    info!("authoritative store unavailable, serving degraded mode: {e}");
                    Ok(Arc::new(SqliteRepositorySet::new(
                        self.degraded.clone(),
                        viewer,
                    )))
                }
                Err(e) => Err(e),
            },
        }
    }

    /// The local shadow backend, for sync collaborators
    #[must_use]
    pub const fn local_backend(&self) -> &SqliteBackend {
        &self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingomem_core::repository::BackendMode;

    fn test_config() -> CoreConfig {
        CoreConfig {
            postgres_url: None,
            ..CoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_offline_credential_selects_local() {
        let factory = RepositoryFactory::in_memory(test_config()).unwrap();
        let repos = factory
            .repositories_for(Viewer::offline(7))
            .await
            .unwrap();
        assert_eq!(repos.mode(), BackendMode::Local);
    }

    #[tokio::test]
    async fn test_auto_without_postgres_falls_back_to_degraded() {
        let factory = RepositoryFactory::in_memory(test_config()).unwrap();
        let repos = factory
            .repositories_for(Viewer::new(7, "token"))
            .await
            .unwrap();
        assert_eq!(repos.mode(), BackendMode::Degraded);
    }

    #[tokio::test]
    async fn test_auto_without_fallback_fails() {
        let config = CoreConfig {
            degraded_fallback: false,
            ..test_config()
        };
        let factory = RepositoryFactory::in_memory(config).unwrap();
        let err = factory
            .repositories_for(Viewer::new(7, "token"))
            .await
            .unwrap_err();
        assert!(err.is_backend_unavailable());
    }

    #[tokio::test]
    async fn test_embedded_override() {
        let config = CoreConfig {
            backend_mode: BackendOverride::Embedded,
            ..test_config()
        };
        let factory = RepositoryFactory::in_memory(config).unwrap();
        let repos = factory
            .repositories_for(Viewer::new(7, "token"))
            .await
            .unwrap();
        assert_eq!(repos.mode(), BackendMode::Degraded);
        assert!(repos.similarity().is_none());
    }
}
