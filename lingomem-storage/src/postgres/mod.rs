//! ABOUTME: Authoritative PostgreSQL backend
//!
//! The networked relational store. Schema lives in embedded `refinery`
//! migrations; connections come from a bounded `deadpool` pool with FIFO
//! waiters. This is the only backend that implements the trigram
//! similarity capability (pg_trgm).

mod repos;
mod set;

pub use set::PostgresRepositorySet;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use lingomem_core::error::{Result, TmError};
use lingomem_core::viewer::Viewer;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Pooled authoritative store
#[derive(Clone)]
pub struct PostgresBackend {
    pool: Pool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend").finish()
    }
}

impl PostgresBackend {
    /// Connect, run pending migrations, and build the pool
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` when the server cannot be reached and
    /// `Internal` when a migration fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| TmError::ValidationFailed(format!("invalid postgres url: {e}")))?;

        // Migrations run on a dedicated connection before the pool opens
        let (mut client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| TmError::BackendUnavailable(format!("postgres connect: {e}")))?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("postgres migration connection closed: {e}");
            }
        });
        embedded::migrations::runner()
            .run_async(&mut client)
            .await
            .map_err(|e| TmError::Internal(format!("postgres migration: {e}")))?;
        drop(client);
        driver.abort();

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(16)
            .build()
            .map_err(|e| TmError::BackendUnavailable(format!("postgres pool: {e}")))?;

        info!("authoritative store ready");
        Ok(Self { pool })
    }

    /// Cheap reachability probe used by the factory's mode detection
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` when the probe fails.
    pub async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| TmError::BackendUnavailable(format!("postgres ping: {e}")))?;
        Ok(())
    }

    pub(crate) async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| TmError::BackendUnavailable(format!("postgres pool: {e}")))
    }

    /// Repository set for one viewer
    #[must_use]
    pub fn repositories(&self, viewer: Viewer) -> PostgresRepositorySet {
        PostgresRepositorySet::new(self.clone(), viewer)
    }
}

/// Normalise driver errors into the core taxonomy
pub(crate) fn map_pg(e: &tokio_postgres::Error) -> TmError {
    use tokio_postgres::error::SqlState;
    if let Some(state) = e.code() {
        if state == &SqlState::UNIQUE_VIOLATION
            || state == &SqlState::CHECK_VIOLATION
            || state == &SqlState::FOREIGN_KEY_VIOLATION
        {
            return TmError::Conflict(e.to_string());
        }
    }
    if e.is_closed() {
        return TmError::BackendUnavailable(format!("postgres: {e}"));
    }
    TmError::Internal(format!("postgres: {e}"))
}
