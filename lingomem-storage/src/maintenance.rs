//! Background maintenance daemon
//!
//! Periodic housekeeping over one repository set: trash purge after the
//! retention window, the cached entry count audit, and the tombstone-ratio
//! scan that asks the indexer (through a hook) to compact a TM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lingomem_core::config::CoreConfig;
use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;
use lingomem_core::repository::RepositorySet;
use lingomem_core::types::TmFilter;

/// Callback invoked when a TM's tombstone ratio crosses the threshold
pub type CompactionHook = Arc<dyn Fn(EntityId) + Send + Sync>;

/// Maintenance tuning
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    pub trash_retention_days: u32,
    pub compaction_tombstone_ratio: f64,
}

impl MaintenanceConfig {
    #[must_use]
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            interval: Duration::from_secs(3600),
            trash_retention_days: config.trash_retention_days,
            compaction_tombstone_ratio: config.compaction_tombstone_ratio,
        }
    }
}

/// Daemon running the maintenance cycle on an interval
pub struct MaintenanceDaemon {
    repos: Arc<dyn RepositorySet>,
    config: MaintenanceConfig,
    compaction_hook: Option<CompactionHook>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MaintenanceDaemon {
    #[must_use]
    pub fn new(repos: Arc<dyn RepositorySet>, config: MaintenanceConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            repos,
            config,
            compaction_hook: None,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Install the indexer-side compaction trigger
    #[must_use]
    pub fn with_compaction_hook(mut self, hook: CompactionHook) -> Self {
        self.compaction_hook = Some(hook);
        self
    }

    /// Start the daemon loop in a background task
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when already running.
    pub fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TmError::Conflict("maintenance daemon already running".into()));
        }
        info!("starting maintenance daemon");
        let daemon = Arc::clone(&self);
        Ok(tokio::spawn(async move { daemon.run().await }))
    }

    /// Signal the loop to stop after the current cycle
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(true);
            info!("maintenance daemon stopping");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut interval = tokio::time::interval(self.config.interval);
        // The first tick fires immediately; run one cycle at startup
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("maintenance cycle failed: {e}");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        debug!("maintenance daemon exited");
    }

    /// One full maintenance pass; public so tests and admin endpoints can
    /// drive it directly
    ///
    /// # Errors
    ///
    /// Propagates repository errors.
    pub async fn run_cycle(&self) -> Result<MaintenanceReport> {
        let purged = self
            .repos
            .trash()
            .purge_older_than(self.config.trash_retention_days)
            .await?;
        let recounted = self.repos.tms().recount_entries().await?;

        let mut compactions = 0u64;
        let tms = self.repos.tms().list(&TmFilter::default()).await?;
        for tm in tms {
            match self.repos.tm_entries().tombstone_ratio(tm.id).await {
                Ok(ratio) if ratio > self.config.compaction_tombstone_ratio => {
                    compactions += 1;
                    if let Some(hook) = &self.compaction_hook {
                        debug!(tm_id = tm.id, ratio, "tombstone ratio over threshold");
                        hook(tm.id);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(tm_id = tm.id, "tombstone scan failed: {e}"),
            }
        }

        let report = MaintenanceReport {
            trash_purged: purged,
            counts_corrected: recounted,
            compactions_requested: compactions,
        };
        debug!(?report, "maintenance cycle complete");
        Ok(report)
    }
}

/// Outcome of one maintenance cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceReport {
    pub trash_purged: u64,
    pub counts_corrected: u64,
    pub compactions_requested: u64,
}
