//! ABOUTME: Background indexer service with a bounded worker pool
//!
//! One process-wide service owns the artifact store and cache, consumes a
//! job queue with `min(4, cores)` workers, and serialises builds per TM
//! through a per-TM mutex so at most one build of a TM is ever in flight.
//! Cancellation is cooperative: the builder checks a token between embedding
//! batches and a cancelled build leaves prior artifacts untouched. A
//! wall-clock budget, when configured, is indistinguishable from
//! cancellation plus a logged warning.

mod build;

pub use build::{append_entries, build_artifacts, BuildOptions};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lingomem_core::config::CoreConfig;
use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;
use lingomem_core::repository::RepositorySet;
use lingomem_core::types::TmStatus;

use crate::artifacts::{ArtifactProvider, ArtifactStore, TmArtifacts};
use crate::cache::ArtifactCache;
use crate::service::EmbeddingService;

/// A unit of index maintenance work
#[derive(Debug, Clone)]
pub enum IndexJob {
    /// Rebuild everything from the TM's entries
    FullBuild { tm_id: EntityId },
    /// Append newly inserted entries to the published set
    IncrementalAdd { tm_id: EntityId },
    /// Mark deleted entries in the published set; may trigger compaction
    Tombstone {
        tm_id: EntityId,
        entry_ids: Vec<EntityId>,
    },
}

impl IndexJob {
    const fn tm_id(&self) -> EntityId {
        match self {
            Self::FullBuild { tm_id }
            | Self::IncrementalAdd { tm_id }
            | Self::Tombstone { tm_id, .. } => *tm_id,
        }
    }
}

/// Tuning knobs derived from the process configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub parallelism: usize,
    pub batch_size: usize,
    pub build_timeout: Option<Duration>,
    pub compaction_tombstone_ratio: f64,
}

impl IndexerConfig {
    #[must_use]
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            parallelism: config.index_build_parallelism.max(1),
            batch_size: config.index_batch_size.max(1),
            build_timeout: config.build_timeout_secs.map(Duration::from_secs),
            compaction_tombstone_ratio: config.compaction_tombstone_ratio,
        }
    }
}

/// Snapshot of a TM's index state for status endpoints
#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub tm_id: EntityId,
    pub status: TmStatus,
    pub indexed_at: Option<DateTime<Utc>>,
    pub building: bool,
    pub published: bool,
}

/// Process-wide index maintenance service
pub struct IndexerService {
    repos: Arc<dyn RepositorySet>,
    embeddings: Arc<EmbeddingService>,
    store: ArtifactStore,
    cache: ArtifactCache,
    config: IndexerConfig,

    queue_tx: mpsc::UnboundedSender<IndexJob>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<IndexJob>>>,

    /// One mutex per TM guarantees at most one concurrent build per TM
    tm_locks: DashMap<EntityId, Arc<Mutex<()>>>,
    /// Token of the build currently holding the TM lock
    cancel_tokens: DashMap<EntityId, CancellationToken>,

    shutdown: CancellationToken,
    running: AtomicBool,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl IndexerService {
    /// Create the service; call [`Self::start`] to spawn the worker pool
    ///
    /// # Errors
    ///
    /// Returns `Io` when the artifact root cannot be created.
    pub fn new(
        repos: Arc<dyn RepositorySet>,
        embeddings: Arc<EmbeddingService>,
        store: ArtifactStore,
        cache_capacity: usize,
        config: IndexerConfig,
    ) -> Result<Arc<Self>> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Ok(Arc::new(Self {
            repos,
            embeddings,
            store,
            cache: ArtifactCache::new(cache_capacity.max(1)),
            config,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            tm_locks: DashMap::new(),
            cancel_tokens: DashMap::new(),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            workers: parking_lot::Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the worker pool
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the service is already running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TmError::Conflict("indexer already running".into()));
        }
        info!(workers = self.config.parallelism, "starting indexer service");
        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.parallelism {
            let service = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                service.worker_loop(worker_id).await;
            }));
        }
        Ok(())
    }

    /// Stop the pool; in-flight builds are cancelled cooperatively
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping indexer service");
        for token in &self.cancel_tokens {
            token.value().cancel();
        }
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Queue a job for background execution
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the service has shut down.
    pub fn schedule(&self, job: IndexJob) -> Result<()> {
        debug!(?job, "scheduling index job");
        self.queue_tx
            .send(job)
            .map_err(|_| TmError::Internal("indexer queue closed".into()))
    }

    /// TM created with initial entries, or an explicit build request
    ///
    /// # Errors
    ///
    /// Propagates queue errors.
    pub fn schedule_full_build(&self, tm_id: EntityId) -> Result<()> {
        self.schedule(IndexJob::FullBuild { tm_id })
    }

    /// Bulk insertion happened: append when a set is published, otherwise
    /// build from scratch
    ///
    /// # Errors
    ///
    /// Propagates queue errors.
    pub fn on_entries_added(&self, tm_id: EntityId) -> Result<()> {
        if self.store.exists(tm_id) {
            self.schedule(IndexJob::IncrementalAdd { tm_id })
        } else {
            self.schedule(IndexJob::FullBuild { tm_id })
        }
    }

    /// An entry was updated in place; vectors cannot be fixed incrementally
    ///
    /// # Errors
    ///
    /// Propagates queue errors.
    pub fn on_entries_updated(&self, tm_id: EntityId) -> Result<()> {
        self.schedule(IndexJob::FullBuild { tm_id })
    }

    /// Entries were deleted; tombstone them and compact when the ratio says so
    ///
    /// # Errors
    ///
    /// Propagates queue errors.
    pub fn on_entries_deleted(&self, tm_id: EntityId, entry_ids: Vec<EntityId>) -> Result<()> {
        self.schedule(IndexJob::Tombstone { tm_id, entry_ids })
    }

    /// TM removed: cancel any build, drop cache and artifacts
    ///
    /// # Errors
    ///
    /// Returns `Io` when the artifact directory cannot be removed.
    pub fn on_tm_deleted(&self, tm_id: EntityId) -> Result<()> {
        if let Some((_, token)) = self.cancel_tokens.remove(&tm_id) {
            token.cancel();
        }
        self.cache.invalidate(tm_id);
        self.store.remove(tm_id)
    }

    /// Cancel the in-flight build of a TM, if any
    pub fn cancel_build(&self, tm_id: EntityId) {
        if let Some(token) = self.cancel_tokens.get(&tm_id) {
            token.cancel();
        }
    }

    /// Login/startup sweep: enqueue a rebuild for every stale TM visible to
    /// the service viewer. Never blocks on the builds themselves.
    ///
    /// # Errors
    ///
    /// Propagates repository errors from the staleness query.
    pub async fn sync_staleness(&self) -> Result<usize> {
        let stale = self.repos.tms().list_stale().await?;
        let count = stale.len();
        for tm in stale {
            debug!(tm_id = tm.id, "stale TM detected, scheduling rebuild");
            self.schedule_full_build(tm.id)?;
        }
        info!(count, "staleness sweep complete");
        Ok(count)
    }

    /// Index state of a TM for status endpoints
    ///
    /// # Errors
    ///
    /// Propagates repository errors.
    pub async fn status(&self, tm_id: EntityId) -> Result<IndexStatus> {
        let tm = self.repos.tms().get(tm_id).await?;
        Ok(IndexStatus {
            tm_id,
            status: tm.status,
            indexed_at: tm.indexed_at,
            building: self.cancel_tokens.contains_key(&tm_id),
            published: self.store.exists(tm_id),
        })
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "indexer worker started");
        loop {
            let job = {
                let mut rx = self.queue_rx.lock().await;
                tokio::select! {
                    job = rx.recv() => job,
                    () = self.shutdown.cancelled() => None,
                }
            };
            let Some(job) = job else { break };
            self.run_job(job).await;
        }
        debug!(worker_id, "indexer worker exited");
    }

    async fn run_job(&self, job: IndexJob) {
        let tm_id = job.tm_id();
        let lock = self
            .tm_locks
            .entry(tm_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let token = CancellationToken::new();
        self.cancel_tokens.insert(tm_id, token.clone());

        let outcome = match &job {
            IndexJob::FullBuild { .. } => self.run_build(tm_id, &token, false).await,
            IndexJob::IncrementalAdd { .. } => self.run_build(tm_id, &token, true).await,
            IndexJob::Tombstone { entry_ids, .. } => {
                self.apply_tombstones(tm_id, entry_ids).await.map(|()| true)
            }
        };

        self.cancel_tokens.remove(&tm_id);

        match outcome {
            Ok(true) => {}
            Ok(false) => {
                // Cancelled or timed out: prior artifacts stay published
                let status = if self.store.exists(tm_id) {
                    TmStatus::Ready
                } else {
                    TmStatus::Pending
                };
                if let Err(e) = self.repos.tms().set_status(tm_id, status, None).await {
                    warn!(tm_id, "failed to restore TM status after cancel: {e}");
                }
            }
            Err(TmError::NotFound(_)) => {
                debug!(tm_id, "TM vanished before its index job ran");
            }
            Err(e) => {
                error!(tm_id, "index job failed: {e}");
                let reason = e.to_string();
                if let Err(e) = self
                    .repos
                    .tms()
                    .set_status(tm_id, TmStatus::Error, Some(&reason))
                    .await
                {
                    warn!(tm_id, "failed to record index error: {e}");
                }
            }
        }
    }

    /// Full or incremental build; returns `Ok(false)` on cancel/timeout
    async fn run_build(
        &self,
        tm_id: EntityId,
        token: &CancellationToken,
        incremental: bool,
    ) -> Result<bool> {
        self.repos
            .tms()
            .set_status(tm_id, TmStatus::Indexing, None)
            .await?;

        let fut = self.build_once(tm_id, token, incremental);
        match self.config.build_timeout {
            Some(budget) => match tokio::time::timeout(budget, fut).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(tm_id, "build exceeded wall-clock budget, treating as cancelled");
                    token.cancel();
                    Ok(false)
                }
            },
            None => fut.await,
        }
    }

    async fn build_once(
        &self,
        tm_id: EntityId,
        token: &CancellationToken,
        incremental: bool,
    ) -> Result<bool> {
        let read_start = Utc::now();
        let entries = self.repos.tm_entries().get_all(tm_id).await?;
        let stamp = entries
            .iter()
            .map(|e| e.updated_at)
            .max()
            .unwrap_or(read_start);

        let opts = BuildOptions {
            batch_size: self.config.batch_size,
            cancel: token.clone(),
        };

        let artifacts = if incremental {
            match self.load_for_append(tm_id, &entries).await? {
                AppendPlan::Append(mut current) => {
                    if !append_entries(&mut current, &entries, &self.embeddings, &opts).await? {
                        return Ok(false);
                    }
                    Some(current)
                }
                AppendPlan::Rebuild => build_artifacts(&entries, &self.embeddings, &opts).await?,
            }
        } else {
            build_artifacts(&entries, &self.embeddings, &opts).await?
        };

        let Some(artifacts) = artifacts else {
            return Ok(false);
        };

        self.store.save(tm_id, &artifacts)?;
        self.cache.put(tm_id, Arc::new(artifacts));
        self.repos.tms().mark_indexed(tm_id, stamp).await?;
        info!(tm_id, incremental, "index build complete");
        Ok(true)
    }

    /// Decide whether the incremental path is safe
    ///
    /// A published set can be appended to only when every live mapping row
    /// still matches its database entry; any update or disappearance forces
    /// a full rebuild.
    async fn load_for_append(
        &self,
        tm_id: EntityId,
        entries: &[lingomem_core::types::TmEntry],
    ) -> Result<AppendPlan> {
        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load(tm_id))
            .await
            .map_err(|e| TmError::Internal(format!("artifact load task failed: {e}")))?;

        let current = match loaded {
            Ok(current) => current,
            Err(e) => {
                debug!(tm_id, "cannot load artifacts for append ({e}), rebuilding");
                return Ok(AppendPlan::Rebuild);
            }
        };

        if current.meta.provider_id != self.embeddings.provider_id()
            || current.meta.dimensions != self.embeddings.dimensions()
        {
            return Ok(AppendPlan::Rebuild);
        }

        let by_id: std::collections::HashMap<EntityId, &lingomem_core::types::TmEntry> =
            entries.iter().map(|e| (e.id, e)).collect();
        for row in current.whole_mapping.iter().filter(|m| !m.tombstone) {
            match by_id.get(&row.entry_id) {
                Some(entry) if entry.updated_at == row.updated_at => {}
                _ => return Ok(AppendPlan::Rebuild),
            }
        }
        Ok(AppendPlan::Append(current))
    }

    async fn apply_tombstones(&self, tm_id: EntityId, entry_ids: &[EntityId]) -> Result<()> {
        if !self.store.exists(tm_id) {
            debug!(tm_id, "no artifacts to tombstone");
            return Ok(());
        }

        let store = self.store.clone();
        let mut artifacts = tokio::task::spawn_blocking(move || store.load(tm_id))
            .await
            .map_err(|e| TmError::Internal(format!("artifact load task failed: {e}")))??;

        let newly = artifacts.tombstone_entries(entry_ids);
        if newly == 0 {
            return Ok(());
        }

        let ratio = artifacts.tombstone_ratio();
        self.store.save(tm_id, &artifacts)?;
        self.cache.put(tm_id, Arc::new(artifacts));

        if ratio > self.config.compaction_tombstone_ratio {
            info!(tm_id, ratio, "tombstone ratio over threshold, scheduling compaction");
            self.schedule_full_build(tm_id)?;
        }
        Ok(())
    }
}

enum AppendPlan {
    Append(TmArtifacts),
    Rebuild,
}

#[async_trait]
impl ArtifactProvider for IndexerService {
    async fn artifacts(&self, tm_id: EntityId) -> Result<Arc<TmArtifacts>> {
        if let Some(cached) = self.cache.get(tm_id) {
            if cached.meta.provider_id == self.embeddings.provider_id()
                && cached.meta.dimensions == self.embeddings.dimensions()
            {
                return Ok(cached);
            }
            self.cache.invalidate(tm_id);
            let _ = self.schedule_full_build(tm_id);
            return Err(TmError::IndexUnavailable(format!(
                "artifacts of TM {tm_id} were built with a different embedding provider"
            )));
        }

        if !self.store.exists(tm_id) {
            return Err(TmError::IndexUnavailable(format!(
                "no artifacts published for TM {tm_id}"
            )));
        }

        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load(tm_id))
            .await
            .map_err(|e| TmError::Internal(format!("artifact load task failed: {e}")))?;

        match loaded {
            Ok(artifacts) => {
                if artifacts.meta.provider_id != self.embeddings.provider_id()
                    || artifacts.meta.dimensions != self.embeddings.dimensions()
                {
                    let _ = self.schedule_full_build(tm_id);
                    return Err(TmError::IndexUnavailable(format!(
                        "artifacts of TM {tm_id} were built with a different embedding provider"
                    )));
                }
                let artifacts = Arc::new(artifacts);
                self.cache.put(tm_id, Arc::clone(&artifacts));
                Ok(artifacts)
            }
            Err(TmError::IndexUnavailable(e)) => Err(TmError::IndexUnavailable(e)),
            Err(e) => {
                error!(tm_id, "corrupt artifact set: {e}");
                if let Err(qe) = self.store.quarantine(tm_id) {
                    warn!(tm_id, "quarantine failed: {qe}");
                }
                if let Err(se) = self
                    .repos
                    .tms()
                    .set_status(tm_id, TmStatus::Error, Some("corrupt index artifacts"))
                    .await
                {
                    warn!(tm_id, "failed to flag TM after quarantine: {se}");
                }
                Err(TmError::IndexUnavailable(format!(
                    "artifacts of TM {tm_id} were corrupt and have been quarantined"
                )))
            }
        }
    }
}
