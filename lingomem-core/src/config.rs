//! ABOUTME: Core configuration with backend and index tuning options
//!
//! One process-wide configuration value, loaded from TOML at startup.
//! Switching the embedding provider invalidates every TM's artifacts; the
//! indexer detects the mismatch on load and schedules rebuilds.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TmError};

/// Which embedding provider the process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// Small model, 256 dimensions, low memory
    Fast,
    /// Large model, 1024 dimensions, high recall
    Deep,
}

/// Factory mode override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendOverride {
    /// Detect per request: offline credential, then authoritative, then
    /// degraded fallback
    Auto,
    /// Force the authoritative store
    Authoritative,
    /// Force the embedded store under the authoritative schema
    Embedded,
}

/// Process-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub embedding_provider: EmbeddingProviderKind,
    pub backend_mode: BackendOverride,

    /// Size of the indexer worker pool
    pub index_build_parallelism: usize,
    /// Embedding batch size; cancellation is checked between batches
    pub index_batch_size: usize,
    /// Wall-clock budget per build; `None` means unbounded
    pub build_timeout_secs: Option<u64>,

    pub similarity_threshold_default: f32,
    pub cascade_limit_default: usize,
    /// Tombstoned fraction that forces a compaction rebuild
    pub compaction_tombstone_ratio: f64,
    pub trash_retention_days: u32,

    /// Root directory holding one artifact directory per TM
    pub artifact_root: PathBuf,
    /// Loaded artifact sets kept in memory before LRU eviction
    pub artifact_cache_capacity: usize,

    /// Embedded store path for the degraded mode
    pub sqlite_path: PathBuf,
    /// Embedded store path for the local shadow mode
    pub offline_sqlite_path: PathBuf,
    /// Authoritative store connection string; `None` disables that mode
    pub postgres_url: Option<String>,
    /// Whether `backend_unavailable` may fail over to degraded mode
    pub degraded_fallback: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            embedding_provider: EmbeddingProviderKind::Fast,
            backend_mode: BackendOverride::Auto,
            index_build_parallelism: cores.min(4),
            index_batch_size: 128,
            build_timeout_secs: None,
            similarity_threshold_default: 0.7,
            cascade_limit_default: 10,
            compaction_tombstone_ratio: 0.10,
            trash_retention_days: 30,
            artifact_root: PathBuf::from("./data/tm_artifacts"),
            artifact_cache_capacity: 32,
            sqlite_path: PathBuf::from("./data/lingomem.db"),
            offline_sqlite_path: PathBuf::from("./data/lingomem-local.db"),
            postgres_url: None,
            degraded_fallback: true,
        }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TmError::ValidationFailed(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| TmError::ValidationFailed(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check option ranges
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` on out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.index_build_parallelism == 0 {
            return Err(TmError::ValidationFailed(
                "index_build_parallelism must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold_default) {
            return Err(TmError::ValidationFailed(
                "similarity_threshold_default must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.compaction_tombstone_ratio) {
            return Err(TmError::ValidationFailed(
                "compaction_tombstone_ratio must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Configuration suitable for unit tests: single worker, tiny cache
    #[must_use]
    pub fn for_testing(artifact_root: PathBuf) -> Self {
        Self {
            index_build_parallelism: 1,
            artifact_cache_capacity: 4,
            artifact_root,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        CoreConfig::default().validate().unwrap();
    }

    #[test]
    fn test_threshold_range_rejected() {
        let config = CoreConfig {
            similarity_threshold_default: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = CoreConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let back: CoreConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.cascade_limit_default, config.cascade_limit_default);
        assert_eq!(back.embedding_provider, config.embedding_provider);
    }
}
