//! ABOUTME: Per-TM index artifact set and its on-disk store
//!
//! Every TM owns one artifact directory: raw f32 embedding matrices,
//! MessagePack mapping and hash-lookup files, ANN parameter files, and a
//! `meta.json` describing provider and dimensions. Artifacts are a derived
//! cache — everything here is reconstructable from the TM's entries alone.
//!
//! Publication is atomic: builds write into a staging sibling and swap the
//! directory by rename, so a concurrent reader observes either the old set
//! in full or the new set in full, never a mix.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;

use crate::vector::{AnnParams, VectorIndex};

/// Bumped when the artifact file formats change
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

const META_FILE: &str = "meta.json";
const WHOLE_VECTORS: &str = "embeddings/whole.f32";
const LINE_VECTORS: &str = "embeddings/line.f32";
const WHOLE_MAPPING: &str = "embeddings/whole_mapping";
const LINE_MAPPING: &str = "embeddings/line_mapping";
const WHOLE_ANN: &str = "ann/whole.index";
const LINE_ANN: &str = "ann/line.index";
const WHOLE_HASH: &str = "hash/whole.lookup";
const LINE_HASH: &str = "hash/line.lookup";

/// Artifact metadata, persisted as `meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub schema_version: u32,
    /// Provider the vectors were produced with; a mismatch on load
    /// invalidates the whole set
    pub provider_id: String,
    pub dimensions: usize,
    /// Live entries represented in the whole-string segment
    pub entry_count: usize,
    pub whole_count: usize,
    pub line_count: usize,
    /// Mapping rows marked deleted since the last full build
    pub tombstone_count: usize,
    pub built_at: DateTime<Utc>,
}

/// One row of the whole-string mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WholeMapping {
    pub entry_id: EntityId,
    pub source: String,
    pub target: String,
    pub string_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tombstone: bool,
}

/// One row of the per-line mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineMapping {
    pub entry_id: EntityId,
    /// Ordinal of the line within the entry's source
    pub line_no: u32,
    pub source_line: String,
    pub target_line: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tombstone: bool,
}

/// The full loaded artifact set of one TM
pub struct TmArtifacts {
    pub meta: ArtifactMeta,

    pub whole_vectors: Vec<Vec<f32>>,
    pub whole_mapping: Vec<WholeMapping>,
    pub line_vectors: Vec<Vec<f32>>,
    pub line_mapping: Vec<LineMapping>,

    /// SHA-256(source) → whole mapping rows
    pub whole_hash: HashMap<String, Vec<u32>>,
    /// SHA-256(line) → line mapping rows
    pub line_hash: HashMap<String, Vec<u32>>,
    /// String id → whole mapping rows; derived from the mapping on load
    pub whole_stringid: HashMap<String, Vec<u32>>,

    /// ANN structures; `None` for empty segments
    pub whole_index: Option<VectorIndex>,
    pub line_index: Option<VectorIndex>,
    pub ann_params: AnnParams,
}

impl std::fmt::Debug for TmArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmArtifacts")
            .field("provider", &self.meta.provider_id)
            .field("whole_count", &self.whole_mapping.len())
            .field("line_count", &self.line_mapping.len())
            .field("tombstones", &self.meta.tombstone_count)
            .finish()
    }
}

impl TmArtifacts {
    /// Rebuild the derived string-id lookup from the whole mapping
    pub fn rebuild_stringid_lookup(&mut self) {
        let mut lookup: HashMap<String, Vec<u32>> = HashMap::new();
        for (row, mapping) in self.whole_mapping.iter().enumerate() {
            if let Some(sid) = &mapping.string_id {
                #[allow(clippy::cast_possible_truncation)]
                lookup.entry(sid.clone()).or_default().push(row as u32);
            }
        }
        self.whole_stringid = lookup;
    }

    /// Mark every mapping row of the given entries as tombstoned
    ///
    /// Returns the number of whole-mapping rows newly tombstoned and updates
    /// the tombstone count in the metadata.
    pub fn tombstone_entries(&mut self, entry_ids: &[EntityId]) -> usize {
        let ids: std::collections::HashSet<EntityId> = entry_ids.iter().copied().collect();
        let mut newly = 0;
        for row in &mut self.whole_mapping {
            if ids.contains(&row.entry_id) && !row.tombstone {
                row.tombstone = true;
                newly += 1;
            }
        }
        for row in &mut self.line_mapping {
            if ids.contains(&row.entry_id) {
                row.tombstone = true;
            }
        }
        self.meta.tombstone_count += newly;
        newly
    }

    /// Fraction of whole-mapping rows that are tombstoned
    #[must_use]
    pub fn tombstone_ratio(&self) -> f64 {
        if self.whole_mapping.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.meta.tombstone_count as f64 / self.whole_mapping.len() as f64
        }
    }
}

/// Source of loaded artifact sets for the cascade matcher
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// The published artifact set of a TM
    ///
    /// # Errors
    ///
    /// `IndexUnavailable` when no set is published, the set was built with a
    /// different provider, or the set is corrupt.
    async fn artifacts(&self, tm_id: EntityId) -> Result<Arc<TmArtifacts>>;
}

/// Filesystem store mapping TM ids to artifact directories
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create) the artifact root
    ///
    /// # Errors
    ///
    /// Returns `Io` when the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Live artifact directory of a TM
    #[must_use]
    pub fn tm_dir(&self, tm_id: EntityId) -> PathBuf {
        self.root.join(tm_id.to_string())
    }

    /// Whether a published set exists
    #[must_use]
    pub fn exists(&self, tm_id: EntityId) -> bool {
        self.tm_dir(tm_id).join(META_FILE).is_file()
    }

    /// Write a complete artifact set and atomically swap it in
    ///
    /// # Errors
    ///
    /// Returns `Io` / `Serialization` on write failures; a failed staging
    /// write never disturbs the published set.
    pub fn save(&self, tm_id: EntityId, artifacts: &TmArtifacts) -> Result<()> {
        let staging = self
            .root
            .join(format!("{tm_id}.staging-{}", uuid::Uuid::new_v4()));
        self.write_all(&staging, artifacts)?;

        let live = self.tm_dir(tm_id);
        if live.exists() {
            let retired = self
                .root
                .join(format!("{tm_id}.retired-{}", uuid::Uuid::new_v4()));
            fs::rename(&live, &retired)?;
            fs::rename(&staging, &live)?;
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!(tm_id, "failed to remove retired artifact dir: {e}");
            }
        } else {
            fs::rename(&staging, &live)?;
        }

        info!(
            tm_id,
            whole = artifacts.whole_mapping.len(),
            lines = artifacts.line_mapping.len(),
            "published artifact set"
        );
        Ok(())
    }

    /// Load a published set and rebuild its ANN structures
    ///
    /// # Errors
    ///
    /// `IndexUnavailable` when no set is published; `Internal` when files
    /// are present but unreadable (the caller quarantines).
    pub fn load(&self, tm_id: EntityId) -> Result<TmArtifacts> {
        let dir = self.tm_dir(tm_id);
        if !dir.join(META_FILE).is_file() {
            return Err(TmError::IndexUnavailable(format!(
                "no artifacts published for TM {tm_id}"
            )));
        }

        let meta: ArtifactMeta = read_json(&dir.join(META_FILE))?;
        if meta.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(TmError::Internal(format!(
                "artifact schema {} unsupported (expected {ARTIFACT_SCHEMA_VERSION})",
                meta.schema_version
            )));
        }

        let whole_vectors = read_f32_matrix(&dir.join(WHOLE_VECTORS))?;
        let line_vectors = read_f32_matrix(&dir.join(LINE_VECTORS))?;
        let whole_mapping: Vec<WholeMapping> = read_msgpack(&dir.join(WHOLE_MAPPING))?;
        let line_mapping: Vec<LineMapping> = read_msgpack(&dir.join(LINE_MAPPING))?;
        let whole_hash: HashMap<String, Vec<u32>> = read_msgpack(&dir.join(WHOLE_HASH))?;
        let line_hash: HashMap<String, Vec<u32>> = read_msgpack(&dir.join(LINE_HASH))?;
        let ann_params: AnnParams = read_json(&dir.join(WHOLE_ANN))?;

        if whole_vectors.len() != whole_mapping.len() || line_vectors.len() != line_mapping.len() {
            return Err(TmError::Internal(format!(
                "artifact row mismatch for TM {tm_id}: {}x{} whole, {}x{} line",
                whole_vectors.len(),
                whole_mapping.len(),
                line_vectors.len(),
                line_mapping.len()
            )));
        }

        let whole_index = (!whole_vectors.is_empty())
            .then(|| VectorIndex::build(&whole_vectors, &ann_params));
        let line_index =
            (!line_vectors.is_empty()).then(|| VectorIndex::build(&line_vectors, &ann_params));

        let mut artifacts = TmArtifacts {
            meta,
            whole_vectors,
            whole_mapping,
            line_vectors,
            line_mapping,
            whole_hash,
            line_hash,
            whole_stringid: HashMap::new(),
            whole_index,
            line_index,
            ann_params,
        };
        artifacts.rebuild_stringid_lookup();

        debug!(
            tm_id,
            whole = artifacts.whole_mapping.len(),
            lines = artifacts.line_mapping.len(),
            "loaded artifact set"
        );
        Ok(artifacts)
    }

    /// Remove the published set (TM deleted)
    ///
    /// # Errors
    ///
    /// Returns `Io` when the directory exists but cannot be removed.
    pub fn remove(&self, tm_id: EntityId) -> Result<()> {
        let dir = self.tm_dir(tm_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            info!(tm_id, "removed artifact set");
        }
        Ok(())
    }

    /// Move a corrupt set aside so the next build starts clean
    ///
    /// # Errors
    ///
    /// Returns `Io` when the rename fails.
    pub fn quarantine(&self, tm_id: EntityId) -> Result<PathBuf> {
        let dir = self.tm_dir(tm_id);
        let target = self
            .root
            .join(format!("{tm_id}.quarantine-{}", uuid::Uuid::new_v4()));
        fs::rename(&dir, &target)?;
        warn!(tm_id, "quarantined corrupt artifact set to {}", target.display());
        Ok(target)
    }

    fn write_all(&self, dir: &Path, artifacts: &TmArtifacts) -> Result<()> {
        fs::create_dir_all(dir.join("embeddings"))?;
        fs::create_dir_all(dir.join("ann"))?;
        fs::create_dir_all(dir.join("hash"))?;

        write_f32_matrix(&dir.join(WHOLE_VECTORS), &artifacts.whole_vectors)?;
        write_f32_matrix(&dir.join(LINE_VECTORS), &artifacts.line_vectors)?;
        write_msgpack(&dir.join(WHOLE_MAPPING), &artifacts.whole_mapping)?;
        write_msgpack(&dir.join(LINE_MAPPING), &artifacts.line_mapping)?;
        write_msgpack(&dir.join(WHOLE_HASH), &artifacts.whole_hash)?;
        write_msgpack(&dir.join(LINE_HASH), &artifacts.line_hash)?;
        write_json(&dir.join(WHOLE_ANN), &artifacts.ann_params)?;
        write_json(&dir.join(LINE_ANN), &artifacts.ann_params)?;
        write_json(&dir.join(META_FILE), &artifacts.meta)?;
        Ok(())
    }
}

/// Raw matrix layout: `[rows: u64 LE][dim: u64 LE]` then row-major f32 LE
fn write_f32_matrix(path: &Path, matrix: &[Vec<f32>]) -> Result<()> {
    let dim = matrix.first().map_or(0, Vec::len);
    let mut file = fs::File::create(path)?;
    file.write_all(&(matrix.len() as u64).to_le_bytes())?;
    file.write_all(&(dim as u64).to_le_bytes())?;
    let mut buf = Vec::with_capacity(matrix.len() * dim * 4);
    for row in matrix {
        for value in row {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    file.write_all(&buf)?;
    Ok(())
}

fn read_f32_matrix(path: &Path) -> Result<Vec<Vec<f32>>> {
    let mut file = fs::File::open(path)?;
    let mut header = [0u8; 16];
    file.read_exact(&mut header)?;
    let rows = u64::from_le_bytes(header[0..8].try_into().map_err(|_| {
        TmError::Internal(format!("short matrix header in {}", path.display()))
    })?);
    let dim = u64::from_le_bytes(header[8..16].try_into().map_err(|_| {
        TmError::Internal(format!("short matrix header in {}", path.display()))
    })?);

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    let expected = (rows * dim * 4) as usize;
    if data.len() != expected {
        return Err(TmError::Internal(format!(
            "matrix {} has {} bytes, expected {expected}",
            path.display(),
            data.len()
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let (rows, dim) = (rows as usize, dim as usize);
    let mut matrix = Vec::with_capacity(rows);
    for r in 0..rows {
        let mut row = Vec::with_capacity(dim);
        for c in 0..dim {
            let offset = (r * dim + c) * 4;
            let bytes: [u8; 4] = data[offset..offset + 4]
                .try_into()
                .map_err(|_| TmError::Internal("truncated matrix row".to_string()))?;
            row.push(f32::from_le_bytes(bytes));
        }
        matrix.push(row);
    }
    Ok(matrix)
}

fn write_msgpack<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = rmp_serde::to_vec(value)
        .map_err(|e| TmError::Internal(format!("msgpack encode {}: {e}", path.display())))?;
    fs::write(path, bytes)?;
    Ok(())
}

fn read_msgpack<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    rmp_serde::from_slice(&bytes)
        .map_err(|e| TmError::Internal(format!("msgpack decode {}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_vec_pretty(value)?;
    fs::write(path, raw)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read(path)?;
    serde_json::from_slice(&raw)
        .map_err(|e| TmError::Internal(format!("json decode {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_artifacts() -> TmArtifacts {
        let whole_vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let whole_mapping = vec![
            WholeMapping {
                entry_id: 10,
                source: "Hello".into(),
                target: "Bonjour".into(),
                string_id: Some("greet".into()),
                updated_at: Utc::now(),
                tombstone: false,
            },
            WholeMapping {
                entry_id: 11,
                source: "Bye".into(),
                target: "Au revoir".into(),
                string_id: None,
                updated_at: Utc::now(),
                tombstone: false,
            },
        ];
        let mut whole_hash = HashMap::new();
        whole_hash.insert(crate::hashing::sha256_hex("Hello"), vec![0u32]);
        whole_hash.insert(crate::hashing::sha256_hex("Bye"), vec![1u32]);

        let ann_params = AnnParams::for_profile(2, 2);
        let whole_index = Some(VectorIndex::build(&whole_vectors, &ann_params));

        let mut artifacts = TmArtifacts {
            meta: ArtifactMeta {
                schema_version: ARTIFACT_SCHEMA_VERSION,
                provider_id: "fast-v1".into(),
                dimensions: 2,
                entry_count: 2,
                whole_count: 2,
                line_count: 0,
                tombstone_count: 0,
                built_at: Utc::now(),
            },
            whole_vectors,
            whole_mapping,
            line_vectors: Vec::new(),
            line_mapping: Vec::new(),
            whole_hash,
            line_hash: HashMap::new(),
            whole_stringid: HashMap::new(),
            whole_index,
            line_index: None,
            ann_params,
        };
        artifacts.rebuild_stringid_lookup();
        artifacts
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        store.save(7, &sample_artifacts()).unwrap();
        assert!(store.exists(7));

        let loaded = store.load(7).unwrap();
        assert_eq!(loaded.whole_mapping.len(), 2);
        assert_eq!(loaded.meta.provider_id, "fast-v1");
        assert_eq!(loaded.whole_stringid.get("greet"), Some(&vec![0u32]));
        assert!(loaded.whole_index.is_some());
        assert!(loaded.line_index.is_none());
    }

    #[test]
    fn test_swap_replaces_previous_set() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        store.save(7, &sample_artifacts()).unwrap();

        let mut second = sample_artifacts();
        second.whole_mapping.truncate(1);
        second.whole_vectors.truncate(1);
        second.meta.whole_count = 1;
        second.whole_hash = HashMap::from([(crate::hashing::sha256_hex("Hello"), vec![0u32])]);
        store.save(7, &second).unwrap();

        let loaded = store.load(7).unwrap();
        assert_eq!(loaded.whole_mapping.len(), 1);
        // No staging or retired directories survive the swap
        let stray: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains('.'))
            .collect();
        assert!(stray.is_empty(), "stray dirs: {stray:?}");
    }

    #[test]
    fn test_load_missing_is_index_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let err = store.load(99).unwrap_err();
        assert!(matches!(err, TmError::IndexUnavailable(_)));
    }

    #[test]
    fn test_tombstone_accounting() {
        let mut artifacts = sample_artifacts();
        let newly = artifacts.tombstone_entries(&[10]);
        assert_eq!(newly, 1);
        assert!((artifacts.tombstone_ratio() - 0.5).abs() < f64::EPSILON);
        // Tombstoning again is a no-op
        assert_eq!(artifacts.tombstone_entries(&[10]), 0);
    }

    #[test]
    fn test_quarantine_moves_directory() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        store.save(7, &sample_artifacts()).unwrap();

        let target = store.quarantine(7).unwrap();
        assert!(!store.exists(7));
        assert!(target.exists());
    }
}
