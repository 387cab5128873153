//! Artifact construction from TM entries
//!
//! Pure build functions shared by the full and incremental paths. Embedding
//! runs in bounded batches with a cancellation check between batches;
//! cancellation surfaces as `Ok(None)` / `Ok(false)` so the caller can leave
//! prior artifacts untouched.

use std::collections::HashMap;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lingomem_core::error::Result;
use lingomem_core::types::TmEntry;

use crate::artifacts::{
    ArtifactMeta, LineMapping, TmArtifacts, WholeMapping, ARTIFACT_SCHEMA_VERSION,
};
use crate::hashing::{indexable_lines, sha256_hex};
use crate::service::EmbeddingService;
use crate::vector::{AnnParams, VectorIndex};

/// Per-build options
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Strings embedded per batch; cancellation is checked between batches
    pub batch_size: usize,
    pub cancel: CancellationToken,
}

impl BuildOptions {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            cancel: CancellationToken::new(),
        }
    }
}

/// Build a complete artifact set from a TM's live entries
///
/// Tombstoned entries and entries with blank sources produce no artifact
/// rows at all. Returns `Ok(None)` when cancelled.
///
/// # Errors
///
/// Returns `Embedding` when vector generation fails.
pub async fn build_artifacts(
    entries: &[TmEntry],
    service: &EmbeddingService,
    opts: &BuildOptions,
) -> Result<Option<TmArtifacts>> {
    let live: Vec<&TmEntry> = entries
        .iter()
        .filter(|e| !e.is_deleted() && !e.source.trim().is_empty())
        .collect();

    let mut whole_mapping = Vec::with_capacity(live.len());
    let mut whole_texts = Vec::with_capacity(live.len());
    let mut line_mapping = Vec::new();
    let mut line_texts = Vec::new();

    for entry in &live {
        whole_texts.push(entry.source.clone());
        whole_mapping.push(WholeMapping {
            entry_id: entry.id,
            source: entry.source.clone(),
            target: entry.target.clone(),
            string_id: entry.string_id.clone(),
            updated_at: entry.updated_at,
            tombstone: false,
        });

        let target_lines: Vec<&str> = entry.target.split('\n').collect();
        for (line_no, source_line) in indexable_lines(&entry.source) {
            line_texts.push(source_line.to_string());
            line_mapping.push(LineMapping {
                entry_id: entry.id,
                line_no,
                source_line: source_line.to_string(),
                target_line: target_lines
                    .get(line_no as usize)
                    .map(|s| (*s).to_string())
                    .unwrap_or_default(),
                updated_at: entry.updated_at,
                tombstone: false,
            });
        }
    }

    let Some(whole_vectors) = embed_in_batches(&whole_texts, service, opts).await? else {
        return Ok(None);
    };
    let Some(line_vectors) = embed_in_batches(&line_texts, service, opts).await? else {
        return Ok(None);
    };

    let mut whole_hash: HashMap<String, Vec<u32>> = HashMap::new();
    for (row, mapping) in whole_mapping.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        whole_hash
            .entry(sha256_hex(&mapping.source))
            .or_default()
            .push(row as u32);
    }
    let mut line_hash: HashMap<String, Vec<u32>> = HashMap::new();
    for (row, mapping) in line_mapping.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        line_hash
            .entry(sha256_hex(&mapping.source_line))
            .or_default()
            .push(row as u32);
    }

    let dimensions = service.dimensions();
    let ann_params = AnnParams::for_profile(whole_vectors.len(), dimensions);

    if opts.cancel.is_cancelled() {
        return Ok(None);
    }
    let whole_index =
        (!whole_vectors.is_empty()).then(|| VectorIndex::build(&whole_vectors, &ann_params));
    let line_index =
        (!line_vectors.is_empty()).then(|| VectorIndex::build(&line_vectors, &ann_params));

    let mut artifacts = TmArtifacts {
        meta: ArtifactMeta {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            provider_id: service.provider_id().to_string(),
            dimensions,
            entry_count: whole_mapping.len(),
            whole_count: whole_mapping.len(),
            line_count: line_mapping.len(),
            tombstone_count: 0,
            built_at: Utc::now(),
        },
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
        whole = artifacts.whole_mapping.len(),
        lines = artifacts.line_mapping.len(),
        "built artifact set"
    );
    Ok(Some(artifacts))
}

/// Append new entries to a loaded artifact set (pure-insertion path)
///
/// Entries already present in the mapping, tombstoned entries, and blank
/// sources are skipped. Returns `Ok(false)` when cancelled; the set is left
/// unchanged in that case because vectors are appended only after all
/// embedding batches finish.
///
/// # Errors
///
/// Returns `Embedding` when vector generation fails.
pub async fn append_entries(
    artifacts: &mut TmArtifacts,
    entries: &[TmEntry],
    service: &EmbeddingService,
    opts: &BuildOptions,
) -> Result<bool> {
    let known: std::collections::HashSet<i64> =
        artifacts.whole_mapping.iter().map(|m| m.entry_id).collect();
    let fresh: Vec<&TmEntry> = entries
        .iter()
        .filter(|e| {
            !e.is_deleted() && !e.source.trim().is_empty() && !known.contains(&e.id)
        })
        .collect();

    if fresh.is_empty() {
        return Ok(true);
    }

    let mut whole_texts = Vec::with_capacity(fresh.len());
    let mut new_whole = Vec::with_capacity(fresh.len());
    let mut line_texts = Vec::new();
    let mut new_lines = Vec::new();

    for entry in &fresh {
        whole_texts.push(entry.source.clone());
        new_whole.push(WholeMapping {
            entry_id: entry.id,
            source: entry.source.clone(),
            target: entry.target.clone(),
            string_id: entry.string_id.clone(),
            updated_at: entry.updated_at,
            tombstone: false,
        });
        let target_lines: Vec<&str> = entry.target.split('\n').collect();
        for (line_no, source_line) in indexable_lines(&entry.source) {
            line_texts.push(source_line.to_string());
            new_lines.push(LineMapping {
                entry_id: entry.id,
                line_no,
                source_line: source_line.to_string(),
                target_line: target_lines
                    .get(line_no as usize)
                    .map(|s| (*s).to_string())
                    .unwrap_or_default(),
                updated_at: entry.updated_at,
                tombstone: false,
            });
        }
    }

    let Some(whole_vectors) = embed_in_batches(&whole_texts, service, opts).await? else {
        return Ok(false);
    };
    let Some(line_vectors) = embed_in_batches(&line_texts, service, opts).await? else {
        return Ok(false);
    };

    let whole_start = artifacts.whole_mapping.len();
    for (offset, mapping) in new_whole.into_iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        artifacts
            .whole_hash
            .entry(sha256_hex(&mapping.source))
            .or_default()
            .push((whole_start + offset) as u32);
        artifacts.whole_mapping.push(mapping);
    }
    let line_start = artifacts.line_mapping.len();
    for (offset, mapping) in new_lines.into_iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        artifacts
            .line_hash
            .entry(sha256_hex(&mapping.source_line))
            .or_default()
            .push((line_start + offset) as u32);
        artifacts.line_mapping.push(mapping);
    }

    if let Some(index) = artifacts.whole_index.as_mut() {
        index.append(&whole_vectors, whole_start);
    } else if !whole_vectors.is_empty() {
        artifacts.whole_index = Some(VectorIndex::build(&whole_vectors, &artifacts.ann_params));
    }
    artifacts.whole_vectors.extend(whole_vectors);

    if let Some(index) = artifacts.line_index.as_mut() {
        index.append(&line_vectors, line_start);
    } else if !line_vectors.is_empty() {
        artifacts.line_index = Some(VectorIndex::build(&line_vectors, &artifacts.ann_params));
    }
    artifacts.line_vectors.extend(line_vectors);

    artifacts.meta.whole_count = artifacts.whole_mapping.len();
    artifacts.meta.line_count = artifacts.line_mapping.len();
    artifacts.meta.entry_count = artifacts.whole_mapping.len() - artifacts.meta.tombstone_count;
    artifacts.meta.built_at = Utc::now();
    artifacts.rebuild_stringid_lookup();

    debug!(appended = fresh.len(), "appended entries to artifact set");
    Ok(true)
}

/// Embed texts in bounded batches, checking cancellation between batches
async fn embed_in_batches(
    texts: &[String],
    service: &EmbeddingService,
    opts: &BuildOptions,
) -> Result<Option<Vec<Vec<f32>>>> {
    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(opts.batch_size) {
        if opts.cancel.is_cancelled() {
            debug!("embedding cancelled between batches");
            return Ok(None);
        }
        out.extend(service.embed_batch(chunk).await?);
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashedNgramEmbedding;
    use std::sync::Arc;

    fn entry(id: i64, source: &str, target: &str) -> TmEntry {
        TmEntry {
            id,
            tm_id: 1,
            source: source.to_string(),
            target: target.to_string(),
            source_hash: sha256_hex(source),
            string_id: None,
            confirmed: false,
            confirmed_by: None,
            created_by: 1,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service() -> EmbeddingService {
        EmbeddingService::new(Arc::new(HashedNgramEmbedding::fast()))
    }

    #[tokio::test]
    async fn test_build_basic() {
        let entries = vec![
            entry(1, "Hello, world.", "Bonjour le monde."),
            entry(2, "A\nB", "α\nβ"),
        ];
        let artifacts = build_artifacts(&entries, &service(), &BuildOptions::new(64))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(artifacts.whole_mapping.len(), 2);
        // "A\nB" contributes two line rows, "Hello, world." one
        assert_eq!(artifacts.line_mapping.len(), 3);
        assert!(artifacts.whole_hash.contains_key(&sha256_hex("Hello, world.")));
        assert!(artifacts.line_hash.contains_key(&sha256_hex("A")));
        assert_eq!(artifacts.line_mapping[1].target_line, "α");
    }

    #[tokio::test]
    async fn test_blank_source_produces_no_rows() {
        let entries = vec![entry(1, "   ", "x"), entry(2, "", "y")];
        let artifacts = build_artifacts(&entries, &service(), &BuildOptions::new(64))
            .await
            .unwrap()
            .unwrap();
        assert!(artifacts.whole_mapping.is_empty());
        assert!(artifacts.line_mapping.is_empty());
        assert!(artifacts.whole_index.is_none());
    }

    #[tokio::test]
    async fn test_empty_tm_builds_empty_set() {
        let artifacts = build_artifacts(&[], &service(), &BuildOptions::new(64))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifacts.meta.entry_count, 0);
        assert!(artifacts.whole_index.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let opts = BuildOptions::new(64);
        opts.cancel.cancel();
        let entries = vec![entry(1, "Hello", "Salut")];
        let result = build_artifacts(&entries, &service(), &opts).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_append_skips_known_and_deleted() {
        let first = vec![entry(1, "Hello", "Salut")];
        let mut artifacts = build_artifacts(&first, &service(), &BuildOptions::new(64))
            .await
            .unwrap()
            .unwrap();

        let mut gone = entry(3, "Gone", "Parti");
        gone.deleted_at = Some(Utc::now());
        let incoming = vec![entry(1, "Hello", "Salut"), entry(2, "World", "Monde"), gone];

        let completed = append_entries(&mut artifacts, &incoming, &service(), &BuildOptions::new(64))
            .await
            .unwrap();
        assert!(completed);
        assert_eq!(artifacts.whole_mapping.len(), 2);
        assert_eq!(artifacts.whole_mapping[1].entry_id, 2);
        assert_eq!(artifacts.whole_vectors.len(), 2);
        assert!(artifacts.whole_hash.contains_key(&sha256_hex("World")));
    }
}
