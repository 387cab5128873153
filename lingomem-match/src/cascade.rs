//! ABOUTME: Five-tier cascade matcher over a TM's index artifacts
//!
//! Tiers run in order and the first tier producing hits at or above the
//! threshold wins: whole-string exact hash, whole-string semantic, per-line
//! exact hash with stitching, per-line semantic with stitching, character
//! n-gram fallback. String-id TMs replace the exact tiers with string-id
//! lookups. Missing artifacts degrade to an empty result with a log line;
//! the artifact provider handles quarantine of corrupt sets.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;
use lingomem_core::repository::RepositorySet;
use lingomem_core::types::{MatchingMode, TranslationMemory};
use lingomem_index::artifacts::{ArtifactProvider, TmArtifacts};
use lingomem_index::hashing::{indexable_lines, sha256_hex};
use lingomem_index::service::EmbeddingService;

use crate::ngram::dice_similarity;

/// Which tier produced a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    ExactHash,
    SemanticWhole,
    ExactLine,
    SemanticLine,
    Ngram,
}

impl MatchTier {
    /// Tier ordinal, 1 through 5
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::ExactHash => 1,
            Self::SemanticWhole => 2,
            Self::ExactLine => 3,
            Self::SemanticLine => 4,
            Self::Ngram => 5,
        }
    }
}

/// One stitched line of a line-tier hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHit {
    pub entry_id: EntityId,
    pub line_no: u32,
    pub source_line: String,
    pub target_line: String,
    pub score: f32,
}

/// One cascade result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHit {
    pub entry_id: EntityId,
    pub source: String,
    pub target: String,
    pub score: f32,
    pub tier: MatchTier,
    /// Populated by the line tiers; empty otherwise
    #[serde(default)]
    pub segments: Vec<SegmentHit>,
}

/// Cascade query parameters
#[derive(Debug, Clone)]
pub struct CascadeQuery {
    pub source: String,
    /// Hits below this similarity are not acceptable
    pub threshold: f32,
    /// Result cap after dedup
    pub limit: usize,
    /// Lookup key for string-id TMs
    pub string_id: Option<String>,
}

impl CascadeQuery {
    #[must_use]
    pub fn new(source: impl Into<String>, threshold: f32, limit: usize) -> Self {
        Self {
            source: source.into(),
            threshold,
            limit,
            string_id: None,
        }
    }

    #[must_use]
    pub fn with_string_id(mut self, string_id: impl Into<String>) -> Self {
        self.string_id = Some(string_id.into());
        self
    }
}

/// Candidate hit before tie-breaking
struct Candidate {
    hit: MatchHit,
    updated_at: DateTime<Utc>,
}

/// Executes the cascade against published artifacts
///
/// Tier 1 additionally consults the repository's exact-match lookups, so
/// entries added after the last build are found immediately, before the
/// indexer catches up.
pub struct CascadeMatcher {
    repos: Arc<dyn RepositorySet>,
    artifacts: Arc<dyn ArtifactProvider>,
    embeddings: Arc<EmbeddingService>,
    /// Neighbours requested from the ANN tiers
    top_k: usize,
}

impl CascadeMatcher {
    #[must_use]
    pub fn new(
        repos: Arc<dyn RepositorySet>,
        artifacts: Arc<dyn ArtifactProvider>,
        embeddings: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            repos,
            artifacts,
            embeddings,
            top_k: 5,
        }
    }

    /// Run the cascade for one TM
    ///
    /// # Errors
    ///
    /// Propagates embedding failures; artifact unavailability degrades to
    /// the hash-only tier and then an empty result.
    pub async fn search(
        &self,
        tm: &TranslationMemory,
        query: &CascadeQuery,
    ) -> Result<Vec<MatchHit>> {
        if query.source.trim().is_empty() {
            return Ok(Vec::new());
        }

        let artifacts = match self.artifacts.artifacts(tm.id).await {
            Ok(artifacts) => Some(artifacts),
            Err(TmError::IndexUnavailable(reason)) => {
                warn!(tm_id = tm.id, "cascade degraded to hash-only: {reason}");
                None
            }
            Err(e) => return Err(e),
        };

        let mut exact = self.tier_exact_from_repo(tm, query).await;
        if let Some(artifacts) = &artifacts {
            let from_artifacts = match tm.matching_mode {
                MatchingMode::Standard => Self::tier_exact_hash(artifacts, query),
                MatchingMode::StringId => Self::tier_exact_stringid(artifacts, query),
            };
            exact.extend(from_artifacts);
        }
        if !exact.is_empty() {
            return Ok(Self::finish(exact, query.limit));
        }

        let Some(artifacts) = artifacts else {
            // Hash-only mode found nothing; no lower tier is viable
            return Ok(Vec::new());
        };

        let semantic = self.tier_semantic_whole(&artifacts, query).await?;
        if !semantic.is_empty() {
            return Ok(Self::finish(semantic, query.limit));
        }

        if tm.matching_mode == MatchingMode::Standard {
            let stitched = Self::tier_line_hash(&artifacts, query);
            if !stitched.is_empty() {
                return Ok(Self::finish(stitched, query.limit));
            }
        }

        let stitched = self.tier_line_semantic(&artifacts, query).await?;
        if !stitched.is_empty() {
            return Ok(Self::finish(stitched, query.limit));
        }

        let fallback = Self::tier_ngram(&artifacts, query);
        Ok(Self::finish(fallback, query.limit))
    }

    /// Tier 1 against the live repository, so unindexed entries hit too
    async fn tier_exact_from_repo(
        &self,
        tm: &TranslationMemory,
        query: &CascadeQuery,
    ) -> Vec<Candidate> {
        let looked_up = match tm.matching_mode {
            MatchingMode::Standard => {
                self.repos
                    .tm_entries()
                    .search_hash(tm.id, &sha256_hex(&query.source))
                    .await
            }
            MatchingMode::StringId => match query.string_id.as_deref() {
                Some(string_id) => {
                    self.repos
                        .tm_entries()
                        .search_stringid(tm.id, string_id)
                        .await
                }
                None => Ok(Vec::new()),
            },
        };
        let entries = match looked_up {
            Ok(entries) => entries,
            Err(e) => {
                warn!(tm_id = tm.id, "repository exact lookup failed: {e}");
                return Vec::new();
            }
        };
        entries
            .into_iter()
            .filter(|entry| !entry.is_deleted())
            .map(|entry| Candidate {
                updated_at: entry.updated_at,
                hit: MatchHit {
                    entry_id: entry.id,
                    source: entry.source,
                    target: entry.target,
                    score: 1.0,
                    tier: MatchTier::ExactHash,
                    segments: Vec::new(),
                },
            })
            .collect()
    }

    /// Tier 1: exact whole-string hash
    fn tier_exact_hash(artifacts: &TmArtifacts, query: &CascadeQuery) -> Vec<Candidate> {
        let hash = sha256_hex(&query.source);
        Self::rows_to_candidates(artifacts, artifacts.whole_hash.get(&hash), MatchTier::ExactHash)
    }

    /// Tier 1 in string-id mode: exact lookup by string identifier
    fn tier_exact_stringid(artifacts: &TmArtifacts, query: &CascadeQuery) -> Vec<Candidate> {
        let Some(string_id) = query.string_id.as_deref() else {
            return Vec::new();
        };
        Self::rows_to_candidates(
            artifacts,
            artifacts.whole_stringid.get(string_id),
            MatchTier::ExactHash,
        )
    }

    fn rows_to_candidates(
        artifacts: &TmArtifacts,
        rows: Option<&Vec<u32>>,
        tier: MatchTier,
    ) -> Vec<Candidate> {
        rows.map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|&row| artifacts.whole_mapping.get(row as usize))
            .filter(|mapping| !mapping.tombstone)
            .map(|mapping| Candidate {
                hit: MatchHit {
                    entry_id: mapping.entry_id,
                    source: mapping.source.clone(),
                    target: mapping.target.clone(),
                    score: 1.0,
                    tier,
                    segments: Vec::new(),
                },
                updated_at: mapping.updated_at,
            })
            .collect()
    }

    /// Tier 2: semantic whole-string neighbours
    async fn tier_semantic_whole(
        &self,
        artifacts: &TmArtifacts,
        query: &CascadeQuery,
    ) -> Result<Vec<Candidate>> {
        let Some(index) = artifacts.whole_index.as_ref() else {
            return Ok(Vec::new());
        };
        let embedding = self.embeddings.embed_single(&query.source).await?;
        if embedding.len() != artifacts.meta.dimensions {
            warn!("query embedding dimension mismatch, skipping semantic tier");
            return Ok(Vec::new());
        }

        let k = self.top_k.max(query.limit);
        let hits = index.search(&embedding, k, artifacts.ann_params.ef_search);
        Ok(hits
            .into_iter()
            .filter(|(_, score)| *score >= query.threshold)
            .filter_map(|(row, score)| {
                let mapping = artifacts.whole_mapping.get(row)?;
                if mapping.tombstone {
                    return None;
                }
                Some(Candidate {
                    hit: MatchHit {
                        entry_id: mapping.entry_id,
                        source: mapping.source.clone(),
                        target: mapping.target.clone(),
                        score,
                        tier: MatchTier::SemanticWhole,
                        segments: Vec::new(),
                    },
                    updated_at: mapping.updated_at,
                })
            })
            .collect())
    }

    /// Tier 3: per-line exact hash with stitching
    ///
    /// Every line of the query must find an exact line match; the stitched
    /// target joins the per-line targets in query order.
    fn tier_line_hash(artifacts: &TmArtifacts, query: &CascadeQuery) -> Vec<Candidate> {
        let lines = indexable_lines(&query.source);
        if lines.len() < 2 {
            // A single line would just repeat tier 1
            return Vec::new();
        }

        let mut segments = Vec::with_capacity(lines.len());
        for (line_no, line) in &lines {
            let hash = sha256_hex(line);
            let found = artifacts
                .line_hash
                .get(&hash)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|&row| artifacts.line_mapping.get(row as usize))
                .find(|mapping| !mapping.tombstone);
            let Some(mapping) = found else {
                return Vec::new();
            };
            segments.push(SegmentHit {
                entry_id: mapping.entry_id,
                line_no: *line_no,
                source_line: (*line).to_string(),
                target_line: mapping.target_line.clone(),
                score: 1.0,
            });
        }

        let updated_at = Self::segments_updated_at(artifacts, &segments);
        Vec::from([Self::stitch(query, segments, 1.0, MatchTier::ExactLine, updated_at)])
    }

    /// Tier 4: per-line semantic neighbours with stitching
    async fn tier_line_semantic(
        &self,
        artifacts: &TmArtifacts,
        query: &CascadeQuery,
    ) -> Result<Vec<Candidate>> {
        let Some(index) = artifacts.line_index.as_ref() else {
            return Ok(Vec::new());
        };
        let lines = indexable_lines(&query.source);
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = lines.iter().map(|(_, l)| (*l).to_string()).collect();
        let embeddings = self.embeddings.embed_batch(&texts).await?;

        let mut segments = Vec::with_capacity(lines.len());
        let mut worst = 1.0f32;
        for ((line_no, line), embedding) in lines.iter().zip(&embeddings) {
            if embedding.len() != artifacts.meta.dimensions {
                return Ok(Vec::new());
            }
            let best = index
                .search(embedding, self.top_k, artifacts.ann_params.ef_search)
                .into_iter()
                .filter(|(_, score)| *score >= query.threshold)
                .find_map(|(row, score)| {
                    let mapping = artifacts.line_mapping.get(row)?;
                    (!mapping.tombstone).then(|| (mapping, score))
                });
            let Some((mapping, score)) = best else {
                return Ok(Vec::new());
            };
            worst = worst.min(score);
            segments.push(SegmentHit {
                entry_id: mapping.entry_id,
                line_no: *line_no,
                source_line: (*line).to_string(),
                target_line: mapping.target_line.clone(),
                score,
            });
        }

        let updated_at = Self::segments_updated_at(artifacts, &segments);
        Ok(Vec::from([Self::stitch(
            query,
            segments,
            worst,
            MatchTier::SemanticLine,
            updated_at,
        )]))
    }

    /// Tier 5: character n-gram fallback over the mapping's sources
    fn tier_ngram(artifacts: &TmArtifacts, query: &CascadeQuery) -> Vec<Candidate> {
        artifacts
            .whole_mapping
            .iter()
            .filter(|mapping| !mapping.tombstone)
            .filter_map(|mapping| {
                let score = dice_similarity(&query.source, &mapping.source);
                (score >= query.threshold).then(|| Candidate {
                    hit: MatchHit {
                        entry_id: mapping.entry_id,
                        source: mapping.source.clone(),
                        target: mapping.target.clone(),
                        score,
                        tier: MatchTier::Ngram,
                        segments: Vec::new(),
                    },
                    updated_at: mapping.updated_at,
                })
            })
            .collect()
    }

    fn stitch(
        query: &CascadeQuery,
        segments: Vec<SegmentHit>,
        score: f32,
        tier: MatchTier,
        updated_at: DateTime<Utc>,
    ) -> Candidate {
        let target = segments
            .iter()
            .map(|s| s.target_line.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let entry_id = segments.first().map_or(0, |s| s.entry_id);
        Candidate {
            hit: MatchHit {
                entry_id,
                source: query.source.clone(),
                target,
                score,
                tier,
                segments,
            },
            updated_at,
        }
    }

    fn segments_updated_at(artifacts: &TmArtifacts, segments: &[SegmentHit]) -> DateTime<Utc> {
        segments
            .iter()
            .filter_map(|s| {
                artifacts
                    .whole_mapping
                    .iter()
                    .find(|m| m.entry_id == s.entry_id)
                    .map(|m| m.updated_at)
            })
            .max()
            .unwrap_or_else(Utc::now)
    }

    /// Tie-break (score desc, recency desc, entry id asc), dedup, cap
    fn finish(candidates: Vec<Candidate>, limit: usize) -> Vec<MatchHit> {
        let mut candidates = candidates;
        candidates.sort_by(|a, b| {
            b.hit
                .score
                .partial_cmp(&a.hit.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.hit.entry_id.cmp(&b.hit.entry_id))
        });

        let mut seen: HashMap<EntityId, ()> = HashMap::new();
        let mut out = Vec::new();
        for candidate in candidates {
            if seen.insert(candidate.hit.entry_id, ()).is_some() {
                continue;
            }
            out.push(candidate.hit);
            if out.len() >= limit {
                break;
            }
        }
        debug!(hits = out.len(), "cascade finished");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(entry_id: EntityId, score: f32, age_secs: i64) -> Candidate {
        Candidate {
            updated_at: Utc::now() - Duration::seconds(age_secs),
            hit: MatchHit {
                entry_id,
                source: format!("source {entry_id}"),
                target: format!("target {entry_id}"),
                score,
                tier: MatchTier::Ngram,
                segments: Vec::new(),
            },
        }
    }

    #[test]
    fn test_tier_numbers() {
        assert_eq!(MatchTier::ExactHash.number(), 1);
        assert_eq!(MatchTier::SemanticWhole.number(), 2);
        assert_eq!(MatchTier::ExactLine.number(), 3);
        assert_eq!(MatchTier::SemanticLine.number(), 4);
        assert_eq!(MatchTier::Ngram.number(), 5);
    }

    #[test]
    fn test_finish_orders_by_score_then_recency_then_id() {
        let hits = CascadeMatcher::finish(
            vec![
                candidate(3, 0.8, 100),
                candidate(1, 0.9, 100),
                candidate(2, 0.9, 10),
                candidate(4, 0.9, 10),
            ],
            10,
        );
        let ids: Vec<EntityId> = hits.iter().map(|h| h.entry_id).collect();
        // Highest score first; among equals the most recent; then lowest id
        assert_eq!(ids, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_finish_dedups_and_caps() {
        let hits = CascadeMatcher::finish(
            vec![candidate(1, 0.9, 0), candidate(1, 0.8, 0), candidate(2, 0.7, 0)],
            1,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_id, 1);
        assert!((hits[0].score - 0.9).abs() < f32::EPSILON);
    }
}
