//! File-level search service composing resolver and cascade
//!
//! Resolves the candidate TM list for a file, then runs the cascade against
//! each TM in order, stopping at the first TM that produces acceptable hits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use lingomem_core::config::CoreConfig;
use lingomem_core::error::Result;
use lingomem_core::ids::EntityId;
use lingomem_core::repository::RepositorySet;

use crate::cascade::{CascadeMatcher, CascadeQuery, MatchHit};
use crate::resolver::AssignmentResolver;

/// A cascade hit annotated with the TM that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMatch {
    pub tm_id: EntityId,
    pub tm_name: String,
    pub hit: MatchHit,
}

/// Search parameters; unset fields fall back to configuration defaults
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub threshold: Option<f32>,
    pub limit: Option<usize>,
    pub string_id: Option<String>,
}

/// High-level search surface for routes and pre-translation jobs
pub struct TmSearchService {
    repos: Arc<dyn RepositorySet>,
    resolver: AssignmentResolver,
    matcher: CascadeMatcher,
    default_threshold: f32,
    default_limit: usize,
}

impl TmSearchService {
    #[must_use]
    pub fn new(
        repos: Arc<dyn RepositorySet>,
        matcher: CascadeMatcher,
        config: &CoreConfig,
    ) -> Self {
        Self {
            resolver: AssignmentResolver::new(Arc::clone(&repos)),
            repos,
            matcher,
            default_threshold: config.similarity_threshold_default,
            default_limit: config.cascade_limit_default,
        }
    }

    fn query(&self, source: &str, options: &SearchOptions) -> CascadeQuery {
        let mut query = CascadeQuery::new(
            source,
            options.threshold.unwrap_or(self.default_threshold),
            options.limit.unwrap_or(self.default_limit),
        );
        if let Some(string_id) = &options.string_id {
            query = query.with_string_id(string_id.clone());
        }
        query
    }

    /// Search one TM directly
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing TM; index unavailability degrades to
    /// an empty result inside the cascade.
    pub async fn search_tm(
        &self,
        tm_id: EntityId,
        source: &str,
        options: &SearchOptions,
    ) -> Result<Vec<MatchHit>> {
        let tm = self.repos.tms().get(tm_id).await?;
        self.matcher.search(&tm, &self.query(source, options)).await
    }

    /// Search the TMs assigned to a file, in resolution order
    ///
    /// TMs are consulted one by one; the first TM whose cascade produces
    /// hits wins and later TMs are not touched.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the file is missing.
    pub async fn search_file(
        &self,
        file_id: EntityId,
        source: &str,
        options: &SearchOptions,
    ) -> Result<Vec<FileMatch>> {
        let query = self.query(source, options);
        let resolved = self.resolver.resolve_active_tms(file_id).await?;

        for candidate in resolved {
            let hits = self.matcher.search(&candidate.tm, &query).await?;
            if hits.is_empty() {
                continue;
            }
            debug!(
                file_id,
                tm_id = candidate.tm.id,
                hits = hits.len(),
                "file search satisfied"
            );
            return Ok(hits
                .into_iter()
                .map(|hit| FileMatch {
                    tm_id: candidate.tm.id,
                    tm_name: candidate.tm.name.clone(),
                    hit,
                })
                .collect());
        }
        Ok(Vec::new())
    }

    /// Server-side trigram similarity over a TM's entry sources
    ///
    /// Only the authoritative backend carries this capability; everywhere
    /// else the lookup degrades to an empty result with an advisory log
    /// line, and callers treat that as "no match", not as an error.
    ///
    /// # Errors
    ///
    /// Propagates backend errors from a capable backend.
    pub async fn search_similar(
        &self,
        tm_id: EntityId,
        text: &str,
        options: &SearchOptions,
    ) -> Result<Vec<(lingomem_core::types::TmEntry, f32)>> {
        let Some(similarity) = self.repos.similarity() else {
            tracing::info!(
                mode = %self.repos.mode(),
                "trigram similarity unavailable in this mode, returning no matches"
            );
            return Ok(Vec::new());
        };
        similarity
            .search_similar(
                tm_id,
                text,
                options.threshold.unwrap_or(self.default_threshold),
                options.limit.unwrap_or(self.default_limit),
            )
            .await
    }

    /// The resolver, for callers that only need the TM list
    #[must_use]
    pub const fn resolver(&self) -> &AssignmentResolver {
        &self.resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_options_default_is_unset() {
        let options = SearchOptions::default();
        assert!(options.threshold.is_none());
        assert!(options.limit.is_none());
        assert!(options.string_id.is_none());
    }
}
