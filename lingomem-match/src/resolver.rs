//! Assignment resolver
//!
//! Walks a file's scope chain from most to least specific (folder ancestors,
//! project, platform), collecting active assignments per level. A TM that
//! reappears at a broader level is shadowed by its more specific assignment;
//! assignments pointing at vanished TMs are skipped with a log line.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use lingomem_core::error::{Result, TmError};
use lingomem_core::ids::EntityId;
use lingomem_core::repository::RepositorySet;
use lingomem_core::types::{ScopeRef, TranslationMemory};

/// One TM in resolution order, with the scope that won it its place
#[derive(Debug, Clone)]
pub struct ResolvedTm {
    pub tm: TranslationMemory,
    pub scope: ScopeRef,
    pub priority: i32,
}

/// Computes the ordered list of TMs to consult for a file
pub struct AssignmentResolver {
    repos: Arc<dyn RepositorySet>,
}

impl AssignmentResolver {
    #[must_use]
    pub const fn new(repos: Arc<dyn RepositorySet>) -> Self {
        Self { repos }
    }

    /// Scope chain of a file, most specific first
    async fn scope_chain(&self, file_id: EntityId) -> Result<Vec<ScopeRef>> {
        let file = self.repos.files().get(file_id).await?;
        let mut scopes = Vec::new();

        if let Some(folder_id) = file.folder_id {
            match self.repos.folders().ancestors(folder_id).await {
                Ok(chain) => scopes.extend(chain.into_iter().map(|f| ScopeRef::Folder(f.id))),
                Err(e) => {
                    // A broken folder chain truncates, it does not fail the file
                    warn!(file_id, "folder chain unavailable: {e}");
                }
            }
        }

        scopes.push(ScopeRef::Project(file.project_id));

        match self.repos.projects().get(file.project_id).await {
            Ok(project) => {
                if let Some(platform_id) = project.platform_id {
                    scopes.push(ScopeRef::Platform(platform_id));
                }
            }
            Err(TmError::NotFound(_)) => {
                debug!(file_id, "project missing, chain terminates at folder level");
            }
            Err(e) => return Err(e),
        }

        Ok(scopes)
    }

    /// The ordered, deduplicated list of active TMs for a file
    ///
    /// Earlier positions correspond to more specific scopes, and to lower
    /// priority within the same scope level.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the file itself is missing; scope-chain gaps
    /// degrade instead of failing.
    pub async fn resolve_active_tms(&self, file_id: EntityId) -> Result<Vec<ResolvedTm>> {
        let scopes = self.scope_chain(file_id).await?;

        let mut seen: HashSet<EntityId> = HashSet::new();
        let mut resolved = Vec::new();
        for scope in scopes {
            let assignments = self.repos.assignments().list_for_scope(scope).await?;
            for assignment in assignments {
                if seen.contains(&assignment.tm_id) {
                    // Shadowed by a more specific scope
                    continue;
                }
                match self.repos.tms().get(assignment.tm_id).await {
                    Ok(tm) => {
                        seen.insert(tm.id);
                        resolved.push(ResolvedTm {
                            tm,
                            scope,
                            priority: assignment.priority,
                        });
                    }
                    Err(TmError::NotFound(_)) => {
                        warn!(
                            assignment_id = assignment.id,
                            tm_id = assignment.tm_id,
                            "assignment points at a vanished TM, skipping"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        debug!(file_id, count = resolved.len(), "resolved active TMs");
        Ok(resolved)
    }
}
