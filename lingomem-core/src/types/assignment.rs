//! TM-to-scope assignments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::types::ScopeRef;

/// Links a TM into a scope with a priority
///
/// Assignments are owned by neither end: a TM delete removes them, a scope
/// delete or explicit revoke merely deactivates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: EntityId,
    pub tm_id: EntityId,
    pub scope: ScopeRef,
    pub active: bool,
    /// Lower value wins within a scope level
    pub priority: i32,
    pub assigned_by: EntityId,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation payload for an assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssignment {
    pub tm_id: EntityId,
    pub scope: ScopeRef,
    #[serde(default)]
    pub priority: i32,
}
