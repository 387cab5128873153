//! List filters and pagination

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::types::RowState;

/// Offset/limit pagination window
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

impl Pagination {
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

/// Filter for platform listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformFilter {
    /// Suppress the authoritative "Offline Storage" record when the local
    /// mirror is what the caller will show
    #[serde(default)]
    pub hide_shadowed: bool,
}

/// Filter for row listings within a file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowFilter {
    pub state: Option<RowState>,
    /// Substring match over source and target
    pub search: Option<String>,
}

/// Filter for TM listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TmFilter {
    pub owner_id: Option<EntityId>,
    pub name_contains: Option<String>,
}
