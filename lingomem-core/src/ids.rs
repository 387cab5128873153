//! Surrogate identifiers and reserved sentinels
//!
//! Every entity carries an `i64` surrogate id. The local backend reserves
//! negative ids for the "Offline Storage" shadow scope, so nothing in the
//! core may assume positive-only ids.

/// Surrogate identifier for any persisted entity
pub type EntityId = i64;

/// Well-known name of the reserved offline scope, identical in both backends
pub const OFFLINE_STORAGE_NAME: &str = "Offline Storage";

/// Sentinel id of the "Offline Storage" platform in the local schema
pub const OFFLINE_PLATFORM_LOCAL_ID: EntityId = -100;

/// Sentinel id of the "Offline Storage" default project in the local schema
pub const OFFLINE_PROJECT_LOCAL_ID: EntityId = -101;

/// Credential prefix that selects the local shadow backend
pub const OFFLINE_CREDENTIAL_PREFIX: &str = "offline:";
