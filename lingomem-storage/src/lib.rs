//! # Storage layer for `lingomem`
//!
//! Concrete realisations of the repository contracts in `lingomem-core`:
//!
//! - **SQLite** (`sqlite`): the embedded engine, serving both the degraded
//!   mode (authoritative naming scheme) and the local shadow mode
//!   (`offline_` scheme) through a schema-aware table resolver
//! - **PostgreSQL** (`postgres`): the networked authoritative store with
//!   refinery-managed schema and the trigram similarity capability
//! - **Factory** (`factory`): per-request mode detection with a single
//!   degraded failover
//! - **Bridge** (`bridge`): dual-record identity of the "Offline Storage"
//!   scope across backends
//! - **Maintenance** (`maintenance`): trash retention, entry count audit,
//!   tombstone scans

pub mod bridge;
pub mod factory;
pub mod maintenance;
pub mod postgres;
pub mod sqlite;

// Re-exports for convenience
pub use bridge::{ensure_authoritative, local_sentinels, record_remote_ids, OfflineScopeIds};
pub use factory::RepositoryFactory;
pub use maintenance::{MaintenanceConfig, MaintenanceDaemon, MaintenanceReport};
pub use postgres::{PostgresBackend, PostgresRepositorySet};
pub use sqlite::resolver::SchemaMode;
pub use sqlite::{SqliteBackend, SqliteRepositorySet};
