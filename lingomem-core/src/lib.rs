//! # Translation Memory Core for `lingomem`
//!
//! Core contracts and types for the translation memory engine:
//! - **Entities**: platforms, projects, folders, files, rows, TMs, entries,
//!   assignments, trash (`types`)
//! - **Repository contracts**: one async contract per entity kind plus the
//!   per-request [`repository::RepositorySet`] aggregate
//! - **Capabilities**: optional contracts (trigram similarity) implemented
//!   only where a backend can realise them
//! - **Embedding contract**: the process-wide provider the indexer and
//!   matcher share
//!
//! Concrete backends live in `lingomem-storage`; index construction in
//! `lingomem-index`; the cascade and resolver in `lingomem-match`.

pub mod config;
pub mod embedding;
pub mod error;
pub mod ids;
pub mod repository;
pub mod types;
pub mod viewer;

// Re-exports for convenience
pub use config::{BackendOverride, CoreConfig, EmbeddingProviderKind};
pub use embedding::EmbeddingProvider;
pub use error::{Result, TmError};
pub use ids::EntityId;
pub use repository::{BackendMode, RepositorySet};
pub use viewer::Viewer;
