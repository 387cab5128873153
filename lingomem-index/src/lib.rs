//! # Index layer for `lingomem`
//!
//! Everything between a TM's entries and the artifacts the cascade matcher
//! reads:
//! - **Providers**: deterministic local embedding providers (`providers`)
//! - **Artifacts**: the per-TM on-disk artifact set with atomic directory
//!   swap (`artifacts`)
//! - **Vector index**: the HNSW wrapper (`vector`)
//! - **Indexer**: the background service building and maintaining artifacts
//!   (`indexer`)
//!
//! ## Build pipeline
//!
//! ```text
//! TmEntryRepository::get_all
//!   └── build_artifacts / append_entries   (batched embedding, cancellable)
//!         └── ArtifactStore::save          (staging dir + atomic swap)
//!               └── ArtifactCache          (LRU, shared with the matcher)
//! ```

pub mod artifacts;
pub mod cache;
pub mod hashing;
pub mod indexer;
pub mod providers;
pub mod service;
pub mod vector;

// Re-exports for convenience
pub use artifacts::{ArtifactProvider, ArtifactStore, LineMapping, TmArtifacts, WholeMapping};
pub use cache::ArtifactCache;
pub use hashing::{indexable_lines, sha256_hex};
pub use indexer::{BuildOptions, IndexJob, IndexStatus, IndexerConfig, IndexerService};
pub use providers::{provider_for, HashedNgramEmbedding};
pub use service::EmbeddingService;
pub use vector::{AnnParams, VectorIndex};
