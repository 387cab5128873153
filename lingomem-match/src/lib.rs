//! # Matching layer for `lingomem`
//!
//! The read side of the translation memory engine:
//! - **Cascade** (`cascade`): the fixed five-tier lookup over a TM's index
//!   artifacts, with string-id mode and line stitching
//! - **N-gram** (`ngram`): the character-bigram Dice scoring of the last tier
//! - **Resolver** (`resolver`): the scope-chain walk that orders the TMs a
//!   file consults
//! - **Search** (`search`): the file-level composition of both

pub mod cascade;
pub mod ngram;
pub mod resolver;
pub mod search;

// Re-exports for convenience
pub use cascade::{CascadeMatcher, CascadeQuery, MatchHit, MatchTier, SegmentHit};
pub use ngram::dice_similarity;
pub use resolver::{AssignmentResolver, ResolvedTm};
pub use search::{FileMatch, SearchOptions, TmSearchService};
