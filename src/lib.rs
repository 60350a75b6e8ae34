//! Content-aware incremental indexing and retrieval for FAQ-style knowledge
//! sources: re-collect periodically, re-embed only what changed, and serve
//! ranked semantic matches from a vector index.
//!
//! ```text
//! ContentExtractor ──► Vec<ContentUnit> ──► ContentTracker::diff ──► UnitDiff
//!                                                 │
//!                     NEW ∪ CHANGED ──► embedding::embed_in_batches
//!                                                 │
//!                     embedded units ──► stores::VectorIndex::upsert
//!                     REMOVED ids    ──► stores::VectorIndex::delete
//!                                                 │
//!                     confirmed mutations ──► tracker::TrackedState (durable)
//!
//! Queries ──► retrieval::RetrievalService ──► ranked RetrievalResults
//! Runs    ──► scheduler::run_on_interval (skip-if-busy)
//! ```
//!
pub mod config;
pub mod embedding;
pub mod extract;
pub mod pipeline;
pub mod retrieval;
pub mod scheduler;
pub mod stores;
pub mod tracker;
pub mod types;

pub use config::IndexerConfig;
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use extract::ContentExtractor;
pub use pipeline::{CancelHandle, IndexingPipeline, RunReport};
pub use retrieval::RetrievalService;
pub use stores::{
    InMemoryVectorIndex, PointRecord, RetryingIndex, SearchFilter, SqliteVectorIndex, VectorIndex,
};
pub use tracker::{ContentTracker, TrackedState, UnitDiff};
pub use types::{ContentUnit, Fingerprint, IndexError, RetrievalResult};
