//! Matching and ranking layer: fuzzy entity→gallery matching, embedding
//! cache and providers, cosine-similarity ranking.

pub mod cache;
pub mod client;
mod error;
pub mod matcher;
pub mod provider;
pub mod similarity;

pub use cache::{CacheKey, EmbeddingCache, EmbeddingKind};
pub use client::EmbeddingClient;
pub use error::{EmbeddingError, MatchError, SimilarityError};
pub use matcher::{GalleryMatch, MatchStrategy, match_gallery};
pub use provider::{
    EmbeddingProvider, HealthStatus, JobHttpProvider, PollPolicy, SyncHttpProvider, build_provider,
};
pub use similarity::{cosine_similarity, dot, magnitude, rank, top_k_by_similarity};
