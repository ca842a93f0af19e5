//! Embedding infrastructure for catalog matching.
//!
//! # Architecture
//!
//! - `embeddings`: provider trait and the fastembed-backed implementation
//! - `matrix`: catalog embedding matrix and the load-or-compute bootstrap
//! - `cache`: content-addressed cache trait and an in-memory store
//! - `storage`: binary file cache, one `.bin` per catalog fingerprint

pub mod cache;
pub mod embeddings;
pub mod matrix;
mod storage;

pub use cache::{CacheError, EmbeddingCache, MemoryCache};
pub use embeddings::{normalize, EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use matrix::{EmbeddingMatrix, MatrixError};
pub use storage::FileCache;

/// Default embedding model name (the sentence-transformers model ESCO matching was tuned on)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
