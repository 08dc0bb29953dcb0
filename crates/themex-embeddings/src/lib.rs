//! # themex-embeddings
//!
//! Embedding generation for the themex engine.
//!
//! - [`EmbeddingProvider`]: local server, OpenAI-compatible API, or
//!   deterministic hash vectors
//! - [`EmbeddingCache`]: bounded LRU keyed by `SHA-256(model, text)` with TTL
//! - [`EmbeddingOrchestrator`]: cache-first lookup, deduplicated batching,
//!   bounded fan-out, and norm validation

#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod provider;

pub use cache::{CacheStats, EmbeddingCache};
pub use config::EmbeddingConfig;
pub use errors::{EmbeddingError, Result};
pub use orchestrator::{BatchEmbeddings, EmbeddingOrchestrator, ProviderInfo};
pub use provider::{
    EmbeddingProvider, HashEmbeddingProvider, LocalEmbeddingProvider, OpenAiEmbeddingProvider,
    ProviderKind, build_provider,
};
