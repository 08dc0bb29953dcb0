//! # themex-core
//!
//! Foundation types for the themex thematic-extraction engine.
//!
//! - **IDs**: branded newtypes (`RunId`, `ThemeId`, `ExcerptId`, `SourceId`)
//! - **Data model**: [`SourceDocument`], [`Excerpt`], [`Embedding`], [`Theme`], [`Purpose`]
//! - **Errors**: [`EngineError`] with stable kinds and user-safe messages
//! - **Runs**: [`RunContext`] carrying budget, deadline, cancellation, progress
//! - **Retry**: [`RetryPolicy`] and backoff math
//! - **Vector math**: norms, cosine similarity, means
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod embedding;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod run;
pub mod types;
pub mod vector;

pub use embedding::{Embedding, InvalidEmbedding};
pub use errors::{EngineError, EngineResult};
pub use ids::{ExcerptId, RunId, SourceId, ThemeId};
pub use progress::{ChannelSink, CollectingSink, NoopSink, ProgressEvent, ProgressSink, Stage};
pub use retry::{RetryPolicy, Retryable};
pub use run::{RunContext, RunUsage};
pub use types::{CountRange, Excerpt, ProvenanceLink, Purpose, SourceDocument, SourceType, Theme};
