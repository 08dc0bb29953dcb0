//! # themex-engine
//!
//! Purpose-specific thematic extraction over embedded excerpts.
//!
//! - **Engine**: [`ThemeEngine`] runs an [`ExtractionRequest`] inside the
//!   extraction bulkhead with a semantic cache in front
//! - **Pipelines**: exploratory, survey, saturation, synthesis, grounded
//!   ([`pipeline`]), dispatched by [`router::run_pipeline`]
//! - **Assist**: assistant-backed and heuristic labeling, splitting, coding
//!   and framework drafting behind one budget-aware router
//! - **Provenance**: every theme traces to its excerpts and sources
//! - **Semantic cache**: similarity-keyed result reuse

#![deny(unsafe_code)]

pub mod assist;
pub mod embed;
pub mod engine;
pub mod pipeline;
pub mod provenance;
pub mod router;
pub mod semantic_cache;
pub mod text;

pub use assist::{AssistRouter, CodeType, HeuristicAssist, LlmAssist};
pub use engine::{ExtractionRequest, ThemeEngine};
pub use pipeline::{
    CostReport, PipelineInput, PipelineOutput, PurposeReport, QualityWarning, WarningKind,
};
pub use provenance::{Corpus, verify_provenance};
pub use semantic_cache::{SemanticCache, SemanticCacheStats, SemanticHit};
