//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file only needs the keys it changes.

mod pipelines;
mod runtime;
mod services;

pub use pipelines::*;
pub use runtime::*;
pub use services::*;

use serde::{Deserialize, Serialize};
use themex_core::{CountRange, RetryPolicy};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "embedding": { "provider": "openai", "model": "text-embedding-3-small" },
///   "pipelines": { "survey": { "iciThreshold": 0.72 } }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThemexSettings {
    /// Embedding provider.
    pub embedding: EmbeddingSettings,
    /// Embedding and semantic caches.
    pub cache: CacheSettings,
    /// Generative-text assistant.
    pub assistant: AssistantSettings,
    /// Per-run limits.
    pub run: RunSettings,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
    /// Concurrency isolation.
    pub bulkhead: BulkheadSettings,
    /// Purpose-specific thresholds.
    pub pipelines: PipelineSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl ThemexSettings {
    /// Reject inverted ranges, zero capacities, and thresholds outside [0, 1].
    pub fn validate(&self) -> Result<()> {
        let e = &self.embedding;
        positive("embedding.batchSize", e.batch_size)?;
        positive("embedding.localConcurrency", e.local_concurrency)?;
        positive("embedding.remoteConcurrency", e.remote_concurrency)?;
        positive("embedding.dimensions", e.dimensions)?;

        let c = &self.cache;
        positive("cache.embeddingCapacity", c.embedding_capacity)?;
        positive("cache.semanticCapacity", c.semantic_capacity)?;
        unit("cache.semanticThreshold", f64::from(c.semantic_threshold))?;

        let b = &self.bulkhead;
        positive("bulkhead.searchPerUser", b.search_per_user)?;
        positive("bulkhead.searchGlobal", b.search_global)?;
        positive("bulkhead.extractionPerUser", b.extraction_per_user)?;
        positive("bulkhead.extractionGlobal", b.extraction_global)?;
        if b.failure_threshold == 0 {
            return Err(invalid("bulkhead.failureThreshold must be at least 1"));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.baseDelayMs must not exceed retry.maxDelayMs"));
        }
        unit("retry.jitterFactor", self.retry.jitter_factor)?;

        let x = &self.pipelines.exploratory;
        ordered("pipelines.exploratory.kMin", x.k_min, x.k_max)?;
        positive("pipelines.exploratory.kMin", x.k_min)?;
        range("pipelines.exploratory.target", x.target)?;
        unit("pipelines.exploratory.diversityThreshold", f64::from(x.diversity_threshold))?;
        unit("pipelines.exploratory.atomOverlapThreshold", x.atom_overlap_threshold)?;
        if x.coverage_factor < 0.0 {
            return Err(invalid("pipelines.exploratory.coverageFactor must not be negative"));
        }

        let s = &self.pipelines.survey;
        range("pipelines.survey.target", s.target)?;
        unit("pipelines.survey.iciThreshold", f64::from(s.ici_threshold))?;
        positive("pipelines.survey.minItems", s.min_items)?;

        let q = &self.pipelines.saturation;
        range("pipelines.saturation.target", q.target)?;
        unit("pipelines.saturation.noveltyThreshold", f64::from(q.novelty_threshold))?;
        unit("pipelines.saturation.reachedPosterior", q.reached_posterior)?;
        unit("pipelines.saturation.approachingPosterior", q.approaching_posterior)?;
        if q.approaching_posterior > q.reached_posterior {
            return Err(invalid(
                "pipelines.saturation.approachingPosterior must not exceed reachedPosterior",
            ));
        }
        positive("pipelines.saturation.window", q.window)?;

        let y = &self.pipelines.synthesis;
        range("pipelines.synthesis.target", y.target)?;
        unit("pipelines.synthesis.sourceThemeThreshold", f64::from(y.source_theme_threshold))?;
        unit("pipelines.synthesis.translationThreshold", f64::from(y.translation_threshold))?;
        unit(
            "pipelines.synthesis.lineOfArgumentThreshold",
            f64::from(y.line_of_argument_threshold),
        )?;
        unit("pipelines.synthesis.dedupThreshold", f64::from(y.dedup_threshold))?;
        unit("pipelines.synthesis.minCoverage", y.min_coverage)?;

        let g = &self.pipelines.grounded;
        range("pipelines.grounded.target", g.target)?;
        positive("pipelines.grounded.batchSize", g.batch_size)?;
        unit("pipelines.grounded.minConfidence", g.min_confidence)?;
        unit("pipelines.grounded.centralityWeight", g.centrality_weight)?;
        unit("pipelines.grounded.coverageWeight", g.coverage_weight)?;

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(msg.into())
}

fn unit(key: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{key} must be in [0, 1], got {value}")))
    }
}

fn positive(key: &str, value: usize) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(invalid(format!("{key} must be at least 1")))
    }
}

fn ordered(key: &str, min: usize, max: usize) -> Result<()> {
    if min <= max {
        Ok(())
    } else {
        Err(invalid(format!("{key} range is inverted: {min} > {max}")))
    }
}

fn range(key: &str, r: CountRange) -> Result<()> {
    ordered(key, r.min, r.max)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
