//! Purpose-specific pipelines and their shared vocabulary.
//!
//! Each purpose module exposes `run(env, corpus)`, which turns an embedded
//! [`Corpus`] into themes plus a purpose report. The router wraps the result
//! with cost accounting, truncation and provenance checks.

pub mod exploratory;
pub mod grounded;
pub mod saturation;
pub mod survey;
pub mod synthesis;

use serde::{Deserialize, Serialize};
use themex_core::{
    CountRange, EngineResult, Excerpt, Purpose, RetryPolicy, RunContext, RunId, RunUsage,
    SourceDocument, Theme,
};
use themex_embeddings::EmbeddingOrchestrator;
use themex_settings::PipelineSettings;

use crate::assist::{AssistRouter, ThemeLabel, label_request};
use crate::provenance::{Corpus, ThemeDraft};

pub use exploratory::ExploratoryReport;
pub use grounded::{CategorySummary, GroundedReport, Relationship};
pub use saturation::{PowerLawFit, Robustness, SaturationReport, SaturationVerdict};
pub use survey::{ConstructValidity, SurveyReport};
pub use synthesis::{
    EdgeKind, GraphEdge, GraphNode, NodeKind, Refutation, SynthesisGraph, SynthesisReport,
};

/// Excerpts and sources handed to a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInput {
    /// Ranked excerpts, embedded or not.
    pub excerpts: Vec<Excerpt>,
    /// Originating documents.
    #[serde(default)]
    pub sources: Vec<SourceDocument>,
}

/// Collaborators a pipeline may use.
#[derive(Clone, Copy)]
pub struct PipelineEnv<'a> {
    /// The run.
    pub ctx: &'a RunContext,
    /// Assisted sub-steps.
    pub assist: &'a AssistRouter,
    /// Embeds derived text (atomic splits); `None` disables such steps.
    pub embedder: Option<&'a EmbeddingOrchestrator>,
    /// Thresholds.
    pub settings: &'a PipelineSettings,
    /// Retry policy for provider calls.
    pub retry: &'a RetryPolicy,
}

/// Resource usage reported with every output.
pub type CostReport = RunUsage;

/// Category of a quality warning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Fewer themes than the purpose targets.
    BelowTarget,
    /// More themes than the purpose targets.
    AboveTarget,
    /// Some themes are more similar than the diversity threshold allows.
    LowDiversity,
    /// Every candidate failed a statistical gate; best-available set kept.
    QualityGate,
    /// Too few sources are represented.
    LowCoverage,
    /// Excerpts were dropped (rejected embedding or validation).
    DroppedExcerpts,
    /// Result depends on source order.
    OrderDependent,
    /// Work was cut short by budget or deadline.
    Truncated,
    /// A theme failed provenance verification.
    Provenance,
}

/// A non-fatal problem with a result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityWarning {
    /// Category.
    pub kind: WarningKind,
    /// Human-readable detail.
    pub message: String,
}

impl QualityWarning {
    /// Create a warning.
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Purpose-specific analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "purpose", rename_all = "snake_case")]
pub enum PurposeReport {
    /// Concourse construction.
    Exploratory(ExploratoryReport),
    /// Construct validation.
    Survey(SurveyReport),
    /// Saturation detection.
    Saturation(SaturationReport),
    /// Literature synthesis.
    Synthesis(SynthesisReport),
    /// Grounded theory.
    Grounded(GroundedReport),
}

impl PurposeReport {
    /// The purpose this report belongs to.
    pub fn purpose(&self) -> Purpose {
        match self {
            Self::Exploratory(_) => Purpose::Exploratory,
            Self::Survey(_) => Purpose::Survey,
            Self::Saturation(_) => Purpose::Saturation,
            Self::Synthesis(_) => Purpose::Synthesis,
            Self::Grounded(_) => Purpose::Grounded,
        }
    }
}

/// Result of one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    /// Run that produced (or served) this output.
    pub run_id: RunId,
    /// Purpose.
    pub purpose: Purpose,
    /// Themes, constructs, categories or meta-themes.
    pub themes: Vec<Theme>,
    /// Purpose-specific analysis.
    pub report: PurposeReport,
    /// Resource usage.
    pub cost: CostReport,
    /// Non-fatal problems.
    #[serde(default)]
    pub warnings: Vec<QualityWarning>,
    /// Some stage stopped short of its full work.
    pub truncated: bool,
    /// Served from the semantic cache.
    #[serde(default)]
    pub from_cache: bool,
}

impl PipelineOutput {
    /// Whether any warning of `kind` is attached.
    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}

/// What a purpose module hands back to the router.
#[derive(Debug)]
pub struct PipelineResult {
    /// Themes.
    pub themes: Vec<Theme>,
    /// Report.
    pub report: PurposeReport,
    /// Warnings raised so far.
    pub warnings: Vec<QualityWarning>,
    /// The corpus the themes index into, after any splitting.
    pub corpus: Corpus,
}

/// Name every group, batched through the assist router.
///
/// The result is aligned with `groups`.
pub(crate) async fn label_groups(
    env: &PipelineEnv<'_>,
    corpus: &Corpus,
    groups: &[Vec<usize>],
    batch_size: usize,
) -> EngineResult<Vec<ThemeLabel>> {
    let requests: Vec<_> = groups
        .iter()
        .enumerate()
        .map(|(key, members)| label_request(key, &corpus.representative_texts(members, 8)))
        .collect();
    let mut labels = Vec::with_capacity(groups.len());
    for batch in requests.chunks(batch_size.max(1)) {
        labels.extend(env.assist.label_themes(env.ctx, batch).await?);
    }
    labels.sort_by_key(|l| l.key);
    Ok(labels)
}

/// Draft from a label plus quality and metrics.
pub(crate) fn draft(label: &ThemeLabel, quality: f64, metrics: impl IntoIterator<Item = (&'static str, f64)>) -> ThemeDraft {
    ThemeDraft {
        label: label.label.clone(),
        description: label.description.clone(),
        quality,
        metrics: metrics.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
    }
}

/// Warning when `count` falls outside `target`.
pub(crate) fn count_warning(count: usize, target: CountRange, noun: &str) -> Option<QualityWarning> {
    if count < target.min {
        Some(QualityWarning::new(
            WarningKind::BelowTarget,
            format!("{count} {noun} found; target is {}-{}", target.min, target.max),
        ))
    } else if count > target.max {
        Some(QualityWarning::new(
            WarningKind::AboveTarget,
            format!("{count} {noun} found; target is {}-{}", target.min, target.max),
        ))
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_warning_bounds() {
        let t = CountRange::new(8, 12);
        assert!(count_warning(10, t, "constructs").is_none());
        assert_eq!(count_warning(3, t, "constructs").unwrap().kind, WarningKind::BelowTarget);
        assert_eq!(count_warning(13, t, "constructs").unwrap().kind, WarningKind::AboveTarget);
    }

    #[test]
    fn report_is_tagged_by_purpose() {
        let report = PurposeReport::Survey(SurveyReport::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["purpose"], "survey");
        assert_eq!(report.purpose(), Purpose::Survey);
    }
}
