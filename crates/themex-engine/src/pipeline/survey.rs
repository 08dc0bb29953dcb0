//! Survey-construct validation.
//!
//! Items are agglomerated bottom-up, and a merge is only admitted while the
//! merged group keeps its internal consistency (mean inter-item cosine) at
//! or above the threshold. Each surviving construct is then checked the way
//! a confirmatory factor analysis would be: member-to-centroid cosines stand
//! in for factor loadings, giving AVE and composite reliability, and the
//! Fornell–Larcker criterion rejects constructs that are not discriminant
//! from their siblings.

use serde::{Deserialize, Serialize};
use themex_cluster::metrics::{centroid, ici};
use themex_cluster::{AgglomerativeConfig, agglomerate};
use themex_core::vector::cosine_similarity;
use themex_core::{EngineResult, Stage, ThemeId};
use tracing::{debug, info, instrument};

use super::{
    PipelineEnv, PipelineResult, PurposeReport, QualityWarning, WarningKind, count_warning, draft,
    label_groups,
};
use crate::provenance::Corpus;

/// Validity statistics for one construct.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructValidity {
    /// Theme the statistics belong to.
    pub theme_id: ThemeId,
    /// Mean inter-item cosine.
    pub ici: f64,
    /// Simulated loadings, one per item.
    pub loadings: Vec<f64>,
    /// Average variance extracted.
    pub ave: f64,
    /// Composite reliability.
    pub composite_reliability: f64,
    /// Highest centroid correlation with a sibling construct.
    pub max_shared_correlation: f64,
    /// Whether √AVE exceeds every sibling correlation.
    pub discriminant_valid: bool,
}

/// Survey run summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyReport {
    /// Groups produced by agglomeration.
    pub candidate_groups: usize,
    /// Groups dropped for having too few items.
    pub dropped_small: usize,
    /// Constructs rejected for failing discriminant validity.
    pub rejected_discriminant: usize,
    /// Constructs cut to stay within the target.
    pub trimmed: usize,
    /// Mean ICI of the final constructs.
    pub mean_ici: f64,
    /// Per-construct statistics, aligned with the themes.
    pub constructs: Vec<ConstructValidity>,
}

#[derive(Clone, Debug)]
struct Scored {
    members: Vec<usize>,
    center: Vec<f32>,
    ici: f64,
    loadings: Vec<f64>,
    ave: f64,
    cr: f64,
    max_shared: f64,
    discriminant: bool,
}

/// Loadings, AVE and composite reliability for a member set.
fn factor_stats(points: &[Vec<f32>], members: &[usize], center: &[f32]) -> (Vec<f64>, f64, f64) {
    let loadings: Vec<f64> = members
        .iter()
        .map(|&i| f64::from(cosine_similarity(&points[i], center)).clamp(0.0, 1.0))
        .collect();
    if loadings.is_empty() {
        return (loadings, 0.0, 0.0);
    }
    let ave = loadings.iter().map(|l| l * l).sum::<f64>() / loadings.len() as f64;
    let sum: f64 = loadings.iter().sum();
    let error: f64 = loadings.iter().map(|l| 1.0 - l * l).sum();
    let denom = sum * sum + error;
    let cr = if denom > 0.0 { sum * sum / denom } else { 0.0 };
    (loadings, ave, cr)
}

/// Fill in sibling correlations and the Fornell–Larcker verdict.
fn discriminant_check(scored: &mut [Scored]) {
    let centers: Vec<Vec<f32>> = scored.iter().map(|s| s.center.clone()).collect();
    for (a, s) in scored.iter_mut().enumerate() {
        let max_shared = centers
            .iter()
            .enumerate()
            .filter(|(b, _)| *b != a)
            .map(|(_, c)| f64::from(cosine_similarity(&s.center, c)))
            .fold(0.0f64, f64::max);
        s.max_shared = max_shared;
        s.discriminant = s.ave.sqrt() > max_shared;
    }
}

/// Run the survey pipeline.
#[instrument(skip_all, fields(excerpts = corpus.len()))]
pub async fn run(env: &PipelineEnv<'_>, corpus: Corpus) -> EngineResult<PipelineResult> {
    let ctx = env.ctx;
    let s = &env.settings.survey;
    let threshold = f64::from(s.ici_threshold);
    let points = corpus.points();
    let mut warnings = Vec::new();
    let mut report = SurveyReport::default();

    ctx.check_cancelled()?;
    ctx.progress(Stage::Clustering, 30, format!("agglomerating {} items", corpus.len()));
    let groups = agglomerate(points, &AgglomerativeConfig::default(), |m| ici(points, m) >= threshold);
    report.candidate_groups = groups.len();

    let mut scored: Vec<Scored> = groups
        .into_iter()
        .filter(|m| m.len() >= s.min_items)
        .map(|members| {
            let center = centroid(points, &members);
            let (loadings, ave, cr) = factor_stats(points, &members, &center);
            Scored {
                ici: ici(points, &members),
                members,
                center,
                loadings,
                ave,
                cr,
                max_shared: 0.0,
                discriminant: false,
            }
        })
        .collect();
    report.dropped_small = report.candidate_groups - scored.len();
    debug!(candidates = report.candidate_groups, kept = scored.len(), "item groups scored");

    ctx.check_cancelled()?;
    ctx.progress(Stage::QualityGates, 55, "checking discriminant validity");
    discriminant_check(&mut scored);
    let (valid, invalid): (Vec<Scored>, Vec<Scored>) = scored.into_iter().partition(|c| c.discriminant);
    report.rejected_discriminant = invalid.len();
    let mut constructs = if valid.is_empty() && !invalid.is_empty() {
        warnings.push(QualityWarning::new(
            WarningKind::QualityGate,
            format!(
                "all {} constructs failed discriminant validity; returning the best available",
                invalid.len()
            ),
        ));
        invalid
    } else {
        valid
    };

    constructs.sort_by(|a, b| b.cr.total_cmp(&a.cr));
    if constructs.len() > s.target.max {
        report.trimmed = constructs.len() - s.target.max;
        constructs.truncate(s.target.max);
    }
    if let Some(w) = count_warning(constructs.len(), s.target, "constructs") {
        warnings.push(w);
    }
    if constructs.is_empty() {
        warnings.push(QualityWarning::new(
            WarningKind::QualityGate,
            format!("no item group reached {} items with ICI >= {threshold:.2}", s.min_items),
        ));
    }

    ctx.check_cancelled()?;
    ctx.progress(Stage::Labeling, 75, format!("labeling {} constructs", constructs.len()));
    let member_sets: Vec<Vec<usize>> = constructs.iter().map(|c| c.members.clone()).collect();
    let labels = label_groups(env, &corpus, &member_sets, s.label_batch_size).await?;

    let mut themes = Vec::with_capacity(constructs.len());
    for (c, label) in constructs.iter().zip(&labels) {
        let theme = corpus.build_theme(
            &c.members,
            draft(
                label,
                c.cr,
                [
                    ("ici", c.ici),
                    ("ave", c.ave),
                    ("compositeReliability", c.cr),
                    ("items", c.members.len() as f64),
                ],
            ),
        );
        report.constructs.push(ConstructValidity {
            theme_id: theme.id.clone(),
            ici: c.ici,
            loadings: c.loadings.clone(),
            ave: c.ave,
            composite_reliability: c.cr,
            max_shared_correlation: c.max_shared,
            discriminant_valid: c.discriminant,
        });
        themes.push(theme);
    }
    report.mean_ici = if constructs.is_empty() {
        0.0
    } else {
        constructs.iter().map(|c| c.ici).sum::<f64>() / constructs.len() as f64
    };

    info!(constructs = themes.len(), mean_ici = report.mean_ici, "survey pipeline complete");
    Ok(PipelineResult {
        themes,
        report: PurposeReport::Survey(report),
        warnings,
        corpus,
    })
}
