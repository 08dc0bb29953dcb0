//! Qualitative saturation detection.
//!
//! Sources are folded in one at a time. Each excerpt joins the nearest
//! existing theme when it is similar enough, otherwise it opens a new one,
//! and the number of new themes per source forms the saturation curve.
//! Three lines of evidence are combined into a verdict:
//!
//! - a Beta-posterior that the next source adds nothing, over a trailing
//!   window of sources;
//! - a power-law fit `T(n) = a·n^b` of cumulative themes, which predicts
//!   where the marginal yield drops below a threshold;
//! - a permutation check of how many source orders end saturated.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use themex_cluster::metrics::{centroid, cohesion};
use themex_cluster::{Candidate, merge_to_at_most};
use themex_core::vector::cosine_similarity;
use themex_core::{EngineResult, SourceId, Stage};
use tracing::{debug, info, instrument};

use super::{
    PipelineEnv, PipelineResult, PurposeReport, QualityWarning, WarningKind, count_warning, draft,
    label_groups,
};
use crate::provenance::Corpus;

/// Overall saturation verdict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationVerdict {
    /// New sources no longer add themes.
    Reached,
    /// Close to saturation.
    Approaching,
    /// Sources still add themes.
    #[default]
    NotReached,
}

/// Least-squares fit of `T(n) = a·n^b` in log-log space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerLawFit {
    /// Scale.
    pub a: f64,
    /// Exponent.
    pub b: f64,
    /// Goodness of fit in log space.
    pub r_squared: f64,
}

impl PowerLawFit {
    /// Fit cumulative counts, where `cumulative[i]` is `T(i + 1)`.
    ///
    /// Points with a zero count are skipped. Needs two usable points.
    pub fn fit(cumulative: &[usize]) -> Option<Self> {
        let pts: Vec<(f64, f64)> = cumulative
            .iter()
            .enumerate()
            .filter(|(_, t)| **t > 0)
            .map(|(i, &t)| (((i + 1) as f64).ln(), (t as f64).ln()))
            .collect();
        if pts.len() < 2 {
            return None;
        }
        let n = pts.len() as f64;
        let mx = pts.iter().map(|p| p.0).sum::<f64>() / n;
        let my = pts.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = pts.iter().map(|p| (p.0 - mx).powi(2)).sum();
        if sxx <= 0.0 {
            return None;
        }
        let sxy: f64 = pts.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
        let b = sxy / sxx;
        let intercept = my - b * mx;
        let ss_tot: f64 = pts.iter().map(|p| (p.1 - my).powi(2)).sum();
        let ss_res: f64 = pts.iter().map(|p| (p.1 - (intercept + b * p.0)).powi(2)).sum();
        let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };
        Some(Self {
            a: intercept.exp(),
            b,
            r_squared,
        })
    }

    /// Source count at which `dT/dn = a·b·n^(b-1)` drops below `marginal`.
    ///
    /// A non-positive exponent means nothing new after the first source; an
    /// exponent of one or more never flattens.
    pub fn saturation_point(&self, marginal: f64) -> Option<f64> {
        if self.b <= 0.0 {
            return Some(1.0);
        }
        if self.b >= 1.0 || self.a <= 0.0 || marginal <= 0.0 {
            return None;
        }
        let n = (marginal / (self.a * self.b)).powf(1.0 / (self.b - 1.0));
        n.is_finite().then_some(n.max(1.0))
    }
}

/// Order-robustness check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Robustness {
    /// Shuffled orders evaluated.
    pub permutations: usize,
    /// Share of orders saturated at the end.
    pub saturated_fraction: f64,
    /// Whether the verdict hinges on source order.
    pub order_dependent: bool,
}

/// Saturation run summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaturationReport {
    /// Verdict.
    pub verdict: SaturationVerdict,
    /// Posterior probability that the next source adds no theme.
    pub posterior: f64,
    /// Sources in fold order.
    pub source_order: Vec<SourceId>,
    /// New themes contributed by each source.
    pub new_themes_per_source: Vec<usize>,
    /// Cumulative theme count after each source.
    pub cumulative_themes: Vec<usize>,
    /// Power-law fit, when one was possible.
    pub power_law: Option<PowerLawFit>,
    /// Predicted saturation point in sources.
    pub predicted_saturation_point: Option<f64>,
    /// Permutation check.
    pub robustness: Robustness,
}

/// Outcome of folding sources in a given order.
#[derive(Debug, Default)]
struct Fold {
    themes: Vec<Vec<usize>>,
    /// Source position (in fold order) that opened each theme.
    opened_by: Vec<usize>,
    new_per_source: Vec<usize>,
}

/// Fold source groups in the given order.
fn fold(points: &[Vec<f32>], groups: &[&[usize]], threshold: f32) -> Fold {
    let mut out = Fold::default();
    let mut sums: Vec<Vec<f32>> = Vec::new();
    for (pos, members) in groups.iter().enumerate() {
        let mut new_here = 0;
        for &i in *members {
            let best = sums
                .iter()
                .enumerate()
                .map(|(t, sum)| (t, cosine_similarity(&points[i], sum)))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            match best {
                Some((t, sim)) if sim >= threshold => {
                    for (s, x) in sums[t].iter_mut().zip(&points[i]) {
                        *s += x;
                    }
                    out.themes[t].push(i);
                }
                _ => {
                    sums.push(points[i].clone());
                    out.themes.push(vec![i]);
                    out.opened_by.push(pos);
                    new_here += 1;
                }
            }
        }
        out.new_per_source.push(new_here);
    }
    out
}

/// Mean of `Beta(1 + no_new, 1 + new)` over the trailing `window` sources.
fn posterior(new_per_source: &[usize], window: usize) -> f64 {
    let w = window.min(new_per_source.len());
    if w == 0 {
        return 0.0;
    }
    let tail = &new_per_source[new_per_source.len() - w..];
    let quiet = tail.iter().filter(|&&n| n == 0).count();
    (1.0 + quiet as f64) / (2.0 + w as f64)
}

fn cumulative(new_per_source: &[usize]) -> Vec<usize> {
    new_per_source
        .iter()
        .scan(0, |acc, n| {
            *acc += n;
            Some(*acc)
        })
        .collect()
}

/// Run the saturation pipeline.
#[instrument(skip_all, fields(excerpts = corpus.len()))]
pub async fn run(env: &PipelineEnv<'_>, corpus: Corpus) -> EngineResult<PipelineResult> {
    let ctx = env.ctx;
    let s = &env.settings.saturation;
    let points = corpus.points();
    let mut warnings = Vec::new();

    ctx.check_cancelled()?;
    ctx.progress(Stage::Clustering, 30, "folding sources");
    let by_source = corpus.by_source();
    let groups: Vec<&[usize]> = by_source.iter().map(|(_, m)| m.as_slice()).collect();
    let base = fold(points, &groups, s.novelty_threshold);
    let cumulative_themes = cumulative(&base.new_per_source);
    let post = posterior(&base.new_per_source, s.window);

    ctx.check_cancelled()?;
    ctx.progress(Stage::Analysis, 50, "modelling the saturation curve");
    let power_law = PowerLawFit::fit(&cumulative_themes);
    let predicted = power_law.and_then(|f| f.saturation_point(s.marginal_threshold));

    let mut rng = StdRng::seed_from_u64(ctx.seed());
    let mut order: Vec<usize> = (0..groups.len()).collect();
    let (mut saturated, mut done) = (0usize, 0usize);
    for p in 0..s.permutations {
        if p % 10 == 0 {
            ctx.check_cancelled()?;
            // Past the deadline the check reports on the orders tried so far.
            if ctx.deadline_exceeded() {
                debug!(done, "deadline reached during permutation check");
                break;
            }
        }
        order.shuffle(&mut rng);
        let shuffled: Vec<&[usize]> = order.iter().map(|&g| groups[g]).collect();
        let trial = fold(points, &shuffled, s.novelty_threshold);
        if posterior(&trial.new_per_source, s.window) >= s.reached_posterior {
            saturated += 1;
        }
        done += 1;
    }
    let saturated_fraction = if done == 0 {
        0.0
    } else {
        saturated as f64 / done as f64
    };
    let robustness = Robustness {
        permutations: done,
        saturated_fraction,
        order_dependent: done > 0 && saturated_fraction > 0.2 && saturated_fraction < 0.8,
    };
    if robustness.order_dependent {
        warnings.push(QualityWarning::new(
            WarningKind::OrderDependent,
            format!(
                "{:.0}% of source orders end saturated; the verdict depends on order",
                saturated_fraction * 100.0
            ),
        ));
    }

    let sources = groups.len() as f64;
    let verdict = if post >= s.reached_posterior {
        SaturationVerdict::Reached
    } else if post >= s.approaching_posterior || predicted.is_some_and(|n| n <= s.prediction_slack * sources) {
        SaturationVerdict::Approaching
    } else {
        SaturationVerdict::NotReached
    };
    debug!(posterior = post, ?predicted, ?verdict, saturated_fraction, "saturation assessed");

    ctx.progress(Stage::QualityGates, 65, "bounding theme count");
    let mut candidates: Vec<Candidate> = base
        .themes
        .iter()
        .enumerate()
        .map(|(id, members)| {
            let center = centroid(points, members);
            Candidate {
                id,
                quality: cohesion(points, members, &center),
                members: members.clone(),
                centroid: center,
            }
        })
        .collect();
    if candidates.len() > s.target.max {
        candidates = merge_to_at_most(candidates, s.target.max);
    }
    // Present themes in the order they emerged.
    candidates.sort_by_key(|c| (base.opened_by[c.id], c.id));
    if let Some(w) = count_warning(candidates.len(), s.target, "themes") {
        warnings.push(w);
    }

    ctx.check_cancelled()?;
    ctx.progress(Stage::Labeling, 80, format!("labeling {} themes", candidates.len()));
    let member_sets: Vec<Vec<usize>> = candidates.iter().map(|c| c.members.clone()).collect();
    let labels = label_groups(env, &corpus, &member_sets, s.label_batch_size).await?;
    let themes: Vec<_> = candidates
        .iter()
        .zip(&labels)
        .map(|(c, label)| {
            let sources_touched = corpus.sources_of(&c.members).len() as f64;
            corpus.build_theme(
                &c.members,
                draft(
                    label,
                    c.quality,
                    [
                        ("cohesion", c.quality),
                        ("firstSource", (base.opened_by[c.id] + 1) as f64),
                        ("sources", sources_touched),
                    ],
                ),
            )
        })
        .collect();

    info!(themes = themes.len(), ?verdict, posterior = post, "saturation pipeline complete");
    let report = SaturationReport {
        verdict,
        posterior: post,
        source_order: by_source.into_iter().map(|(id, _)| id).collect(),
        new_themes_per_source: base.new_per_source,
        cumulative_themes,
        power_law,
        predicted_saturation_point: predicted,
        robustness,
    };
    Ok(PipelineResult {
        themes,
        report: PurposeReport::Saturation(report),
        warnings,
        corpus,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::AssistRouter;
    use crate::pipeline::testing::{excerpt, near_axis, rng, sources};
    use themex_core::{Purpose, RetryPolicy, RunContext};
    use themex_settings::PipelineSettings;

    #[test]
    fn posterior_over_trailing_window() {
        assert!((posterior(&[3, 2, 0, 0, 0, 0, 0], 5) - 6.0 / 7.0).abs() < 1e-12);
        assert!((posterior(&[3, 2, 1], 5) - 1.0 / 5.0).abs() < 1e-12);
        assert_eq!(posterior(&[], 5), 0.0);
    }

    #[test]
    fn power_law_recovers_exponent() {
        let cum: Vec<usize> = (1..=10).map(|n| (10.0 * (n as f64).sqrt()).round() as usize).collect();
        let fit = PowerLawFit::fit(&cum).unwrap();
        assert!((fit.b - 0.5).abs() < 0.05, "b = {}", fit.b);
        assert!(fit.r_squared > 0.99);
        // 10 * 0.5 * n^-0.5 < 0.5  =>  n > 100
        let n = fit.saturation_point(0.5).unwrap();
        assert!((50.0..200.0).contains(&n), "n = {n}");
    }

    #[test]
    fn flat_curve_saturates_immediately() {
        let fit = PowerLawFit::fit(&[4, 4, 4, 4]).unwrap();
        assert!(fit.b.abs() < 1e-12);
        assert_eq!(fit.saturation_point(0.5), Some(1.0));
        assert!(PowerLawFit::fit(&[3]).is_none());
    }

    #[test]
    fn fold_opens_and_joins() {
        let pts = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.99, 0.1], vec![0.1, 0.99]];
        let groups: Vec<&[usize]> = vec![&[0, 1], &[2, 3]];
        let f = fold(&pts, &groups, 0.75);
        assert_eq!(f.new_per_source, vec![2, 0]);
        assert_eq!(f.themes, vec![vec![0, 2], vec![1, 3]]);
    }

    /// Sources 1–5 each bring two new topics; sources 6–10 revisit them.
    fn saturating_corpus() -> Corpus {
        let mut r = rng(21);
        let mut excerpts = Vec::new();
        let ids: Vec<String> = (1..=10).map(|s| format!("src{s}")).collect();
        let mut next = 0;
        for (s, id) in ids.iter().enumerate() {
            let topics: Vec<usize> = if s < 5 {
                vec![2 * s, 2 * s + 1]
            } else {
                vec![(2 * s) % 10, (2 * s + 3) % 10]
            };
            for t in topics {
                for _ in 0..2 {
                    excerpts.push(excerpt(next, id, near_axis(&mut r, 32, t, 0.03), "remark"));
                    next += 1;
                }
            }
        }
        Corpus::new(excerpts, &sources(&ids)).0
    }

    #[tokio::test]
    async fn revisiting_sources_reach_saturation() {
        let ctx = RunContext::new(Purpose::Saturation, "u");
        let assist = AssistRouter::heuristic_only();
        let settings = PipelineSettings::default();
        let retry = RetryPolicy::no_retry();
        let env = PipelineEnv {
            ctx: &ctx,
            assist: &assist,
            embedder: None,
            settings: &settings,
            retry: &retry,
        };
        let out = run(&env, saturating_corpus()).await.unwrap();
        let PurposeReport::Saturation(report) = &out.report else {
            panic!("wrong report");
        };
        assert_eq!(report.new_themes_per_source, vec![2, 2, 2, 2, 2, 0, 0, 0, 0, 0]);
        assert_eq!(report.verdict, SaturationVerdict::Reached);
        assert!(report.posterior > 0.8);
        assert_eq!(out.themes.len(), 10);
        assert_eq!(report.robustness.permutations, 100);
    }
}
