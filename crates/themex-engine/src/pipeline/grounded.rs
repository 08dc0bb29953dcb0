//! Grounded-theory hypothesis generation.
//!
//! Open coding classifies every excerpt as a condition, action, consequence
//! or context. Axial coding clusters each code type separately into
//! categories. Categories are linked along the paradigm model, ranked with
//! weighted PageRank, and the best-scoring one becomes the core category
//! around which a framework statement is drafted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use themex_cluster::metrics::{centroid, cohesion};
use themex_cluster::{KMeansConfig, PageRankConfig, kmeans, weighted_pagerank};
use themex_core::vector::cosine_similarity;
use themex_core::{EngineResult, SourceId, Stage, ThemeId};
use tracing::{debug, info, instrument};

use super::{PipelineEnv, PipelineResult, PurposeReport, count_warning, draft, label_groups};
use crate::assist::{CodeType, FrameworkBrief};
use crate::provenance::Corpus;

/// Directed paradigm links considered between categories.
const PARADIGM: [(CodeType, CodeType); 4] = [
    (CodeType::Condition, CodeType::Action),
    (CodeType::Context, CodeType::Action),
    (CodeType::Action, CodeType::Consequence),
    (CodeType::Condition, CodeType::Consequence),
];

/// Ranking of one category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    /// Theme.
    pub theme_id: ThemeId,
    /// Code type of every member.
    pub code_type: CodeType,
    /// PageRank score.
    pub centrality: f64,
    /// Share of excerpts in this category.
    pub coverage: f64,
    /// Weighted core score.
    pub score: f64,
}

/// Directed, weighted category link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// Upstream category.
    pub from: ThemeId,
    /// Downstream category.
    pub to: ThemeId,
    /// Blend of centroid similarity and source co-occurrence.
    pub weight: f64,
}

/// Grounded-theory run summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundedReport {
    /// Excerpts per code type.
    pub code_counts: BTreeMap<CodeType, usize>,
    /// Codes assigned by the assistant.
    pub assisted_codes: usize,
    /// Per-category ranking, aligned with the themes.
    pub categories: Vec<CategorySummary>,
    /// Category graph.
    pub relationships: Vec<Relationship>,
    /// Highest-scoring category.
    pub core_category: Option<ThemeId>,
    /// Framework statement.
    pub framework: String,
    /// Whether the assistant drafted the framework.
    pub framework_assisted: bool,
    /// PageRank iterations.
    pub pagerank_iterations: usize,
}

struct Category {
    code_type: CodeType,
    members: Vec<usize>,
    center: Vec<f32>,
    sources: BTreeSet<SourceId>,
}

fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Paradigm edges between categories with weight at or above `min_weight`.
fn relationship_edges(categories: &[Category], min_weight: f64) -> Vec<(usize, usize, f64)> {
    let mut edges = Vec::new();
    for (i, from) in categories.iter().enumerate() {
        for (j, to) in categories.iter().enumerate() {
            if !PARADIGM.contains(&(from.code_type, to.code_type)) {
                continue;
            }
            let similarity = f64::from(cosine_similarity(&from.center, &to.center)).max(0.0);
            let weight = 0.5 * similarity + 0.5 * jaccard(&from.sources, &to.sources);
            if weight >= min_weight {
                edges.push((i, j, weight));
            }
        }
    }
    edges
}

/// Each value divided by the maximum; all zero when the maximum is zero.
fn normalise(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| v / max).collect()
}

/// Per-type category count, proportional to the type's share of codes.
fn categories_for(type_size: usize, total: usize, mid_target: usize) -> usize {
    if type_size == 0 || total == 0 {
        return 0;
    }
    let share = (mid_target * type_size) as f64 / total as f64;
    (share.round() as usize).clamp(1, type_size)
}

/// Run the grounded-theory pipeline.
#[instrument(skip_all, fields(excerpts = corpus.len()))]
pub async fn run(env: &PipelineEnv<'_>, corpus: Corpus) -> EngineResult<PipelineResult> {
    let ctx = env.ctx;
    let s = &env.settings.grounded;
    let points = corpus.points();
    let n = corpus.len();
    let mut warnings = Vec::new();
    let mut report = GroundedReport::default();

    ctx.check_cancelled()?;
    ctx.progress(Stage::Analysis, 20, format!("open coding {n} excerpts"));
    let texts: Vec<String> = corpus.excerpts().iter().map(|e| e.text.clone()).collect();
    let mut codes = Vec::with_capacity(n);
    for batch in texts.chunks(s.batch_size.max(1)) {
        ctx.check_cancelled()?;
        codes.extend(env.assist.classify_codes(ctx, batch, s.min_confidence).await?);
    }
    report.assisted_codes = codes.iter().filter(|c| c.assisted).count();

    let mut by_type: BTreeMap<CodeType, Vec<usize>> = BTreeMap::new();
    for (i, code) in codes.iter().enumerate() {
        by_type.entry(code.code_type).or_default().push(i);
    }
    report.code_counts = by_type.iter().map(|(t, m)| (*t, m.len())).collect();
    debug!(counts = ?report.code_counts, assisted = report.assisted_codes, "open coding done");

    ctx.check_cancelled()?;
    ctx.progress(Stage::Clustering, 40, "axial coding");
    let mid_target = (s.target.min + s.target.max) / 2;
    let mut categories = Vec::new();
    for (code_type, members) in &by_type {
        let k = categories_for(members.len(), n, mid_target);
        let sub: Vec<Vec<f32>> = members.iter().map(|&i| points[i].clone()).collect();
        let clustering = kmeans(&sub, &KMeansConfig::new(k, ctx.seed()));
        for local in clustering.members() {
            if local.is_empty() {
                continue;
            }
            let global: Vec<usize> = local.iter().map(|&l| members[l]).collect();
            categories.push(Category {
                code_type: *code_type,
                center: centroid(points, &global),
                sources: corpus.sources_of(&global).into_iter().collect(),
                members: global,
            });
        }
    }

    ctx.check_cancelled()?;
    ctx.progress(Stage::Labeling, 60, format!("labeling {} categories", categories.len()));
    let member_sets: Vec<Vec<usize>> = categories.iter().map(|c| c.members.clone()).collect();
    let labels = label_groups(env, &corpus, &member_sets, s.batch_size).await?;

    ctx.progress(Stage::Analysis, 75, "ranking categories");
    let edges = relationship_edges(&categories, s.edge_min_weight);
    let ranks = weighted_pagerank(categories.len(), &edges, &PageRankConfig::default());
    report.pagerank_iterations = ranks.iterations;
    let coverage: Vec<f64> = categories
        .iter()
        .map(|c| c.members.len() as f64 / n.max(1) as f64)
        .collect();
    let centrality_norm = normalise(&ranks.scores);
    let coverage_norm = normalise(&coverage);
    let scores: Vec<f64> = centrality_norm
        .iter()
        .zip(&coverage_norm)
        .map(|(c, v)| s.centrality_weight * c + s.coverage_weight * v)
        .collect();
    let core = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| i);

    let mut themes = Vec::with_capacity(categories.len());
    for (i, (cat, label)) in categories.iter().zip(&labels).enumerate() {
        let theme = corpus.build_theme(
            &cat.members,
            draft(
                label,
                scores[i],
                [
                    ("centrality", ranks.scores[i]),
                    ("coverage", coverage[i]),
                    ("coreScore", scores[i]),
                    ("cohesion", cohesion(points, &cat.members, &cat.center)),
                ],
            ),
        );
        report.categories.push(CategorySummary {
            theme_id: theme.id.clone(),
            code_type: cat.code_type,
            centrality: ranks.scores[i],
            coverage: coverage[i],
            score: scores[i],
        });
        themes.push(theme);
    }
    report.relationships = edges
        .iter()
        .map(|&(a, b, w)| Relationship {
            from: themes[a].id.clone(),
            to: themes[b].id.clone(),
            weight: w,
        })
        .collect();

    if let Some(core) = core {
        ctx.check_cancelled()?;
        ctx.progress(Stage::Analysis, 90, "drafting framework");
        let mut strongest: Vec<&(usize, usize, f64)> =
            edges.iter().filter(|(a, b, _)| *a == core || *b == core).collect();
        strongest.sort_by(|x, y| y.2.total_cmp(&x.2));
        let brief = FrameworkBrief {
            core_category: themes[core].label.clone(),
            core_type: categories[core].code_type,
            relations: strongest
                .into_iter()
                .take(3)
                .map(|&(a, b, w)| (themes[a].label.clone(), themes[b].label.clone(), w))
                .collect(),
        };
        let drafted = env.assist.draft_framework(ctx, &brief).await?;
        report.framework = drafted.text;
        report.framework_assisted = drafted.assisted;
        report.core_category = Some(themes[core].id.clone());
        let _ = themes[core].metrics.insert("core".into(), 1.0);
    }

    if let Some(w) = count_warning(themes.len(), s.target, "categories") {
        warnings.push(w);
    }

    info!(
        categories = themes.len(),
        relationships = report.relationships.len(),
        framework_assisted = report.framework_assisted,
        "grounded pipeline complete"
    );
    Ok(PipelineResult {
        themes,
        report: PurposeReport::Grounded(report),
        warnings,
        corpus,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::AssistRouter;
    use crate::pipeline::testing::{excerpt, near_axis, rng, sources};
    use std::sync::Arc;
    use themex_core::{Purpose, RetryPolicy, RunContext};
    use themex_llm::{MockAssistant, MockReply};
    use themex_settings::PipelineSettings;

    const CUES: [&str; 4] = [
        "when deadline pressure was high and staff were lacking",
        "nurses decided to implement a shared checklist",
        "this resulted in fewer errors and a better outcome",
        "in the rural hospital setting and community",
    ];

    /// Four code types with three sub-topics of four excerpts each.
    fn interviews() -> Corpus {
        let mut r = rng(21);
        let ids: Vec<String> = (0..3).map(|s| format!("int{s}")).collect();
        let mut excerpts = Vec::new();
        let mut n = 0;
        for (kind, cue) in CUES.iter().enumerate() {
            for sub in 0..3 {
                for j in 0..4 {
                    let topic = kind * 3 + sub;
                    excerpts.push(excerpt(n, &ids[j % 3], near_axis(&mut r, 24, topic, 0.03), cue));
                    n += 1;
                }
            }
        }
        Corpus::new(excerpts, &sources(&ids)).0
    }

    async fn run_with(assist: &AssistRouter, ctx: &RunContext) -> PipelineResult {
        let settings = PipelineSettings::default();
        let retry = RetryPolicy::no_retry();
        let env = PipelineEnv {
            ctx,
            assist,
            embedder: None,
            settings: &settings,
            retry: &retry,
        };
        run(&env, interviews()).await.unwrap()
    }

    #[test]
    fn category_counts_follow_type_share() {
        assert_eq!(categories_for(12, 48, 11), 3);
        assert_eq!(categories_for(1, 48, 11), 1);
        assert_eq!(categories_for(2, 4, 11), 2);
        assert_eq!(categories_for(0, 48, 11), 0);
    }

    #[test]
    fn jaccard_and_normalise() {
        let a: BTreeSet<u8> = [1, 2].into();
        let b: BTreeSet<u8> = [2, 3].into();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(normalise(&[1.0, 2.0]), vec![0.5, 1.0]);
        assert_eq!(normalise(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn heuristic_run_names_one_core_category() {
        let ctx = RunContext::new(Purpose::Grounded, "u");
        let out = run_with(&AssistRouter::heuristic_only(), &ctx).await;
        let PurposeReport::Grounded(report) = &out.report else {
            panic!("wrong report");
        };
        assert_eq!(report.code_counts.values().copied().collect::<Vec<_>>(), vec![12, 12, 12, 12]);
        assert_eq!(report.assisted_codes, 0);
        assert_eq!(out.themes.len(), 12);
        assert!(out.warnings.is_empty());
        let core = report.core_category.clone().unwrap();
        assert_eq!(out.themes.iter().filter(|t| t.metric("core").is_some()).count(), 1);
        let summary = report.categories.iter().find(|c| c.theme_id == core).unwrap();
        assert!(report.categories.iter().all(|c| c.score <= summary.score));
        // Every category shares all three interview sources.
        assert!(report.relationships.iter().all(|r| r.weight >= 0.5));
        assert!(!report.framework.is_empty());
        assert!(!report.framework_assisted);
    }

    #[tokio::test]
    async fn assistant_drafts_framework_within_budget() {
        // Budget covers the five classification batches and two label
        // batches; the framework call is refused and templated.
        let mock = MockAssistant::with_replies(vec![
            MockReply::Error(themex_llm::AssistantError::ProviderOverloaded),
        ]);
        let assist = AssistRouter::with_text_assistant(Arc::new(mock.clone()), RetryPolicy::no_retry());
        let ctx = RunContext::new(Purpose::Grounded, "u").with_ai_call_budget(7);
        let out = run_with(&assist, &ctx).await;
        let PurposeReport::Grounded(report) = &out.report else {
            panic!("wrong report");
        };
        assert_eq!(out.themes.len(), 12);
        assert!(!report.framework_assisted);
        assert!(ctx.is_truncated());
        assert_eq!(ctx.usage().ai_calls_used, 7);
        assert!(ctx.usage().ai_calls_failed >= 1);
    }
}
