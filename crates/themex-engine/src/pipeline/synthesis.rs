//! Multi-source literature synthesis (meta-ethnography style).
//!
//! Themes are first found inside each source. Every pair of sources is then
//! translated reciprocally: two themes translate when each is the other's
//! best match and their centroids are similar enough. Translations are
//! joined transitively into meta-themes. Meta-themes present in every
//! source form the line of argument; translated pairs with opposite
//! sentiment are recorded as refutations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use themex_cluster::metrics::{centroid, cohesion};
use themex_cluster::{AgglomerativeConfig, Candidate, agglomerate, merge_near_duplicates, merge_to_at_most};
use themex_core::vector::cosine_similarity;
use themex_core::{EngineResult, SourceId, Stage, ThemeId};
use tracing::{debug, info, instrument};

use super::{
    PipelineEnv, PipelineResult, PurposeReport, QualityWarning, WarningKind, count_warning, draft,
    label_groups,
};
use crate::provenance::Corpus;
use crate::text::{keyword_label, sentiment};

/// Graph node kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Theme found within one source.
    SourceTheme,
    /// Theme spanning sources.
    MetaTheme,
}

/// Graph edge kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Reciprocal translation between source themes.
    Translates,
    /// Translated source themes with opposite stance.
    Refutes,
    /// Source theme belongs to a meta-theme.
    MemberOf,
}

/// A node of the synthesis graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Node id (`st<n>` for source themes, the theme id for meta-themes).
    pub id: String,
    /// Kind.
    pub kind: NodeKind,
    /// Label.
    pub label: String,
    /// Owning source, for source themes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
}

/// A typed, weighted edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Kind.
    pub kind: EdgeKind,
    /// Centroid similarity, or 1 for membership.
    pub weight: f64,
}

/// Theme/meta-theme graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisGraph {
    /// Nodes.
    pub nodes: Vec<GraphNode>,
    /// Edges.
    pub edges: Vec<GraphEdge>,
}

/// Translated source themes whose stances disagree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refutation {
    /// First source theme node.
    pub from: String,
    /// Second source theme node.
    pub to: String,
    /// Sentiment of the first.
    pub from_sentiment: f64,
    /// Sentiment of the second.
    pub to_sentiment: f64,
}

/// Synthesis run summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisReport {
    /// Sources analysed.
    pub sources: usize,
    /// Themes found within sources.
    pub source_themes: usize,
    /// Reciprocal translations.
    pub translations: usize,
    /// Meta-themes merged as near-duplicates.
    pub duplicates_merged: usize,
    /// Meta-themes present in every source.
    pub lines_of_argument: Vec<ThemeId>,
    /// Stance disagreements.
    pub refutations: Vec<Refutation>,
    /// Share of sources taking part in a cross-source meta-theme.
    pub source_coverage: f64,
    /// Graph of themes and meta-themes.
    pub graph: SynthesisGraph,
}

#[derive(Debug)]
struct SourceTheme {
    source: usize,
    members: Vec<usize>,
    center: Vec<f32>,
    sentiment: f64,
}

impl SourceTheme {
    fn node_id(index: usize) -> String {
        format!("st{index}")
    }
}

/// Minimal union-find over source-theme indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index becomes the root so grouping is order-stable.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }

    fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for x in 0..self.parent.len() {
            let r = self.find(x);
            by_root.entry(r).or_default().push(x);
        }
        by_root.into_values().collect()
    }
}

/// Themes within each source by thresholded average-linkage agglomeration.
fn source_themes(corpus: &Corpus, threshold: f32) -> Vec<SourceTheme> {
    let points = corpus.points();
    let mut out = Vec::new();
    for (source, (_, members)) in corpus.by_source().into_iter().enumerate() {
        let sub: Vec<Vec<f32>> = members.iter().map(|&i| points[i].clone()).collect();
        let config = AgglomerativeConfig {
            target: 1,
            min_similarity: threshold,
        };
        for local in agglomerate(&sub, &config, |_| true) {
            let global: Vec<usize> = local.iter().map(|&l| members[l]).collect();
            let texts: Vec<&str> = global.iter().map(|&i| corpus.text(i)).collect();
            let mean_sentiment = texts.iter().map(|t| sentiment(t)).sum::<f64>() / texts.len().max(1) as f64;
            out.push(SourceTheme {
                source,
                center: centroid(points, &global),
                members: global,
                sentiment: mean_sentiment,
            });
        }
    }
    out
}

/// Mutual best matches between two sources' themes at or above `threshold`.
fn reciprocal_pairs(themes: &[SourceTheme], a: &[usize], b: &[usize], threshold: f32) -> Vec<(usize, usize, f32)> {
    let best = |from: usize, pool: &[usize]| -> Option<(usize, f32)> {
        pool.iter()
            .map(|&j| (j, cosine_similarity(&themes[from].center, &themes[j].center)))
            .max_by(|x, y| x.1.total_cmp(&y.1).then(y.0.cmp(&x.0)))
    };
    let mut pairs = Vec::new();
    for &i in a {
        let Some((j, sim)) = best(i, b) else { continue };
        if sim < threshold {
            continue;
        }
        if best(j, a).is_some_and(|(back, _)| back == i) {
            pairs.push((i, j, sim));
        }
    }
    pairs
}

/// Run the synthesis pipeline.
#[instrument(skip_all, fields(excerpts = corpus.len()))]
pub async fn run(env: &PipelineEnv<'_>, corpus: Corpus) -> EngineResult<PipelineResult> {
    let ctx = env.ctx;
    let s = &env.settings.synthesis;
    let points = corpus.points();
    let source_ids = corpus.source_order();
    let n_sources = source_ids.len();
    let mut warnings = Vec::new();
    let mut report = SynthesisReport {
        sources: n_sources,
        ..SynthesisReport::default()
    };

    ctx.check_cancelled()?;
    ctx.progress(Stage::Clustering, 25, format!("finding themes in {n_sources} sources"));
    let themes = source_themes(&corpus, s.source_theme_threshold);
    report.source_themes = themes.len();
    let mut per_source: Vec<Vec<usize>> = vec![Vec::new(); n_sources];
    for (i, t) in themes.iter().enumerate() {
        per_source[t.source].push(i);
    }

    ctx.check_cancelled()?;
    ctx.progress(Stage::Analysis, 45, "translating themes across sources");
    let mut translations = Vec::new();
    for a in 0..n_sources {
        for b in a + 1..n_sources {
            translations.extend(reciprocal_pairs(&themes, &per_source[a], &per_source[b], s.translation_threshold));
        }
    }
    report.translations = translations.len();
    let mut sets = DisjointSet::new(themes.len());
    for &(a, b, _) in &translations {
        sets.union(a, b);
    }
    let meta_groups = sets.groups();
    debug!(source_themes = themes.len(), translations = translations.len(), meta = meta_groups.len(), "translation done");

    // Near-duplicate meta-themes; members here are source-theme indices.
    let candidates: Vec<Candidate> = meta_groups
        .into_iter()
        .enumerate()
        .map(|(id, group)| {
            let excerpts: Vec<usize> = group.iter().flat_map(|&t| themes[t].members.iter().copied()).collect();
            let center = centroid(points, &excerpts);
            let spread = group.iter().map(|&t| themes[t].source).collect::<BTreeSet<_>>().len();
            Candidate {
                id,
                quality: spread as f64 / n_sources.max(1) as f64,
                members: group,
                centroid: center,
            }
        })
        .collect();
    let before = candidates.len();
    let mut metas = merge_near_duplicates(candidates, s.dedup_threshold);
    if metas.len() > s.target.max {
        metas = merge_to_at_most(metas, s.target.max);
    }
    report.duplicates_merged = before - metas.len();

    ctx.check_cancelled()?;
    ctx.progress(Stage::Labeling, 65, format!("labeling {} meta-themes", metas.len()));
    let excerpt_sets: Vec<Vec<usize>> = metas
        .iter()
        .map(|m| m.members.iter().flat_map(|&t| themes[t].members.iter().copied()).collect())
        .collect();
    let labels = label_groups(env, &corpus, &excerpt_sets, s.label_batch_size).await?;

    ctx.progress(Stage::Analysis, 80, "line of argument and refutation");
    let lenient = s.line_of_argument_threshold;
    let mut out_themes = Vec::with_capacity(metas.len());
    let mut participating: BTreeSet<usize> = BTreeSet::new();
    let mut meta_of: BTreeMap<usize, usize> = BTreeMap::new();
    for (m, ((meta, members), label)) in metas.iter().zip(&excerpt_sets).zip(&labels).enumerate() {
        let center = centroid(points, members);
        let sources_in: BTreeSet<usize> = meta.members.iter().map(|&t| themes[t].source).collect();
        if sources_in.len() >= 2 {
            participating.extend(sources_in.iter().copied());
        }
        let line_of_argument = n_sources >= 2
            && per_source.iter().all(|ts| {
                ts.iter()
                    .any(|&t| cosine_similarity(&center, &themes[t].center) >= lenient)
            });
        for &t in &meta.members {
            let _ = meta_of.insert(t, m);
        }
        let quality = sources_in.len() as f64 / n_sources.max(1) as f64;
        let theme = corpus.build_theme(
            members,
            draft(
                label,
                quality,
                [
                    ("sources", sources_in.len() as f64),
                    ("sourceThemes", meta.members.len() as f64),
                    ("cohesion", cohesion(points, members, &center)),
                    ("lineOfArgument", if line_of_argument { 1.0 } else { 0.0 }),
                ],
            ),
        );
        if line_of_argument {
            report.lines_of_argument.push(theme.id.clone());
        }
        out_themes.push(theme);
    }

    // Refutations among translated pairs.
    for &(a, b, _) in &translations {
        let (sa, sb) = (themes[a].sentiment, themes[b].sentiment);
        let opposed = (sa >= s.sentiment_margin && sb <= -s.sentiment_margin)
            || (sb >= s.sentiment_margin && sa <= -s.sentiment_margin);
        if opposed {
            report.refutations.push(Refutation {
                from: SourceTheme::node_id(a),
                to: SourceTheme::node_id(b),
                from_sentiment: sa,
                to_sentiment: sb,
            });
        }
    }

    ctx.progress(Stage::Provenance, 90, "assembling synthesis graph");
    let mut graph = SynthesisGraph::default();
    for (i, t) in themes.iter().enumerate() {
        let texts: Vec<&str> = t.members.iter().map(|&e| corpus.text(e)).collect();
        graph.nodes.push(GraphNode {
            id: SourceTheme::node_id(i),
            kind: NodeKind::SourceTheme,
            label: keyword_label(&texts, 3),
            source_id: source_ids.get(t.source).cloned(),
        });
    }
    for theme in &out_themes {
        graph.nodes.push(GraphNode {
            id: theme.id.to_string(),
            kind: NodeKind::MetaTheme,
            label: theme.label.clone(),
            source_id: None,
        });
    }
    for &(a, b, sim) in &translations {
        graph.edges.push(GraphEdge {
            from: SourceTheme::node_id(a),
            to: SourceTheme::node_id(b),
            kind: EdgeKind::Translates,
            weight: f64::from(sim),
        });
    }
    for r in &report.refutations {
        graph.edges.push(GraphEdge {
            from: r.from.clone(),
            to: r.to.clone(),
            kind: EdgeKind::Refutes,
            weight: (r.from_sentiment - r.to_sentiment).abs() / 2.0,
        });
    }
    for (&t, &m) in &meta_of {
        graph.edges.push(GraphEdge {
            from: SourceTheme::node_id(t),
            to: out_themes[m].id.to_string(),
            kind: EdgeKind::MemberOf,
            weight: 1.0,
        });
    }
    report.graph = graph;

    report.source_coverage = if n_sources == 0 {
        0.0
    } else {
        participating.len() as f64 / n_sources as f64
    };
    if report.source_coverage < s.min_coverage {
        warnings.push(QualityWarning::new(
            WarningKind::LowCoverage,
            format!(
                "{:.0}% of sources share a meta-theme; target is {:.0}%",
                report.source_coverage * 100.0,
                s.min_coverage * 100.0
            ),
        ));
    }
    if let Some(w) = count_warning(out_themes.len(), s.target, "meta-themes") {
        warnings.push(w);
    }

    info!(
        meta_themes = out_themes.len(),
        translations = report.translations,
        refutations = report.refutations.len(),
        coverage = report.source_coverage,
        "synthesis pipeline complete"
    );
    Ok(PipelineResult {
        themes: out_themes,
        report: PurposeReport::Synthesis(report),
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
    fn disjoint_set_groups_transitively() {
        let mut d = DisjointSet::new(5);
        d.union(3, 1);
        d.union(1, 0);
        assert_eq!(d.groups(), vec![vec![0, 1, 3], vec![2], vec![4]]);
    }

    /// Four sources sharing topics 0–11 (with stance on topic 0 flipped in
    /// the last source) plus one private topic each.
    fn literature() -> Corpus {
        let mut r = rng(13);
        let ids: Vec<String> = (0..4).map(|s| format!("paper{s}")).collect();
        let mut excerpts = Vec::new();
        let mut n = 0;
        for (s, id) in ids.iter().enumerate() {
            let mut topics: Vec<usize> = (0..12).collect();
            topics.push(20 + s);
            for t in topics {
                let text = match (t, s) {
                    (0, 3) => "The intervention was ineffective and a burden",
                    (0, _) => "The intervention was effective and beneficial",
                    _ => "neutral observation",
                };
                for _ in 0..2 {
                    excerpts.push(excerpt(n, id, near_axis(&mut r, 32, t, 0.03), text));
                    n += 1;
                }
            }
        }
        Corpus::new(excerpts, &sources(&ids)).0
    }

    #[tokio::test]
    async fn shared_topics_become_meta_themes() {
        let ctx = RunContext::new(Purpose::Synthesis, "u");
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
        let out = run(&env, literature()).await.unwrap();
        let PurposeReport::Synthesis(report) = &out.report else {
            panic!("wrong report");
        };
        assert_eq!(report.source_themes, 52);
        // 12 shared topics x 6 source pairs.
        assert_eq!(report.translations, 72);
        // 12 shared meta-themes plus 4 private ones.
        assert_eq!(out.themes.len(), 16);
        assert_eq!(report.lines_of_argument.len(), 12);
        assert!((report.source_coverage - 1.0).abs() < 1e-9);
        assert_eq!(report.refutations.len(), 3);
        assert!(report.graph.edges.iter().any(|e| e.kind == EdgeKind::Refutes));
        let member_edges = report.graph.edges.iter().filter(|e| e.kind == EdgeKind::MemberOf).count();
        assert_eq!(member_edges, 52);
    }
}
