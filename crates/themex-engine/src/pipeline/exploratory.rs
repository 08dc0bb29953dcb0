//! Exploratory concourse construction.
//!
//! Aims for breadth: many distinct constructs covering the whole corpus.
//! Long excerpts may first be split into atomic statements by the
//! assistant; each atom must share most of its content words with the
//! excerpt it came from, otherwise it is discarded as invented.

use serde::{Deserialize, Serialize};
use themex_cluster::metrics::{centroid, cohesion, max_pairwise_similarity};
use themex_cluster::{
    AdaptiveKConfig, BisectConfig, Candidate, KMeansConfig, bisect, kmeans, merge_near_duplicates,
    merge_to_at_most, select_k,
};
use themex_core::{EngineResult, Excerpt, ExcerptId, Stage};
use tracing::{debug, info, instrument};

use super::{
    PipelineEnv, PipelineResult, PurposeReport, QualityWarning, WarningKind, count_warning, draft,
    label_groups,
};
use crate::embed::embed_texts;
use crate::provenance::Corpus;
use crate::text::token_overlap;

/// Exploratory run summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploratoryReport {
    /// Excerpts clustered, after splitting.
    pub excerpts: usize,
    /// Excerpts replaced by their atoms.
    pub excerpts_split: usize,
    /// Atoms added.
    pub atoms_added: usize,
    /// Atoms discarded as ungrounded.
    pub atoms_rejected: usize,
    /// Chosen k.
    pub selected_k: usize,
    /// Elbow opinion on k.
    pub elbow_k: Option<usize>,
    /// Cluster count the bisecting pass aimed for.
    pub split_target: usize,
    /// Clusters after bisecting.
    pub clusters_after_split: usize,
    /// Clusters absorbed by diversity merging.
    pub merged_away: usize,
    /// Highest centroid similarity between final constructs.
    pub max_centroid_similarity: f64,
}

#[derive(Debug, Default)]
struct SplitStats {
    excerpts_split: usize,
    atoms_added: usize,
    atoms_rejected: usize,
}

/// Run the exploratory pipeline.
#[instrument(skip_all, fields(excerpts = corpus.len()))]
pub async fn run(env: &PipelineEnv<'_>, corpus: Corpus) -> EngineResult<PipelineResult> {
    let ctx = env.ctx;
    let s = &env.settings.exploratory;
    let mut warnings = Vec::new();

    ctx.check_cancelled()?;
    let (corpus, split) = if s.atomic_splitting && env.assist.has_assistant() {
        ctx.progress(Stage::Splitting, 20, "splitting long excerpts");
        split_long_excerpts(env, corpus).await?
    } else {
        (corpus, SplitStats::default())
    };

    ctx.check_cancelled()?;
    ctx.progress(Stage::Clustering, 40, format!("clustering {} excerpts", corpus.len()));
    let points = corpus.points();
    let selection = select_k(
        points,
        s.k_min,
        s.k_max,
        &AdaptiveKConfig {
            seed: ctx.seed(),
            ..AdaptiveKConfig::default()
        },
    );
    let k = selection.k.max(1);
    let clustering = kmeans(points, &KMeansConfig::new(k, ctx.seed()));
    let clusters: Vec<Vec<usize>> = clustering.members().into_iter().filter(|m| !m.is_empty()).collect();

    // Widen coverage beyond k, but never past what the target allows.
    let widened = (k as f64 * (1.0 + s.coverage_factor)).round() as usize;
    let split_target = widened.max(s.target.min).min(s.target.max).min(points.len());
    let clusters = bisect(
        points,
        clusters,
        &BisectConfig {
            target: split_target,
            seed: ctx.seed(),
            ..BisectConfig::default()
        },
    );
    let clusters_after_split = clusters.len();
    debug!(k, split_target, clusters_after_split, "bisecting finished");

    ctx.progress(Stage::QualityGates, 60, "merging near-duplicate constructs");
    let candidates: Vec<Candidate> = clusters
        .into_iter()
        .enumerate()
        .map(|(id, members)| {
            let center = centroid(points, &members);
            let quality = cohesion(points, &members, &center);
            Candidate {
                id,
                members,
                centroid: center,
                quality,
            }
        })
        .collect();
    let mut merged = merge_near_duplicates(candidates, s.diversity_threshold);
    if merged.len() > s.target.max {
        merged = merge_to_at_most(merged, s.target.max);
    }
    let merged_away = clusters_after_split - merged.len();
    let centroids: Vec<Vec<f32>> = merged.iter().map(|c| c.centroid.clone()).collect();
    let max_similarity = max_pairwise_similarity(&centroids);

    if let Some(w) = count_warning(merged.len(), s.target, "constructs") {
        warnings.push(w);
    }
    if max_similarity >= f64::from(s.diversity_threshold) {
        warnings.push(QualityWarning::new(
            WarningKind::LowDiversity,
            format!(
                "closest constructs have similarity {max_similarity:.3} (limit {:.2})",
                s.diversity_threshold
            ),
        ));
    }

    ctx.check_cancelled()?;
    ctx.progress(Stage::Labeling, 75, format!("labeling {} constructs", merged.len()));
    let groups: Vec<Vec<usize>> = merged.iter().map(|c| c.members.clone()).collect();
    let labels = label_groups(env, &corpus, &groups, s.label_batch_size).await?;

    let themes = merged
        .iter()
        .zip(&labels)
        .map(|(c, label)| {
            let quality = cohesion(points, &c.members, &c.centroid);
            corpus.build_theme(
                &c.members,
                draft(label, quality, [("cohesion", quality), ("size", c.members.len() as f64)]),
            )
        })
        .collect::<Vec<_>>();

    info!(constructs = themes.len(), k, max_similarity, "exploratory pipeline complete");
    let report = ExploratoryReport {
        excerpts: corpus.len(),
        excerpts_split: split.excerpts_split,
        atoms_added: split.atoms_added,
        atoms_rejected: split.atoms_rejected,
        selected_k: k,
        elbow_k: selection.elbow_k,
        split_target,
        clusters_after_split,
        merged_away,
        max_centroid_similarity: max_similarity,
    };
    Ok(PipelineResult {
        themes,
        report: PurposeReport::Exploratory(report),
        warnings,
        corpus,
    })
}

/// Replace long excerpts by validated atoms while budget lasts.
async fn split_long_excerpts(env: &PipelineEnv<'_>, corpus: Corpus) -> EngineResult<(Corpus, SplitStats)> {
    let s = &env.settings.exploratory;
    let mut stats = SplitStats::default();
    let Some(embedder) = env.embedder else {
        return Ok((corpus, stats));
    };
    let long: Vec<usize> = (0..corpus.len())
        .filter(|&i| corpus.text(i).chars().count() >= s.split_min_chars)
        .collect();
    if long.is_empty() {
        return Ok((corpus, stats));
    }

    // Corpus index and its validated atoms.
    let mut replacements: Vec<(usize, Vec<String>)> = Vec::new();
    for batch in long.chunks(s.split_batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|&i| corpus.text(i).to_string()).collect();
        let Some(atoms) = env.assist.split_atomic(env.ctx, &texts).await? else {
            break;
        };
        for (&i, atoms) in batch.iter().zip(atoms) {
            let source = corpus.text(i);
            let (kept, dropped): (Vec<String>, Vec<String>) = atoms
                .into_iter()
                .partition(|a| token_overlap(a, source) >= s.atom_overlap_threshold);
            stats.atoms_rejected += dropped.len();
            if kept.len() >= 2 {
                replacements.push((i, kept));
            }
        }
    }
    if replacements.is_empty() {
        return Ok((corpus, stats));
    }

    let atom_texts: Vec<String> = replacements.iter().flat_map(|(_, a)| a.iter().cloned()).collect();
    let vectors = embed_texts(embedder, &atom_texts, env.ctx, env.retry).await?;
    let mut vectors = vectors.into_iter();

    let dims = corpus.dimensions();
    let mut atoms_for: Vec<Option<Vec<Excerpt>>> = vec![None; corpus.len()];
    for (i, texts) in replacements {
        let parent = &corpus.excerpts()[i];
        let atoms: Vec<Excerpt> = texts
            .into_iter()
            .enumerate()
            .filter_map(|(n, text)| {
                let embedding = vectors.next().flatten()?;
                if dims.is_some_and(|d| d != embedding.dimensions()) {
                    return None;
                }
                let id = ExcerptId::from(format!("{}#a{}", parent.id, n + 1));
                Some(Excerpt::new(id, parent.source_id.clone(), text).with_embedding(embedding))
            })
            .collect();
        // A parent whose atoms could not all be embedded is kept whole.
        if atoms.len() >= 2 {
            atoms_for[i] = Some(atoms);
        }
    }

    let mut excerpts = Vec::with_capacity(corpus.len());
    for (i, excerpt) in corpus.excerpts().iter().enumerate() {
        match atoms_for[i].take() {
            Some(atoms) => {
                stats.excerpts_split += 1;
                stats.atoms_added += atoms.len();
                excerpts.extend(atoms);
            }
            None => excerpts.push(excerpt.clone()),
        }
    }
    debug!(split = stats.excerpts_split, atoms = stats.atoms_added, rejected = stats.atoms_rejected, "atomic splitting done");
    Ok((corpus.rebuild(excerpts), stats))
}
