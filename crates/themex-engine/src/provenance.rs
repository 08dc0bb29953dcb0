//! Embedded corpus view and theme assembly with provenance.
//!
//! Every pipeline works on a [`Corpus`]: the run's embedded excerpts with
//! unit-length points aligned by index. Themes are only ever built through
//! [`Corpus::build_theme`], so each one carries a provenance link per
//! member excerpt back to its source document.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use themex_cluster::metrics::centroid;
use themex_core::{Excerpt, ExcerptId, ProvenanceLink, SourceDocument, SourceId, Theme, ThemeId};
use themex_core::vector::cosine_similarity;

/// Embedded excerpts plus their unit points.
#[derive(Clone, Debug, Default)]
pub struct Corpus {
    excerpts: Vec<Excerpt>,
    points: Vec<Vec<f32>>,
    titles: HashMap<SourceId, String>,
}

impl Corpus {
    /// Build from excerpts and sources. Excerpts without an embedding are
    /// skipped; the second value counts them.
    pub fn new(excerpts: Vec<Excerpt>, sources: &[SourceDocument]) -> (Self, usize) {
        let titles = sources
            .iter()
            .map(|s| (s.id.clone(), s.title.clone()))
            .collect();
        let mut corpus = Self {
            excerpts: Vec::with_capacity(excerpts.len()),
            points: Vec::with_capacity(excerpts.len()),
            titles,
        };
        let mut skipped = 0;
        for excerpt in excerpts {
            if !corpus.push(excerpt) {
                skipped += 1;
            }
        }
        (corpus, skipped)
    }

    /// Append an embedded excerpt. Returns `false` if it has no embedding
    /// or its dimension differs from the points already held.
    pub fn push(&mut self, excerpt: Excerpt) -> bool {
        let Some(embedding) = excerpt.embedding.as_ref() else {
            return false;
        };
        if self.dimensions().is_some_and(|d| d != embedding.dimensions()) {
            return false;
        }
        self.points.push(embedding.unit_vector());
        self.excerpts.push(excerpt);
        true
    }

    /// A corpus over `excerpts` that keeps this corpus's source titles.
    #[must_use]
    pub fn rebuild(&self, excerpts: Vec<Excerpt>) -> Self {
        let mut next = Self {
            excerpts: Vec::with_capacity(excerpts.len()),
            points: Vec::with_capacity(excerpts.len()),
            titles: self.titles.clone(),
        };
        for excerpt in excerpts {
            let _ = next.push(excerpt);
        }
        next
    }

    /// Dimension shared by every point, once there is one.
    pub fn dimensions(&self) -> Option<usize> {
        self.points.first().map(Vec::len)
    }

    /// Number of excerpts.
    pub fn len(&self) -> usize {
        self.excerpts.len()
    }

    /// Whether there are no excerpts.
    pub fn is_empty(&self) -> bool {
        self.excerpts.is_empty()
    }

    /// Unit points aligned with [`Corpus::excerpts`].
    pub fn points(&self) -> &[Vec<f32>] {
        &self.points
    }

    /// Excerpts.
    pub fn excerpts(&self) -> &[Excerpt] {
        &self.excerpts
    }

    /// Excerpt text by index.
    pub fn text(&self, i: usize) -> &str {
        &self.excerpts[i].text
    }

    /// Source of excerpt `i`.
    pub fn source_of(&self, i: usize) -> &SourceId {
        &self.excerpts[i].source_id
    }

    /// Distinct sources, in first-appearance order.
    pub fn source_order(&self) -> Vec<SourceId> {
        let mut seen = HashSet::new();
        self.excerpts
            .iter()
            .filter(|e| seen.insert(e.source_id.clone()))
            .map(|e| e.source_id.clone())
            .collect()
    }

    /// Excerpt indices grouped by source, in first-appearance order.
    pub fn by_source(&self) -> Vec<(SourceId, Vec<usize>)> {
        let order = self.source_order();
        let mut groups: HashMap<&SourceId, Vec<usize>> = HashMap::new();
        for (i, e) in self.excerpts.iter().enumerate() {
            groups.entry(&e.source_id).or_default().push(i);
        }
        order
            .into_iter()
            .map(|s| {
                let members = groups.remove(&s).unwrap_or_default();
                (s, members)
            })
            .collect()
    }

    /// Number of distinct sources.
    pub fn source_count(&self) -> usize {
        self.source_order().len()
    }

    /// Distinct sources among `members`, sorted.
    pub fn sources_of(&self, members: &[usize]) -> Vec<SourceId> {
        members
            .iter()
            .map(|&i| self.excerpts[i].source_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Up to `n` member texts, closest to the group centroid first.
    pub fn representative_texts(&self, members: &[usize], n: usize) -> Vec<&str> {
        let center = centroid(&self.points, members);
        let mut ranked: Vec<(usize, f32)> = members
            .iter()
            .map(|&i| (i, cosine_similarity(&self.points[i], &center)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(n).map(|(i, _)| self.text(i)).collect()
    }

    /// Assemble a theme from member indices.
    ///
    /// Members are deduplicated and sorted; the centroid is their mean
    /// point.
    pub fn build_theme(&self, members: &[usize], draft: ThemeDraft) -> Theme {
        let mut members = members.to_vec();
        members.sort_unstable();
        members.dedup();
        let provenance = members
            .iter()
            .map(|&i| {
                let e = &self.excerpts[i];
                ProvenanceLink {
                    source_id: e.source_id.clone(),
                    source_title: self.titles.get(&e.source_id).cloned().unwrap_or_default(),
                    excerpt_id: e.id.clone(),
                }
            })
            .collect();
        Theme {
            id: ThemeId::new(),
            label: draft.label,
            description: draft.description,
            excerpt_ids: members.iter().map(|&i| self.excerpts[i].id.clone()).collect(),
            source_ids: self.sources_of(&members),
            centroid: centroid(&self.points, &members),
            quality: draft.quality.clamp(0.0, 1.0),
            metrics: draft.metrics,
            provenance,
        }
    }
}

/// Everything about a theme except its members.
#[derive(Clone, Debug, Default)]
pub struct ThemeDraft {
    /// Label.
    pub label: String,
    /// Description.
    pub description: Option<String>,
    /// Quality in `[0, 1]`.
    pub quality: f64,
    /// Purpose-specific metrics.
    pub metrics: BTreeMap<String, f64>,
}

/// Check that every theme traces back to the run's excerpts and sources.
///
/// Returns one message per violation; empty means the chain is intact.
pub fn verify_provenance(themes: &[Theme], excerpts: &[Excerpt]) -> Vec<String> {
    let known: HashMap<&ExcerptId, &SourceId> = excerpts.iter().map(|e| (&e.id, &e.source_id)).collect();
    let mut problems = Vec::new();
    for theme in themes {
        if theme.excerpt_ids.is_empty() {
            problems.push(format!("theme \"{}\" has no members", theme.label));
        }
        if theme.provenance.len() != theme.excerpt_ids.len() {
            problems.push(format!(
                "theme \"{}\" has {} provenance links for {} members",
                theme.label,
                theme.provenance.len(),
                theme.excerpt_ids.len()
            ));
        }
        for link in &theme.provenance {
            match known.get(&link.excerpt_id) {
                None => problems.push(format!(
                    "theme \"{}\" cites unknown excerpt {}",
                    theme.label, link.excerpt_id
                )),
                Some(source) if **source != link.source_id => problems.push(format!(
                    "theme \"{}\" attributes excerpt {} to {} instead of {}",
                    theme.label, link.excerpt_id, link.source_id, source
                )),
                Some(_) => {}
            }
            if !theme.source_ids.contains(&link.source_id) {
                problems.push(format!(
                    "theme \"{}\" omits contributing source {}",
                    theme.label, link.source_id
                ));
            }
        }
    }
    problems
}
