//! Adaptive choice of k.
//!
//! Candidates are evenly spaced in `[k_min, min(k_max, N)]`. Two opinions are
//! formed: the elbow of the normalised WCSS curve (largest drop below the
//! chord between the first and last candidate) and the best
//! cohesion-minus-centroid-similarity score. When they land within one
//! candidate step of each other the score wins; otherwise the elbow does.

use serde::{Deserialize, Serialize};
use themex_core::vector::cosine_similarity;
use tracing::debug;

use crate::kmeans::{KMeansConfig, kmeans};
use crate::metrics::{centroid, cohesion};

/// Adaptive-k parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdaptiveKConfig {
    /// Upper bound on evaluated candidates.
    pub max_candidates: usize,
    /// Seed for each trial clustering.
    pub seed: u64,
    /// Lloyd iteration cap per trial.
    pub max_iterations: usize,
}

impl Default for AdaptiveKConfig {
    fn default() -> Self {
        Self {
            max_candidates: 10,
            seed: 42,
            max_iterations: 50,
        }
    }
}

/// One evaluated k.
#[derive(Clone, Debug, PartialEq)]
pub struct KCandidate {
    /// Cluster count.
    pub k: usize,
    /// Within-cluster sum of squares.
    pub wcss: f64,
    /// Cohesion/separation score; higher is better.
    pub score: f64,
}

/// Outcome of [`select_k`].
#[derive(Clone, Debug, PartialEq)]
pub struct KSelection {
    /// Chosen k.
    pub k: usize,
    /// Elbow opinion, when candidates were evaluated.
    pub elbow_k: Option<usize>,
    /// Score opinion, when candidates were evaluated.
    pub score_k: Option<usize>,
    /// Every evaluated candidate in ascending k.
    pub candidates: Vec<KCandidate>,
}

/// Pick k in `[k_min, k_max]`, or `N` when `N < k_min`.
pub fn select_k(
    points: &[Vec<f32>],
    k_min: usize,
    k_max: usize,
    config: &AdaptiveKConfig,
) -> KSelection {
    let n = points.len();
    let k_min = k_min.max(1);
    if n < k_min {
        return KSelection {
            k: n,
            elbow_k: None,
            score_k: None,
            candidates: Vec::new(),
        };
    }
    let upper = k_max.max(k_min).min(n);
    let ks = candidate_ks(k_min, upper, config.max_candidates.max(2));
    if ks.len() == 1 {
        return KSelection {
            k: ks[0],
            elbow_k: None,
            score_k: None,
            candidates: Vec::new(),
        };
    }

    let candidates: Vec<KCandidate> = ks
        .iter()
        .map(|&k| {
            let c = kmeans(
                points,
                &KMeansConfig {
                    k,
                    max_iterations: config.max_iterations,
                    seed: config.seed,
                    ..KMeansConfig::default()
                },
            );
            let members = c.members();
            let mean_cohesion = members
                .iter()
                .map(|m| cohesion(points, m, &centroid(points, m)))
                .sum::<f64>()
                / members.len() as f64;
            let score = mean_cohesion - mean_centroid_similarity(&c.centroids);
            KCandidate {
                k,
                wcss: c.wcss,
                score,
            }
        })
        .collect();

    let elbow = elbow_index(&candidates);
    let best = candidates
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.score.total_cmp(&b.1.score))
        .map_or(0, |(i, _)| i);
    let pick = if elbow.abs_diff(best) <= 1 { best } else { elbow };

    debug!(
        k = candidates[pick].k,
        elbow_k = candidates[elbow].k,
        score_k = candidates[best].k,
        evaluated = candidates.len(),
        "selected k"
    );
    KSelection {
        k: candidates[pick].k,
        elbow_k: Some(candidates[elbow].k),
        score_k: Some(candidates[best].k),
        candidates,
    }
}

fn candidate_ks(lo: usize, hi: usize, max: usize) -> Vec<usize> {
    let span = hi - lo;
    if span < max {
        return (lo..=hi).collect();
    }
    let mut ks: Vec<usize> = (0..max)
        .map(|i| lo + ((span as f64) * i as f64 / (max - 1) as f64).round() as usize)
        .collect();
    ks.dedup();
    ks
}

fn elbow_index(candidates: &[KCandidate]) -> usize {
    let first = &candidates[0];
    let last = &candidates[candidates.len() - 1];
    let k_span = (last.k - first.k).max(1) as f64;
    let (w_hi, w_lo) = candidates.iter().fold((f64::MIN, f64::MAX), |(hi, lo), c| {
        (hi.max(c.wcss), lo.min(c.wcss))
    });
    let w_span = (w_hi - w_lo).max(f64::EPSILON);

    let norm = |c: &KCandidate| ((c.k - first.k) as f64 / k_span, (c.wcss - w_lo) / w_span);
    let (x0, y0) = norm(first);
    let (x1, y1) = norm(last);

    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let (x, y) = norm(c);
            // Height of the chord above the curve at x.
            let chord = y0 + (y1 - y0) * (x - x0) / (x1 - x0).max(f64::EPSILON);
            (i, chord - y)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i)
}

fn mean_centroid_similarity(centroids: &[Vec<f32>]) -> f64 {
    if centroids.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for i in 0..centroids.len() {
        for j in i + 1..centroids.len() {
            total += f64::from(cosine_similarity(&centroids[i], &centroids[j]));
            pairs += 1;
        }
    }
    total / pairs as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// `groups` tight clusters on orthogonal axes.
    fn axis_blobs(groups: usize, per: usize) -> Vec<Vec<f32>> {
        let mut pts = Vec::new();
        for g in 0..groups {
            for j in 0..per {
                let mut v = vec![0.0f32; groups];
                v[g] = 1.0;
                v[(g + 1) % groups] = 0.02 * j as f32;
                pts.push(v);
            }
        }
        pts
    }

    #[test]
    fn finds_natural_k() {
        let pts = axis_blobs(6, 5);
        let sel = select_k(&pts, 2, 12, &AdaptiveKConfig::default());
        assert!((5..=7).contains(&sel.k), "k = {}", sel.k);
    }

    #[test]
    fn fewer_points_than_k_min_returns_n() {
        let pts = axis_blobs(3, 2);
        let sel = select_k(&pts, 30, 80, &AdaptiveKConfig::default());
        assert_eq!(sel.k, 6);
        assert!(sel.candidates.is_empty());
    }

    #[test]
    fn candidates_are_evenly_spaced_and_capped() {
        let ks = candidate_ks(30, 80, 10);
        assert_eq!(ks.len(), 10);
        assert_eq!(ks[0], 30);
        assert_eq!(ks[9], 80);
        assert!(ks.windows(2).all(|w| w[0] < w[1]));
    }

    proptest! {
        #[test]
        fn chosen_k_is_in_bounds(
            raw in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 1..40),
            k_min in 1usize..6,
            extra in 0usize..6,
        ) {
            let k_max = k_min + extra;
            let sel = select_k(&raw, k_min, k_max, &AdaptiveKConfig::default());
            if raw.len() < k_min {
                prop_assert_eq!(sel.k, raw.len());
            } else {
                prop_assert!(sel.k >= k_min && sel.k <= k_max.min(raw.len()));
            }
        }
    }
}
