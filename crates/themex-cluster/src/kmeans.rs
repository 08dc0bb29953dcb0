//! k-means++ seeding and Lloyd iteration.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use themex_core::vector::{mean_vector, squared_distance};
use tracing::trace;

use crate::metrics::{members_from_assignments, wcss};

/// k-means parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KMeansConfig {
    /// Requested clusters; clamped to `[1, N]`.
    pub k: usize,
    /// Lloyd iteration cap.
    pub max_iterations: usize,
    /// Stop when no centroid moves further than this (Euclidean).
    pub tolerance: f32,
    /// RNG seed.
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 8,
            max_iterations: 100,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

impl KMeansConfig {
    /// Config for `k` clusters with `seed`.
    pub fn new(k: usize, seed: u64) -> Self {
        Self {
            k,
            seed,
            ..Self::default()
        }
    }
}

/// Result of a k-means run.
#[derive(Clone, Debug, PartialEq)]
pub struct Clustering {
    /// Cluster index per point.
    pub assignments: Vec<usize>,
    /// One centroid per cluster.
    pub centroids: Vec<Vec<f32>>,
    /// Lloyd iterations performed.
    pub iterations: usize,
    /// Within-cluster sum of squares.
    pub wcss: f64,
}

impl Clustering {
    /// Number of clusters.
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Member indices per cluster.
    pub fn members(&self) -> Vec<Vec<usize>> {
        members_from_assignments(&self.assignments, self.k())
    }
}

/// Choose `k` initial centroids.
///
/// The first seed is uniform; each next seed is drawn with probability
/// proportional to its squared distance from the nearest chosen seed.
/// Returns every point when `k >= N`.
pub fn kmeans_plus_plus_init<R: Rng + ?Sized>(
    points: &[Vec<f32>],
    k: usize,
    rng: &mut R,
) -> Vec<Vec<f32>> {
    let n = points.len();
    if k >= n {
        return points.to_vec();
    }
    if k == 0 {
        return Vec::new();
    }

    let mut chosen = Vec::with_capacity(k);
    let first = rng.random_range(0..n);
    chosen.push(points[first].clone());
    let mut nearest: Vec<f64> = points
        .iter()
        .map(|p| f64::from(squared_distance(p, &points[first])))
        .collect();

    while chosen.len() < k {
        let total: f64 = nearest.iter().sum();
        let next = if total <= 0.0 {
            // Every point coincides with a seed; any point will do.
            rng.random_range(0..n)
        } else {
            let mut target = rng.random::<f64>() * total;
            let mut pick = n - 1;
            for (i, &d) in nearest.iter().enumerate() {
                if target < d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        };
        chosen.push(points[next].clone());
        for (i, p) in points.iter().enumerate() {
            let d = f64::from(squared_distance(p, &points[next]));
            if d < nearest[i] {
                nearest[i] = d;
            }
        }
    }
    chosen
}

/// Lloyd's k-means from a k-means++ start.
///
/// Deterministic for a fixed seed. Empty clusters are reseeded with the point
/// farthest from its current centroid, so every cluster ends non-empty.
pub fn kmeans(points: &[Vec<f32>], config: &KMeansConfig) -> Clustering {
    let n = points.len();
    if n == 0 {
        return Clustering {
            assignments: Vec::new(),
            centroids: Vec::new(),
            iterations: 0,
            wcss: 0.0,
        };
    }
    let k = config.k.clamp(1, n);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = kmeans_plus_plus_init(points, k, &mut rng);
    let mut assignments = vec![usize::MAX; n];
    let mut iterations = 0;

    while iterations < config.max_iterations.max(1) {
        iterations += 1;

        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let best = nearest_centroid(p, &centroids);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        reseed_empty(points, &mut assignments, &mut centroids);

        let mut shift = 0.0f32;
        for (c, members) in members_from_assignments(&assignments, k).iter().enumerate() {
            if let Some(mean) = mean_vector(members.iter().map(|&i| points[i].as_slice())) {
                shift = shift.max(squared_distance(&mean, &centroids[c]).sqrt());
                centroids[c] = mean;
            }
        }

        if !changed || shift < config.tolerance {
            break;
        }
    }

    let total = wcss(points, &members_from_assignments(&assignments, k));
    trace!(k, iterations, wcss = total, "kmeans converged");
    Clustering {
        assignments,
        centroids,
        iterations,
        wcss: total,
    }
}

/// Index of the closest centroid.
pub fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_d = f32::INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(point, centroid);
        if d < best_d {
            best_d = d;
            best = c;
        }
    }
    best
}

fn reseed_empty(points: &[Vec<f32>], assignments: &mut [usize], centroids: &mut [Vec<f32>]) {
    let k = centroids.len();
    loop {
        let mut sizes = vec![0usize; k];
        for &a in assignments.iter() {
            sizes[a] += 1;
        }
        let Some(empty) = sizes.iter().position(|&s| s == 0) else {
            return;
        };
        // Farthest point among clusters that can spare one.
        let donor = points
            .iter()
            .enumerate()
            .filter(|(i, _)| sizes[assignments[*i]] > 1)
            .map(|(i, p)| (i, squared_distance(p, &centroids[assignments[i]])))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let Some((i, _)) = donor else {
            return;
        };
        assignments[i] = empty;
        centroids[empty] = points[i].clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn blobs() -> Vec<Vec<f32>> {
        let mut pts = Vec::new();
        for &(x, y) in &[(0.0f32, 0.0f32), (10.0, 0.0), (0.0, 10.0)] {
            for j in 0..5 {
                let d = j as f32 * 0.1;
                pts.push(vec![x + d, y - d]);
            }
        }
        pts
    }

    #[test]
    fn separates_obvious_blobs() {
        let pts = blobs();
        let c = kmeans(&pts, &KMeansConfig::new(3, 7));
        assert_eq!(c.k(), 3);
        for group in pts.chunks(5).enumerate().map(|(g, _)| g * 5) {
            let label = c.assignments[group];
            assert!((group..group + 5).all(|i| c.assignments[i] == label));
        }
        assert!(c.wcss < 1.0);
    }

    #[test]
    fn init_returns_all_points_when_k_exceeds_n() {
        let pts = blobs();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(kmeans_plus_plus_init(&pts, 100, &mut rng).len(), pts.len());
    }

    #[test]
    fn duplicate_points_never_leave_empty_clusters() {
        let pts = vec![vec![1.0, 1.0]; 6];
        let c = kmeans(&pts, &KMeansConfig::new(3, 1));
        assert!(c.members().iter().all(|m| !m.is_empty()));
    }

    #[test]
    fn empty_input() {
        let c = kmeans(&[], &KMeansConfig::default());
        assert_eq!(c.k(), 0);
    }

    proptest! {
        #[test]
        fn deterministic_for_seed(
            raw in prop::collection::vec(prop::collection::vec(-5.0f32..5.0, 3), 2..40),
            k in 1usize..6,
            seed in any::<u64>(),
        ) {
            let cfg = KMeansConfig::new(k, seed);
            let a = kmeans(&raw, &cfg);
            let b = kmeans(&raw, &cfg);
            prop_assert_eq!(&a.assignments, &b.assignments);
        }

        #[test]
        fn every_cluster_is_non_empty(
            raw in prop::collection::vec(prop::collection::vec(-5.0f32..5.0, 2), 1..30),
            k in 1usize..8,
        ) {
            let c = kmeans(&raw, &KMeansConfig::new(k, 3));
            prop_assert_eq!(c.k(), k.min(raw.len()));
            prop_assert!(c.members().iter().all(|m| !m.is_empty()));
        }
    }
}
