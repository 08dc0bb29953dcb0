//! Bisecting splitter.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::kmeans::{KMeansConfig, kmeans};
use crate::metrics::{centroid, davies_bouldin, sse};

/// Bisecting parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BisectConfig {
    /// Stop once this many clusters exist.
    pub target: usize,
    /// Clusters smaller than this are never split.
    pub min_split_size: usize,
    /// A split may raise the Davies–Bouldin index by at most this much.
    pub db_tolerance: f64,
    /// Seed for the 2-means trials.
    pub seed: u64,
}

impl Default for BisectConfig {
    fn default() -> Self {
        Self {
            target: 0,
            min_split_size: 4,
            db_tolerance: 0.0,
            seed: 42,
        }
    }
}

/// Split clusters toward `config.target`.
///
/// Each round 2-means-splits the splittable cluster with the largest SSE.
/// A split that worsens Davies–Bouldin beyond the tolerance is undone and the
/// cluster is marked unsplittable. Stops at the target or when nothing is
/// left to try.
pub fn bisect(points: &[Vec<f32>], clusters: Vec<Vec<usize>>, config: &BisectConfig) -> Vec<Vec<usize>> {
    let mut clusters: Vec<Vec<usize>> = clusters.into_iter().filter(|m| !m.is_empty()).collect();
    let mut splittable: Vec<bool> = clusters
        .iter()
        .map(|m| m.len() >= config.min_split_size.max(2))
        .collect();
    let mut db = davies_bouldin(points, &clusters);
    let mut round = 0u64;

    while clusters.len() < config.target {
        let Some(worst) = (0..clusters.len())
            .filter(|&i| splittable[i])
            .map(|i| (i, sse(points, &clusters[i], &centroid(points, &clusters[i]))))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
        else {
            break;
        };

        let members = &clusters[worst];
        let subset: Vec<Vec<f32>> = members.iter().map(|&i| points[i].clone()).collect();
        let split = kmeans(&subset, &KMeansConfig::new(2, config.seed.wrapping_add(round)));
        round += 1;
        let halves = split.members();
        if halves.len() < 2 || halves.iter().any(Vec::is_empty) {
            splittable[worst] = false;
            continue;
        }
        let left: Vec<usize> = halves[0].iter().map(|&j| members[j]).collect();
        let right: Vec<usize> = halves[1].iter().map(|&j| members[j]).collect();

        let mut trial = clusters.clone();
        trial[worst] = left;
        trial.push(right);
        let trial_db = davies_bouldin(points, &trial);
        if trial_db <= db + config.db_tolerance {
            trace!(cluster = worst, before = db, after = trial_db, "split accepted");
            let min = config.min_split_size.max(2);
            splittable[worst] = trial[worst].len() >= min;
            splittable.push(trial[trial.len() - 1].len() >= min);
            clusters = trial;
            db = trial_db;
        } else {
            trace!(cluster = worst, before = db, after = trial_db, "split rejected");
            splittable[worst] = false;
        }
    }
    clusters
}
