//! Cluster quality metrics.
//!
//! Clusters are member-index lists into a shared `points` slice.

use themex_core::vector::{cosine_similarity, euclidean_distance, mean_vector, squared_distance};

/// Mean of the member vectors; empty for an empty cluster.
pub fn centroid(points: &[Vec<f32>], members: &[usize]) -> Vec<f32> {
    mean_vector(members.iter().map(|&i| points[i].as_slice())).unwrap_or_default()
}

/// Sum of squared distances from members to `center`.
pub fn sse(points: &[Vec<f32>], members: &[usize], center: &[f32]) -> f64 {
    members
        .iter()
        .map(|&i| f64::from(squared_distance(&points[i], center)))
        .sum()
}

/// Total within-cluster sum of squares.
pub fn wcss(points: &[Vec<f32>], clusters: &[Vec<usize>]) -> f64 {
    clusters
        .iter()
        .filter(|m| !m.is_empty())
        .map(|m| sse(points, m, &centroid(points, m)))
        .sum()
}

/// Mean member-to-centroid cosine similarity.
pub fn cohesion(points: &[Vec<f32>], members: &[usize], center: &[f32]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let total: f64 = members
        .iter()
        .map(|&i| f64::from(cosine_similarity(&points[i], center)))
        .sum();
    total / members.len() as f64
}

/// Mean pairwise cosine similarity among members (internal consistency).
///
/// A single member is trivially consistent.
pub fn ici(points: &[Vec<f32>], members: &[usize]) -> f64 {
    if members.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for (a, &i) in members.iter().enumerate() {
        for &j in &members[a + 1..] {
            total += f64::from(cosine_similarity(&points[i], &points[j]));
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Mean pairwise cosine distance between centroids.
pub fn separation(centroids: &[Vec<f32>]) -> f64 {
    if centroids.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0f64;
    let mut pairs = 0usize;
    for i in 0..centroids.len() {
        for j in i + 1..centroids.len() {
            total += 1.0 - f64::from(cosine_similarity(&centroids[i], &centroids[j]));
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Highest cosine similarity between any two centroids; 0 for fewer than two.
pub fn max_pairwise_similarity(centroids: &[Vec<f32>]) -> f64 {
    let mut max = f64::NEG_INFINITY;
    for i in 0..centroids.len() {
        for j in i + 1..centroids.len() {
            max = max.max(f64::from(cosine_similarity(&centroids[i], &centroids[j])));
        }
    }
    if max.is_finite() { max } else { 0.0 }
}

/// Davies–Bouldin index; lower is better. Empty clusters are ignored.
pub fn davies_bouldin(points: &[Vec<f32>], clusters: &[Vec<usize>]) -> f64 {
    let live: Vec<&Vec<usize>> = clusters.iter().filter(|m| !m.is_empty()).collect();
    if live.len() < 2 {
        return 0.0;
    }
    let centers: Vec<Vec<f32>> = live.iter().map(|m| centroid(points, m)).collect();
    let scatter: Vec<f64> = live
        .iter()
        .zip(&centers)
        .map(|(m, c)| {
            let total: f64 = m
                .iter()
                .map(|&i| f64::from(euclidean_distance(&points[i], c)))
                .sum();
            total / m.len() as f64
        })
        .collect();

    let mut sum = 0.0f64;
    for i in 0..live.len() {
        let mut worst = 0.0f64;
        for j in 0..live.len() {
            if i == j {
                continue;
            }
            let spread = scatter[i] + scatter[j];
            let apart = f64::from(euclidean_distance(&centers[i], &centers[j]));
            let ratio = if apart > 1e-12 {
                spread / apart
            } else if spread > 0.0 {
                1e12
            } else {
                0.0
            };
            worst = worst.max(ratio);
        }
        sum += worst;
    }
    sum / live.len() as f64
}

/// Group an assignment vector into member lists of length `k`.
pub fn members_from_assignments(assignments: &[usize], k: usize) -> Vec<Vec<usize>> {
    let mut clusters = vec![Vec::new(); k];
    for (i, &c) in assignments.iter().enumerate() {
        if c < k {
            clusters[c].push(i);
        }
    }
    clusters
}
