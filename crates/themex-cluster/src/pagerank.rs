//! Weighted PageRank via power iteration.

use serde::{Deserialize, Serialize};

/// PageRank parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageRankConfig {
    /// Probability of following an edge.
    pub damping: f64,
    /// Iteration cap.
    pub max_iterations: usize,
    /// Converged once the L1 change drops below this.
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

/// PageRank scores.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRankResult {
    /// Score per node; sums to 1.
    pub scores: Vec<f64>,
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the tolerance was reached.
    pub converged: bool,
}

/// PageRank over `n` nodes and directed `(from, to, weight)` edges.
///
/// Rank flows along out-edges in proportion to weight. Dangling nodes (no
/// positive out-weight) spread their rank evenly. Edges with out-of-range
/// endpoints or non-positive weight are ignored.
pub fn weighted_pagerank(n: usize, edges: &[(usize, usize, f64)], config: &PageRankConfig) -> PageRankResult {
    if n == 0 {
        return PageRankResult {
            scores: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    let mut out: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut out_weight = vec![0.0f64; n];
    for &(from, to, w) in edges {
        if from < n && to < n && w > 0.0 && w.is_finite() {
            out[from].push((to, w));
            out_weight[from] += w;
        }
    }

    let d = config.damping;
    let base = (1.0 - d) / n as f64;
    let mut scores = vec![1.0 / n as f64; n];
    let mut next = vec![0.0f64; n];
    let mut converged = false;
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        iterations += 1;
        let dangling: f64 = (0..n).filter(|&u| out_weight[u] <= 0.0).map(|u| scores[u]).sum();
        let spread = d * dangling / n as f64;
        for s in &mut next {
            *s = base + spread;
        }
        for u in 0..n {
            if out_weight[u] <= 0.0 {
                continue;
            }
            for &(v, w) in &out[u] {
                next[v] += d * scores[u] * w / out_weight[u];
            }
        }

        let diff: f64 = scores.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut scores, &mut next);
        if diff < config.tolerance {
            converged = true;
            break;
        }
    }

    PageRankResult {
        scores,
        iterations,
        converged,
    }
}
