//! Diversity merging of near-duplicate clusters.

use themex_core::vector::{cosine_similarity, weighted_mean};
use tracing::trace;

/// A candidate cluster for merging.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Caller's identifier; a merged group keeps its representative's id.
    pub id: usize,
    /// Member point indices.
    pub members: Vec<usize>,
    /// Cluster centroid.
    pub centroid: Vec<f32>,
    /// Quality score; the best member of a merged group represents it.
    pub quality: f64,
}

/// Merge groups of candidates whose centroids are pairwise at least
/// `threshold` cosine-similar.
///
/// Seeds are visited in descending quality; each seed greedily gathers every
/// remaining candidate similar to all current group members. Passes repeat
/// until no pair reaches the threshold. The output is in descending quality.
pub fn merge_near_duplicates(candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    let mut current = candidates;
    loop {
        sort_by_quality(&mut current);
        let n = current.len();
        let mut taken = vec![false; n];
        let mut next = Vec::with_capacity(n);
        let mut merged_any = false;

        for seed in 0..n {
            if taken[seed] {
                continue;
            }
            taken[seed] = true;
            let mut group = vec![seed];
            for other in seed + 1..n {
                if taken[other] {
                    continue;
                }
                let joins = group.iter().all(|&g| {
                    cosine_similarity(&current[g].centroid, &current[other].centroid) >= threshold
                });
                if joins {
                    taken[other] = true;
                    group.push(other);
                }
            }
            if group.len() > 1 {
                merged_any = true;
                trace!(representative = current[seed].id, size = group.len(), "merging near duplicates");
            }
            next.push(combine(group.iter().map(|&g| &current[g])));
        }

        current = next;
        if !merged_any {
            break;
        }
    }
    sort_by_quality(&mut current);
    current
}

/// Merge the most similar pair until at most `max` candidates remain.
pub fn merge_to_at_most(candidates: Vec<Candidate>, max: usize) -> Vec<Candidate> {
    let mut current = candidates;
    let max = max.max(1);
    while current.len() > max {
        let mut best = (0, 1, f32::NEG_INFINITY);
        for i in 0..current.len() {
            for j in i + 1..current.len() {
                let s = cosine_similarity(&current[i].centroid, &current[j].centroid);
                if s > best.2 {
                    best = (i, j, s);
                }
            }
        }
        let (i, j, _) = best;
        let right = current.swap_remove(j);
        let left = current.swap_remove(i);
        current.push(combine([&left, &right]));
    }
    sort_by_quality(&mut current);
    current
}

fn combine<'a>(group: impl IntoIterator<Item = &'a Candidate>) -> Candidate {
    let group: Vec<&Candidate> = group.into_iter().collect();
    let rep = group
        .iter()
        .max_by(|a, b| a.quality.total_cmp(&b.quality))
        .copied()
        .unwrap_or(group[0]);
    if group.len() == 1 {
        return rep.clone();
    }
    let vectors: Vec<&[f32]> = group.iter().map(|c| c.centroid.as_slice()).collect();
    let weights: Vec<f32> = group.iter().map(|c| c.members.len().max(1) as f32).collect();
    let mut members: Vec<usize> = group.iter().flat_map(|c| c.members.iter().copied()).collect();
    members.sort_unstable();
    members.dedup();
    Candidate {
        id: rep.id,
        members,
        centroid: weighted_mean(&vectors, &weights).unwrap_or_else(|| rep.centroid.clone()),
        quality: rep.quality,
    }
}

fn sort_by_quality(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.quality.total_cmp(&a.quality).then(a.id.cmp(&b.id)));
}
