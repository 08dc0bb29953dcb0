//! Gated average-linkage agglomeration.

use serde::{Deserialize, Serialize};
use themex_core::vector::cosine_similarity;
use tracing::trace;

/// Agglomeration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgglomerativeConfig {
    /// Stop once this many clusters remain.
    pub target: usize,
    /// Never merge clusters whose average linkage is below this.
    pub min_similarity: f32,
}

impl Default for AgglomerativeConfig {
    fn default() -> Self {
        Self {
            target: 1,
            min_similarity: 0.0,
        }
    }
}

/// Bottom-up average-linkage clustering by cosine similarity.
///
/// Every point starts alone. At each step the most similar pair whose union
/// `gate` accepts is merged; pairs the gate rejects are skipped until one of
/// their sides changes. Stops at `config.target` clusters or when no
/// admissible merge remains. Returns member lists, each sorted.
pub fn agglomerate<G>(points: &[Vec<f32>], config: &AgglomerativeConfig, gate: G) -> Vec<Vec<usize>>
where
    G: Fn(&[usize]) -> bool,
{
    let n = points.len();
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut active = vec![true; n];
    let mut alive = n;
    let mut sim = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in i + 1..n {
            let s = cosine_similarity(&points[i], &points[j]);
            sim[i][j] = s;
            sim[j][i] = s;
        }
    }
    let mut rejected = vec![vec![false; n]; n];

    while alive > config.target.max(1) {
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for i in 0..n {
            if !active[i] {
                continue;
            }
            for j in i + 1..n {
                if active[j] && !rejected[i][j] && sim[i][j] >= config.min_similarity {
                    pairs.push((i, j, sim[i][j]));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1)));

        let mut merged = None;
        for (a, b, s) in pairs {
            let mut union = members[a].clone();
            union.extend_from_slice(&members[b]);
            union.sort_unstable();
            if gate(&union) {
                merged = Some((a, b, s, union));
                break;
            }
            rejected[a][b] = true;
            rejected[b][a] = true;
        }
        let Some((a, b, s, union)) = merged else {
            break;
        };

        // Lance–Williams update for average linkage.
        let (na, nb) = (members[a].len() as f32, members[b].len() as f32);
        for c in 0..n {
            if c == a || c == b || !active[c] {
                continue;
            }
            let s_new = (na * sim[a][c] + nb * sim[b][c]) / (na + nb);
            sim[a][c] = s_new;
            sim[c][a] = s_new;
            rejected[a][c] = false;
            rejected[c][a] = false;
        }
        trace!(a, b, linkage = s, size = union.len(), "agglomerated");
        members[a] = union;
        members[b].clear();
        active[b] = false;
        alive -= 1;
    }

    (0..n).filter(|&i| active[i]).map(|i| std::mem::take(&mut members[i])).collect()
}
