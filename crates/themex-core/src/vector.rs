//! Vector normalization, similarity, and averaging.

/// Compute the L2 (Euclidean) norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2-normalize a vector in-place. Zero vectors remain zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have equal dimensions");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Squared Euclidean distance between two vectors.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have equal dimensions");
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Euclidean distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_distance(a, b).sqrt()
}

/// Component-wise mean of a set of vectors.
///
/// Returns `None` for an empty set.
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum = first.to_vec();
    let mut count = 1usize;
    for v in iter {
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += x;
        }
        count += 1;
    }
    let n = count as f32;
    for s in &mut sum {
        *s /= n;
    }
    Some(sum)
}

/// Weighted mean of vectors, `weights[i]` applying to `vectors[i]`.
pub fn weighted_mean(vectors: &[&[f32]], weights: &[f32]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let mut sum = vec![0.0f32; first.len()];
    for (v, w) in vectors.iter().zip(weights.iter()) {
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += x * w;
        }
    }
    for s in &mut sum {
        *s /= total;
    }
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn l2_norm_known() {
        assert!(approx_eq(l2_norm(&[3.0, 4.0]), 5.0));
    }

    #[test]
    fn l2_norm_empty() {
        assert!(approx_eq(l2_norm(&[]), 0.0));
    }

    #[test]
    fn l2_normalize_known_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!(approx_eq(v[0], 0.6));
        assert!(approx_eq(v[1], 0.8));
    }

    #[test]
    fn l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0), "zero vector stays zero");
        assert!(!v.iter().any(|x| x.is_nan()), "no NaN");
    }

    #[test]
    fn cosine_identical() {
        let v = vec![0.6, 0.8];
        assert!(approx_eq(cosine_similarity(&v, &v), 1.0));
    }

    #[test]
    fn cosine_orthogonal() {
        assert!(approx_eq(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0));
    }

    #[test]
    fn cosine_opposite() {
        assert!(approx_eq(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0));
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert!(approx_eq(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0));
    }

    #[test]
    fn euclidean_known() {
        assert!(approx_eq(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0));
        assert!(approx_eq(squared_distance(&[0.0, 0.0], &[3.0, 4.0]), 25.0));
    }

    #[test]
    fn mean_of_two() {
        let a = [1.0, 3.0];
        let b = [3.0, 5.0];
        let m = mean_vector([a.as_slice(), b.as_slice()]).unwrap();
        assert_eq!(m, vec![2.0, 4.0]);
    }

    #[test]
    fn mean_of_nothing() {
        let empty: Vec<&[f32]> = Vec::new();
        assert!(mean_vector(empty).is_none());
    }

    #[test]
    fn weighted_mean_matches_member_mean() {
        // Centroids of sizes 1 and 3 combine into the mean of all four points.
        let a = [0.0, 0.0];
        let b = [4.0, 8.0];
        let m = weighted_mean(&[&a, &b], &[1.0, 3.0]).unwrap();
        assert!(approx_eq(m[0], 3.0));
        assert!(approx_eq(m[1], 6.0));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalize_produces_unit(v in proptest::collection::vec(-100.0f32..100.0, 1..64)) {
                let has_nonzero = v.iter().any(|x| *x != 0.0);
                let mut v = v;
                l2_normalize(&mut v);
                if has_nonzero {
                    prop_assert!((l2_norm(&v) - 1.0).abs() < 1e-4);
                }
            }

            #[test]
            fn cosine_symmetry_and_bounds(
                a in proptest::collection::vec(-100.0f32..100.0, 8),
                b in proptest::collection::vec(-100.0f32..100.0, 8),
            ) {
                let ab = cosine_similarity(&a, &b);
                let ba = cosine_similarity(&b, &a);
                prop_assert!((ab - ba).abs() < 1e-5);
                prop_assert!((-1.0..=1.0).contains(&ab));
            }

            #[test]
            fn euclidean_non_negative(
                a in proptest::collection::vec(-100.0f32..100.0, 6),
                b in proptest::collection::vec(-100.0f32..100.0, 6),
            ) {
                prop_assert!(euclidean_distance(&a, &b) >= 0.0);
            }
        }
    }
}
