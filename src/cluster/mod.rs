//! Partitioning of embedded materials into topical clusters.
//!
//! All nearest-centroid decisions use cosine similarity. Centroids are plain
//! component-wise means and are never renormalized; cosine similarity is
//! scale-invariant, so comparing against an off-norm centroid is still valid.

pub mod kmeans;

pub use kmeans::{
    choose_k, cluster, sub_cluster, ClusterOptions, Clustering, SubClusterGroup,
    SubClusterOptions,
};

/// Cosine similarity in `[-1, 1]`; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// `1 - cosine_similarity`, clamped at zero against rounding.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}

/// Component-wise arithmetic mean. Empty input yields an empty vector.
pub fn mean_vector(members: &[&[f32]]) -> Vec<f32> {
    let Some(first) = members.first() else {
        return Vec::new();
    };
    let mut sum = vec![0.0f64; first.len()];
    for member in members {
        for (acc, x) in sum.iter_mut().zip(member.iter()) {
            *acc += *x as f64;
        }
    }
    let n = members.len() as f64;
    sum.into_iter().map(|s| (s / n) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_scale_invariant() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
        assert!(cosine_distance(&a, &b) < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_have_unit_distance() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_vector_has_zero_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn mean_is_not_renormalized() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let mean = mean_vector(&[&a, &b]);
        assert_eq!(mean, vec![0.5, 0.5]);
        let norm: f32 = mean.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!(norm < 0.99);
    }
}
