//! K-means in cosine space with K-means++ style seeding.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{cosine_distance, cosine_similarity, mean_vector};

/// Sub-clustering needs at least this many members with vectors.
pub const SUB_CLUSTER_MIN_MEMBERS: usize = 4;

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub max_iterations: usize,
    /// Overrides [`choose_k`]. Clamped to `1..=n`.
    pub force_k: Option<usize>,
    pub seed: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            force_k: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubClusterOptions {
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for SubClusterOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            seed: 42,
        }
    }
}

/// Result of a top-level clustering run.
#[derive(Debug, Clone, Default)]
pub struct Clustering {
    /// Item id → index into `centroids`.
    pub assignment: HashMap<String, usize>,
    pub centroids: Vec<Vec<f32>>,
    pub iterations: usize,
}

impl Clustering {
    pub fn k(&self) -> usize {
        self.centroids.len()
    }
}

/// Members of one sub-cluster, in the parent's member order.
#[derive(Debug, Clone, PartialEq)]
pub struct SubClusterGroup {
    pub member_ids: Vec<String>,
    pub centroid: Vec<f32>,
}

/// Number of clusters for a corpus of `n` items.
///
/// Small corpora get few clusters so labels stay meaningful; large ones are
/// capped at 7.
pub fn choose_k(n: usize) -> usize {
    match n {
        0..=3 => 1,
        4..=6 => 2,
        7..=12 => 3,
        13..=20 => 4,
        21..=35 => 5,
        _ => ((n as f64).sqrt().floor() as usize).min(7),
    }
}

/// Partition `(id, vector)` pairs into clusters.
///
/// Zero items give an empty result. A single item forms one cluster with an
/// empty centroid vector.
pub fn cluster(items: &[(String, Vec<f32>)], options: &ClusterOptions) -> Clustering {
    match items {
        [] => return Clustering::default(),
        [(id, _)] => {
            return Clustering {
                assignment: HashMap::from([(id.clone(), 0)]),
                centroids: vec![Vec::new()],
                iterations: 0,
            }
        }
        _ => {}
    }

    let n = items.len();
    let k = options.force_k.unwrap_or_else(|| choose_k(n)).clamp(1, n);
    let vectors: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);

    let run = run_kmeans(&vectors, k, options.max_iterations, &mut rng);
    tracing::debug!(n, k, iterations = run.iterations, "k-means converged");

    let assignment = items
        .iter()
        .zip(run.labels.iter())
        .map(|((id, _), &label)| (id.clone(), label))
        .collect();

    Clustering {
        assignment,
        centroids: run.centroids,
        iterations: run.iterations,
    }
}

/// Split one cluster's members into 2 or 3 sub-clusters, largest first.
///
/// Only members with a vector in `vectors` take part; nothing is attempted
/// below [`SUB_CLUSTER_MIN_MEMBERS`]. Assignment never leaves the parent.
pub fn sub_cluster(
    member_ids: &[&str],
    vectors: &HashMap<&str, &[f32]>,
    options: &SubClusterOptions,
) -> Vec<SubClusterGroup> {
    if member_ids.len() < SUB_CLUSTER_MIN_MEMBERS {
        return Vec::new();
    }
    let resolved: Vec<(&str, &[f32])> = member_ids
        .iter()
        .filter_map(|id| vectors.get(id).map(|v| (*id, *v)))
        .collect();
    if resolved.len() < SUB_CLUSTER_MIN_MEMBERS {
        return Vec::new();
    }

    let sub_k = (resolved.len() / 3).clamp(2, 3);
    let member_vectors: Vec<&[f32]> = resolved.iter().map(|(_, v)| *v).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let run = run_kmeans(&member_vectors, sub_k, options.max_iterations, &mut rng);

    let mut groups: Vec<SubClusterGroup> = run
        .centroids
        .into_iter()
        .map(|centroid| SubClusterGroup {
            member_ids: Vec::new(),
            centroid,
        })
        .collect();
    for ((id, _), &label) in resolved.iter().zip(run.labels.iter()) {
        groups[label].member_ids.push((*id).to_string());
    }

    groups.retain(|g| !g.member_ids.is_empty());
    groups.sort_by(|a, b| b.member_ids.len().cmp(&a.member_ids.len()));
    groups
}

struct KmeansRun {
    labels: Vec<usize>,
    centroids: Vec<Vec<f32>>,
    iterations: usize,
}

fn run_kmeans(
    vectors: &[&[f32]],
    k: usize,
    max_iterations: usize,
    rng: &mut impl Rng,
) -> KmeansRun {
    let mut centroids = seed_centroids(vectors, k, rng);
    let mut labels: Vec<Option<usize>> = vec![None; vectors.len()];
    let mut iterations = 0;

    // At least one assignment pass so every item has a label.
    for _ in 0..max_iterations.max(1) {
        iterations += 1;

        let mut changed = false;
        for (label, vector) in labels.iter_mut().zip(vectors.iter()) {
            let best = nearest_centroid(vector, &centroids);
            if *label != Some(best) {
                *label = Some(best);
                changed = true;
            }
        }
        if !changed {
            break;
        }

        update_centroids(vectors, &labels, &mut centroids);
    }

    KmeansRun {
        labels: labels.into_iter().map(|l| l.unwrap_or(0)).collect(),
        centroids,
        iterations,
    }
}

/// First centroid uniformly at random, then each next one drawn with
/// probability proportional to the (unsquared) cosine distance to the
/// nearest centroid chosen so far.
fn seed_centroids(vectors: &[&[f32]], k: usize, rng: &mut impl Rng) -> Vec<Vec<f32>> {
    let n = vectors.len();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(vectors[rng.random_range(0..n)].to_vec());

    while centroids.len() < k {
        let distances: Vec<f64> = vectors
            .iter()
            .map(|v| {
                centroids
                    .iter()
                    .map(|c| cosine_distance(v, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();

        let mut chosen = None;
        if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            for (i, d) in distances.iter().enumerate() {
                target -= d;
                if target <= 0.0 {
                    chosen = Some(i);
                    break;
                }
            }
        }
        // all points coincide with a centroid, or rounding overshot the last item
        let index = chosen.unwrap_or_else(|| rng.random_range(0..n));
        centroids.push(vectors[index].to_vec());
    }

    centroids
}

/// Index of the most similar centroid; ties go to the lower index.
fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_similarity = f64::NEG_INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = cosine_similarity(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best = i;
        }
    }
    best
}

/// Replace each centroid with its members' mean. A centroid that lost all
/// members keeps its previous value.
fn update_centroids(vectors: &[&[f32]], labels: &[Option<usize>], centroids: &mut [Vec<f32>]) {
    for (c, centroid) in centroids.iter_mut().enumerate() {
        let members: Vec<&[f32]> = vectors
            .iter()
            .zip(labels.iter())
            .filter(|(_, label)| **label == Some(c))
            .map(|(v, _)| *v)
            .collect();
        if !members.is_empty() {
            *centroid = mean_vector(&members);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike(dims: usize, at: usize, noise_at: usize, noise: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        v[at] = 1.0;
        v[noise_at] += noise;
        v
    }

    #[test]
    fn seeding_is_proportional_to_plain_distance() {
        // from the anchor: `far` sits at distance 1, `near` at distance 0.5
        let anchor = vec![1.0f32, 0.0];
        let far = vec![0.0f32, 1.0];
        let near = vec![0.5f32, 0.866_025_4];
        let mut vectors: Vec<&[f32]> = vec![anchor.as_slice(); 8];
        vectors.push(far.as_slice());
        vectors.push(near.as_slice());

        let (mut anchored, mut picked_near) = (0u32, 0u32);
        for seed in 0..3000 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let centroids = seed_centroids(&vectors, 2, &mut rng);
            if centroids[0] != anchor {
                continue;
            }
            anchored += 1;
            if centroids[1] == near {
                picked_near += 1;
            }
        }

        // d weighting gives 1/3, d-squared would give 1/5
        let share = picked_near as f64 / anchored as f64;
        assert!(anchored > 1500, "anchor drawn first only {anchored} times");
        assert!((0.29..0.38).contains(&share), "near picked with share {share:.3}");
    }

    #[test]
    fn seeding_falls_back_to_uniform_when_all_distances_are_zero() {
        // same direction, different magnitudes: every cosine distance is 0
        let a = vec![1.0f32, 0.0];
        let b = vec![2.0f32, 0.0];
        let c = vec![3.0f32, 0.0];
        let vectors: Vec<&[f32]> = vec![a.as_slice(), b.as_slice(), c.as_slice()];

        let mut counts = [0u32; 3];
        for seed in 0..3000 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let centroids = seed_centroids(&vectors, 2, &mut rng);
            assert_eq!(centroids.len(), 2);
            let second = vectors
                .iter()
                .position(|v| *v == centroids[1].as_slice())
                .unwrap();
            counts[second] += 1;
        }

        for (i, count) in counts.iter().enumerate() {
            let share = *count as f64 / 3000.0;
            assert!((0.28..0.39).contains(&share), "vector {i} picked with share {share:.3}");
        }
    }

    fn items(vectors: Vec<Vec<f32>>) -> Vec<(String, Vec<f32>)> {
        vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("m{i}"), v))
            .collect()
    }

    #[test]
    fn choose_k_table() {
        let expected = [
            (0, 1),
            (1, 1),
            (3, 1),
            (4, 2),
            (6, 2),
            (7, 3),
            (12, 3),
            (13, 4),
            (20, 4),
            (21, 5),
            (35, 5),
            (36, 6),
            (48, 6),
            (49, 7),
            (50, 7),
            (1000, 7),
        ];
        for (n, k) in expected {
            assert_eq!(choose_k(n), k, "n = {n}");
        }
    }

    #[test]
    fn empty_and_single_inputs() {
        let empty = cluster(&[], &ClusterOptions::default());
        assert!(empty.assignment.is_empty());
        assert_eq!(empty.k(), 0);

        let single = cluster(&items(vec![vec![1.0, 0.0]]), &ClusterOptions::default());
        assert_eq!(single.assignment["m0"], 0);
        assert_eq!(single.centroids, vec![Vec::<f32>::new()]);
    }

    #[test]
    fn separates_two_directions() {
        let vectors = vec![
            spike(4, 0, 1, 0.1),
            spike(4, 0, 2, 0.1),
            spike(4, 0, 3, 0.05),
            spike(4, 2, 0, 0.1),
            spike(4, 2, 1, 0.1),
            spike(4, 2, 3, 0.05),
        ];
        let result = cluster(&items(vectors), &ClusterOptions::default());
        assert_eq!(result.k(), 2);
        let a = result.assignment["m0"];
        let b = result.assignment["m3"];
        assert_ne!(a, b);
        for id in ["m1", "m2"] {
            assert_eq!(result.assignment[id], a);
        }
        for id in ["m4", "m5"] {
            assert_eq!(result.assignment[id], b);
        }
    }

    #[test]
    fn force_k_is_clamped_to_item_count() {
        let vectors = vec![spike(3, 0, 1, 0.0), spike(3, 1, 2, 0.0), spike(3, 2, 0, 0.0)];
        let options = ClusterOptions {
            force_k: Some(10),
            ..ClusterOptions::default()
        };
        let result = cluster(&items(vectors), &options);
        assert_eq!(result.k(), 3);
    }

    #[test]
    fn same_seed_same_assignment() {
        let vectors: Vec<Vec<f32>> = (0..15).map(|i| spike(6, i % 6, (i + 1) % 6, 0.3)).collect();
        let data = items(vectors);
        let first = cluster(&data, &ClusterOptions::default());
        let second = cluster(&data, &ClusterOptions::default());
        assert_eq!(first.assignment, second.assignment);
        assert_eq!(first.centroids, second.centroids);
    }

    #[test]
    fn centroid_update_is_unnormalized_mean() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.5f32, 0.5, 0.0];
        let c = [0.0f32, 0.0, 1.0];
        let vectors: Vec<&[f32]> = vec![a.as_slice(), b.as_slice(), c.as_slice()];
        let mut centroids = vec![vec![0.0; 3], vec![0.0; 3], vec![9.0; 3]];
        update_centroids(&vectors, &[Some(0), Some(0), Some(1)], &mut centroids);
        assert_eq!(centroids[0], vec![0.75, 0.25, 0.0]);
        assert_eq!(centroids[1], vec![0.0, 0.0, 1.0]);
        // no members: previous value kept
        assert_eq!(centroids[2], vec![9.0; 3]);
    }

    #[test]
    fn identical_vectors_leave_empty_clusters_untouched() {
        let vectors = vec![vec![1.0, 0.0]; 5];
        let options = ClusterOptions {
            force_k: Some(2),
            ..ClusterOptions::default()
        };
        let result = cluster(&items(vectors), &options);
        // every item ties on similarity and goes to the first centroid
        assert!(result.assignment.values().all(|&c| c == 0));
        assert_eq!(result.centroids[1], vec![1.0, 0.0]);
    }

    #[test]
    fn nearest_centroid_prefers_first_on_tie() {
        let centroids = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        assert_eq!(nearest_centroid(&[3.0, 3.0], &centroids), 0);
    }

    #[test]
    fn sub_cluster_requires_four_resolvable_members() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let vectors: HashMap<&str, &[f32]> =
            HashMap::from([("a", &a[..]), ("b", &b[..]), ("c", &a[..])]);
        let groups = sub_cluster(&["a", "b", "c", "d"], &vectors, &SubClusterOptions::default());
        assert!(groups.is_empty());
    }

    #[test]
    fn sub_clusters_partition_parent_members_largest_first() {
        let raw: Vec<Vec<f32>> = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.95, 0.05, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.97, 0.0, 0.03],
            vec![0.0, 1.0, 0.0],
            vec![0.05, 0.95, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let ids: Vec<String> = (0..raw.len()).map(|i| format!("s{i}")).collect();
        let vectors: HashMap<&str, &[f32]> = ids
            .iter()
            .map(|s| s.as_str())
            .zip(raw.iter().map(|v| v.as_slice()))
            .collect();
        let members: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

        let groups = sub_cluster(&members, &vectors, &SubClusterOptions::default());
        // n = 7 → sub_k = clamp(2, 2, 3) = 2
        assert!(!groups.is_empty() && groups.len() <= 2);
        let total: usize = groups.iter().map(|g| g.member_ids.len()).sum();
        assert_eq!(total, 7);
        for pair in groups.windows(2) {
            assert!(pair[0].member_ids.len() >= pair[1].member_ids.len());
        }
        for group in &groups {
            for id in &group.member_ids {
                assert!(members.contains(&id.as_str()));
            }
        }
    }
}
