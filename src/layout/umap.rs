//! Seeded UMAP-style reduction to two dimensions.
//!
//! Builds a k-nearest-neighbour graph in cosine distance, turns it into a
//! fuzzy simplicial set (smooth-kNN bandwidths, fuzzy union), intersects it
//! with the cluster labelling so same-cluster edges dominate, then lays the
//! graph out with negative-sampling SGD. Every random draw comes from one
//! `ChaCha8Rng`, and edges are visited in key order, so equal inputs give
//! bit-identical output.

use std::collections::BTreeMap;

use ndarray::{Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Curve parameters for `min_dist = 0.1`, `spread = 1.0`.
const CURVE_A: f64 = 1.577;
const CURVE_B: f64 = 0.895;
const GRADIENT_CLIP: f64 = 4.0;
const NEGATIVE_SAMPLE_RATE: usize = 5;
const INIT_RANGE: f64 = 10.0;

/// Edge weight factor between points of different clusters.
const FAR_LABEL_FACTOR: f64 = 0.006_737_946_999_085_467; // e^-5
/// Edge weight factor when either endpoint has no cluster.
const UNKNOWN_LABEL_FACTOR: f64 = 0.367_879_441_171_442_33; // e^-1

const SIGMA_SEARCH_STEPS: usize = 64;
const SIGMA_TOLERANCE: f64 = 1e-5;
const MIN_SCALE: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct UmapParams {
    pub n_neighbors: usize,
    pub n_epochs: usize,
    pub seed: u64,
}

/// Undirected fuzzy graph, keyed by `(i, j)` with `i < j`.
type FuzzyGraph = BTreeMap<(usize, usize), f64>;

/// Reduce `vectors` to an `n × 2` array.
///
/// `labels[i]` is point `i`'s cluster index, if it has one. Callers handle
/// `n < 2`; this function assumes at least two points.
pub fn embed_2d(vectors: &[&[f32]], labels: &[Option<usize>], params: &UmapParams) -> Array2<f64> {
    let n = vectors.len();
    let k = params.n_neighbors.clamp(1, n.saturating_sub(1).max(1));
    let epochs = params.n_epochs.max(1);

    let distances = cosine_distances(vectors);
    let neighbors = knn(&distances, k);
    let mut graph = fuzzy_union(&memberships(&distances, &neighbors, k));
    intersect_labels(&mut graph, labels);
    prune(&mut graph, epochs);

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut embedding = Array2::from_shape_fn((n, 2), |_| {
        rng.random_range(-INIT_RANGE..=INIT_RANGE)
    });

    optimize(&mut embedding, &graph, epochs, &mut rng);

    tracing::debug!(n, k, epochs, edges = graph.len(), "layout optimized");
    embedding
}

/// Pairwise cosine distances via one matrix product of row-normalized vectors.
fn cosine_distances(vectors: &[&[f32]]) -> Array2<f64> {
    let n = vectors.len();
    let dims = vectors.iter().map(|v| v.len()).max().unwrap_or(0);

    let mut normalized = Array2::<f64>::zeros((n, dims));
    for (mut row, vector) in normalized.axis_iter_mut(Axis(0)).zip(vectors) {
        let norm = vector
            .iter()
            .map(|x| (*x as f64) * (*x as f64))
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 {
            for (slot, x) in row.iter_mut().zip(vector.iter()) {
                *slot = *x as f64 / norm;
            }
        }
    }

    let similarity = normalized.dot(&normalized.t());
    let mut distances = similarity.mapv(|s| (1.0 - s).max(0.0));
    distances.diag_mut().fill(0.0);
    distances
}

/// The `k` nearest other points of each point, nearest first; ties by index.
fn knn(distances: &Array2<f64>, k: usize) -> Vec<Vec<(usize, f64)>> {
    distances
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, row)| {
            let mut others: Vec<(usize, f64)> = row
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, d)| (j, *d))
                .collect();
            others.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            others.truncate(k);
            others
        })
        .collect()
}

/// Directed membership strengths `exp(-(d - rho) / sigma)` per kNN edge.
fn memberships(
    distances: &Array2<f64>,
    neighbors: &[Vec<(usize, f64)>],
    k: usize,
) -> BTreeMap<(usize, usize), f64> {
    let target = (k as f64).log2();
    let mean_distance = distances.mean().unwrap_or(0.0);

    let mut strengths = BTreeMap::new();
    for (i, row) in neighbors.iter().enumerate() {
        let rho = row
            .iter()
            .map(|(_, d)| *d)
            .find(|d| *d > 0.0)
            .unwrap_or(0.0);
        let sigma = smooth_sigma(row, rho, target).max(MIN_SCALE * mean_distance.max(f64::EPSILON));

        for (j, d) in row {
            let strength = if *d <= rho {
                1.0
            } else {
                (-(d - rho) / sigma).exp()
            };
            strengths.insert((i, *j), strength);
        }
    }
    strengths
}

/// Binary search for the bandwidth whose membership sum equals `target`.
fn smooth_sigma(row: &[(usize, f64)], rho: f64, target: f64) -> f64 {
    let (mut lo, mut hi, mut mid) = (0.0f64, f64::INFINITY, 1.0f64);
    for _ in 0..SIGMA_SEARCH_STEPS {
        let sum: f64 = row
            .iter()
            .map(|(_, d)| {
                let excess = d - rho;
                if excess > 0.0 {
                    (-excess / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (sum - target).abs() < SIGMA_TOLERANCE {
            break;
        }
        if sum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }
    mid
}

/// Symmetrize with the probabilistic t-conorm `a + b - ab`.
fn fuzzy_union(directed: &BTreeMap<(usize, usize), f64>) -> FuzzyGraph {
    let mut graph = FuzzyGraph::new();
    for (&(i, j), &w) in directed {
        let key = (i.min(j), i.max(j));
        if graph.contains_key(&key) {
            continue;
        }
        let reverse = directed.get(&(j, i)).copied().unwrap_or(0.0);
        graph.insert(key, w + reverse - w * reverse);
    }
    graph
}

/// Down-weight edges that cross cluster boundaries.
fn intersect_labels(graph: &mut FuzzyGraph, labels: &[Option<usize>]) {
    for (&(i, j), w) in graph.iter_mut() {
        let a = labels.get(i).copied().flatten();
        let b = labels.get(j).copied().flatten();
        *w *= match (a, b) {
            (Some(a), Some(b)) if a == b => 1.0,
            (Some(_), Some(_)) => FAR_LABEL_FACTOR,
            _ => UNKNOWN_LABEL_FACTOR,
        };
    }
}

/// Drop edges too weak to be sampled even once during optimization.
fn prune(graph: &mut FuzzyGraph, epochs: usize) {
    let max = graph.values().copied().fold(0.0, f64::max);
    let floor = max / epochs as f64;
    graph.retain(|_, w| *w > 0.0 && *w >= floor);
}

fn optimize(embedding: &mut Array2<f64>, graph: &FuzzyGraph, epochs: usize, rng: &mut impl Rng) {
    let n = embedding.nrows();
    let edges: Vec<((usize, usize), f64)> = graph.iter().map(|(k, w)| (*k, *w)).collect();
    let max = edges.iter().map(|(_, w)| *w).fold(0.0, f64::max);
    if max <= 0.0 {
        return;
    }

    // Strong edges are sampled every epoch, weak ones proportionally less.
    let epochs_per_sample: Vec<f64> = edges.iter().map(|(_, w)| max / w).collect();
    let mut next_sample = epochs_per_sample.clone();

    for epoch in 0..epochs {
        let alpha = 1.0 - epoch as f64 / epochs as f64;
        let now = epoch as f64 + 1.0;

        for (e, &((i, j), _)) in edges.iter().enumerate() {
            if next_sample[e] > now {
                continue;
            }
            attract(embedding, i, j, alpha);

            for _ in 0..NEGATIVE_SAMPLE_RATE {
                let other = rng.random_range(0..n);
                if other != i {
                    repel(embedding, i, other, alpha);
                }
            }
            next_sample[e] += epochs_per_sample[e];
        }
    }
}

fn clip(g: f64) -> f64 {
    g.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn attract(embedding: &mut Array2<f64>, i: usize, j: usize, alpha: f64) {
    let dx = embedding[[i, 0]] - embedding[[j, 0]];
    let dy = embedding[[i, 1]] - embedding[[j, 1]];
    let dist2 = dx * dx + dy * dy;
    if dist2 <= 0.0 {
        return;
    }

    let coef = -2.0 * CURVE_A * CURVE_B * dist2.powf(CURVE_B - 1.0)
        / (1.0 + CURVE_A * dist2.powf(CURVE_B));
    let gx = clip(coef * dx) * alpha;
    let gy = clip(coef * dy) * alpha;
    embedding[[i, 0]] += gx;
    embedding[[i, 1]] += gy;
    embedding[[j, 0]] -= gx;
    embedding[[j, 1]] -= gy;
}

fn repel(embedding: &mut Array2<f64>, i: usize, k: usize, alpha: f64) {
    let dx = embedding[[i, 0]] - embedding[[k, 0]];
    let dy = embedding[[i, 1]] - embedding[[k, 1]];
    let dist2 = dx * dx + dy * dy;

    let (gx, gy) = if dist2 > 0.0 {
        let coef = 2.0 * CURVE_B / ((0.001 + dist2) * (1.0 + CURVE_A * dist2.powf(CURVE_B)));
        (clip(coef * dx), clip(coef * dy))
    } else {
        (GRADIENT_CLIP, GRADIENT_CLIP)
    };
    embedding[[i, 0]] += gx * alpha;
    embedding[[i, 1]] += gy * alpha;
}
