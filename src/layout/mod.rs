//! 2D placement of materials on the canvas.

pub mod umap;

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, Axis};

use crate::config::LayoutConfig;
use crate::territory::{Bounds, Point};

/// Share of the observed range added on each side before mapping to the canvas.
const RANGE_MARGIN: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct LayoutOptions {
    pub seed: u64,
    /// Canvas margin in pixels on every side.
    pub padding: f64,
    pub max_neighbors: usize,
    pub max_epochs: usize,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self::from_config(&LayoutConfig::default())
    }
}

impl LayoutOptions {
    pub fn from_config(config: &LayoutConfig) -> Self {
        Self {
            seed: config.seed,
            padding: config.padding,
            max_neighbors: config.max_neighbors,
            max_epochs: config.max_epochs,
        }
    }

    /// Neighbour count, scaled down for small corpora and always below `n`.
    pub fn n_neighbors(&self, n: usize) -> usize {
        self.max_neighbors
            .min((n / 2).max(2))
            .min(n.saturating_sub(1))
            .max(1)
    }

    pub fn n_epochs(&self, n: usize) -> usize {
        self.max_epochs.min(n.saturating_mul(10)).max(1)
    }
}

/// Place every point on the canvas.
///
/// `cluster_of` maps point id to cluster id; the index of that id in
/// `ordered_cluster_ids` is the cohesion hint handed to the reduction. With
/// fewer than two usable vectors every point sits at the canvas center.
pub fn project(
    points: &[(String, Vec<f32>)],
    cluster_of: &HashMap<String, String>,
    ordered_cluster_ids: &[String],
    bounds: Bounds,
    options: &LayoutOptions,
) -> HashMap<String, Point> {
    let (usable, unusable): (Vec<&(String, Vec<f32>)>, Vec<&(String, Vec<f32>)>) =
        points.iter().partition(|(_, v)| !v.is_empty());

    let center = bounds.center();
    let mut positions: HashMap<String, Point> = unusable
        .iter()
        .map(|(id, _)| (id.clone(), center))
        .collect();

    if usable.len() < 2 {
        positions.extend(usable.iter().map(|(id, _)| (id.clone(), center)));
        return positions;
    }

    let cluster_index: HashMap<&str, usize> = ordered_cluster_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let labels: Vec<Option<usize>> = usable
        .iter()
        .map(|(id, _)| {
            cluster_of
                .get(id)
                .and_then(|c| cluster_index.get(c.as_str()).copied())
        })
        .collect();
    let vectors: Vec<&[f32]> = usable.iter().map(|(_, v)| v.as_slice()).collect();

    let n = usable.len();
    let params = umap::UmapParams {
        n_neighbors: options.n_neighbors(n),
        n_epochs: options.n_epochs(n),
        seed: options.seed,
    };
    let raw = umap::embed_2d(&vectors, &labels, &params);
    let scaled = scale_to_bounds(&raw, bounds, options.padding);

    positions.extend(
        usable
            .iter()
            .zip(scaled)
            .map(|((id, _), p)| (id.clone(), p)),
    );
    positions
}

/// Map the two raw columns independently into `[padding, size - padding]`.
///
/// The observed range is widened by 10% on each side first. A zero range
/// (all points equal on that axis) is treated as a unit range.
pub fn scale_to_bounds(raw: &Array2<f64>, bounds: Bounds, padding: f64) -> Vec<Point> {
    let xs = scale_axis(raw.index_axis(Axis(1), 0), bounds.width, padding);
    let ys = scale_axis(raw.index_axis(Axis(1), 1), bounds.height, padding);
    xs.into_iter().zip(ys).map(|(x, y)| Point::new(x, y)).collect()
}

fn scale_axis(values: ArrayView1<f64>, size: f64, padding: f64) -> Vec<f64> {
    // padding can never push points off a small canvas
    let padding = padding.max(0.0).min((size / 2.0).max(0.0));
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut range = max - min;
    if !(range.is_finite() && range > 0.0) {
        range = 1.0;
    }
    let lo = min - RANGE_MARGIN * range;
    let span = range * (1.0 + 2.0 * RANGE_MARGIN);
    let usable = size - 2.0 * padding;

    values
        .iter()
        .map(|v| padding + (v - lo) / span * usable)
        .collect()
}
