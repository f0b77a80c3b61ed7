//! Weighted density contours.
//!
//! A Gaussian kernel density estimate is sampled on a regular grid, then each
//! iso-level is traced with marching squares. The grid is padded with a ring
//! of zeros so every contour closes inside the canvas.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use ndarray::Array2;

use super::types::{Bounds, Contour, Point};
use crate::config::CanvasConfig;

/// Density estimation needs at least this many points.
pub const MIN_POINTS: usize = 3;

/// Kernel support in bandwidths; contributions beyond are negligible.
const KERNEL_RADIUS: f64 = 3.0;

/// Upper bound on padded grid nodes. Larger canvases get a coarser grid.
pub const MAX_GRID_NODES: usize = 250_000;

#[derive(Debug, Clone)]
pub struct ContourOptions {
    /// Grid spacing in pixels.
    pub cell_size: f64,
    /// Gaussian kernel standard deviation in pixels.
    pub bandwidth: f64,
    pub levels: usize,
}

impl Default for ContourOptions {
    fn default() -> Self {
        Self::from_config(&CanvasConfig::default())
    }
}

impl ContourOptions {
    pub fn from_config(config: &CanvasConfig) -> Self {
        Self {
            cell_size: config.contour_cell_size,
            bandwidth: config.contour_bandwidth,
            levels: config.contour_levels,
        }
    }
}

fn padded_nodes(bounds: Bounds, cell: f64) -> f64 {
    ((bounds.width / cell).ceil() + 3.0) * ((bounds.height / cell).ceil() + 3.0)
}

/// Grid spacing actually used: `requested`, widened until the padded grid
/// fits in [`MAX_GRID_NODES`].
pub fn grid_cell_size(bounds: Bounds, requested: f64) -> f64 {
    let limit = MAX_GRID_NODES as f64;
    if padded_nodes(bounds, requested) <= limit {
        return requested;
    }
    let mut cell = requested.max((bounds.width * bounds.height / limit).sqrt());
    while padded_nodes(bounds, cell) > limit {
        cell *= 1.25;
    }
    tracing::debug!(requested, cell, "contour grid coarsened for a large canvas");
    cell
}

/// Density grid with a one-cell zero border.
struct DensityGrid {
    values: Array2<f64>,
    cell_size: f64,
    bounds: Bounds,
}

impl DensityGrid {
    fn estimate(points: &[(Point, f64)], bounds: Bounds, options: &ContourOptions) -> Self {
        let cell = grid_cell_size(bounds, options.cell_size);
        let nx = (bounds.width / cell).ceil() as usize + 1;
        let ny = (bounds.height / cell).ceil() as usize + 1;
        let mut values = Array2::<f64>::zeros((ny + 2, nx + 2));

        let bw = options.bandwidth;
        let norm = 1.0 / (2.0 * PI * bw * bw);
        let reach = ((KERNEL_RADIUS * bw) / cell).ceil() as isize;
        let cutoff = (KERNEL_RADIUS * bw).powi(2);

        for (p, weight) in points {
            let cx = (p.x / cell).round() as isize;
            let cy = (p.y / cell).round() as isize;
            for gy in (cy - reach).max(0)..=(cy + reach).min(ny as isize - 1) {
                for gx in (cx - reach).max(0)..=(cx + reach).min(nx as isize - 1) {
                    let dx = gx as f64 * cell - p.x;
                    let dy = gy as f64 * cell - p.y;
                    let d2 = dx * dx + dy * dy;
                    if d2 > cutoff {
                        continue;
                    }
                    values[[gy as usize + 1, gx as usize + 1]] +=
                        weight * norm * (-d2 / (2.0 * bw * bw)).exp();
                }
            }
        }

        Self {
            values,
            cell_size: cell,
            bounds,
        }
    }

    fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Canvas position of padded grid node `(row, col)`, clamped to bounds.
    fn position(&self, row: usize, col: usize) -> Point {
        let x = (col as f64 - 1.0) * self.cell_size;
        let y = (row as f64 - 1.0) * self.cell_size;
        Point::new(
            x.clamp(0.0, self.bounds.width),
            y.clamp(0.0, self.bounds.height),
        )
    }
}

/// A grid edge crossed by the contour: horizontal edges run from `(r, c)` to
/// `(r, c + 1)`, vertical ones from `(r, c)` to `(r + 1, c)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Edge {
    H(usize, usize),
    V(usize, usize),
}

/// Density iso-contours over weighted points.
///
/// Levels are `max * l / (levels + 1)` for `l = 1..=levels`; levels without
/// any ring are omitted. Fewer than [`MIN_POINTS`] points give no contours.
pub fn density_contours(
    points: &[(Point, f64)],
    bounds: Bounds,
    options: &ContourOptions,
) -> Vec<Contour> {
    if points.len() < MIN_POINTS {
        return Vec::new();
    }
    if !(options.cell_size > 0.0 && options.bandwidth > 0.0) || options.levels == 0 {
        tracing::warn!(?options, "invalid contour options, skipping density contours");
        return Vec::new();
    }
    if !bounds.is_valid() {
        tracing::warn!(?bounds, "degenerate canvas, skipping density contours");
        return Vec::new();
    }

    let grid = DensityGrid::estimate(points, bounds, options);
    let max = grid.max();
    if max <= 0.0 {
        return Vec::new();
    }

    let contours: Vec<Contour> = (1..=options.levels)
        .map(|l| max * l as f64 / (options.levels + 1) as f64)
        .map(|threshold| Contour {
            threshold,
            rings: trace(&grid, threshold),
        })
        .filter(|c| !c.rings.is_empty())
        .collect();

    tracing::debug!(
        levels = contours.len(),
        rings = contours.iter().map(|c| c.rings.len()).sum::<usize>(),
        "density contours traced"
    );
    contours
}

/// Closed rings (first point repeated last) where density equals `threshold`.
fn trace(grid: &DensityGrid, threshold: f64) -> Vec<Vec<Point>> {
    let v = &grid.values;
    let (rows, cols) = v.dim();
    let mut links: BTreeMap<Edge, Vec<Edge>> = BTreeMap::new();
    let mut link = |a: Edge, b: Edge| {
        links.entry(a).or_default().push(b);
        links.entry(b).or_default().push(a);
    };

    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            let tl = v[[r, c]] >= threshold;
            let tr = v[[r, c + 1]] >= threshold;
            let br = v[[r + 1, c + 1]] >= threshold;
            let bl = v[[r + 1, c]] >= threshold;

            let top = Edge::H(r, c);
            let right = Edge::V(r, c + 1);
            let bottom = Edge::H(r + 1, c);
            let left = Edge::V(r, c);

            match (tl, tr, br, bl) {
                (false, false, false, false) | (true, true, true, true) => {}
                // one corner differs from the other three
                (true, false, false, false) | (false, true, true, true) => link(left, top),
                (false, true, false, false) | (true, false, true, true) => link(top, right),
                (false, false, true, false) | (true, true, false, true) => link(right, bottom),
                (false, false, false, true) | (true, true, true, false) => link(bottom, left),
                // two adjacent corners
                (true, true, false, false) | (false, false, true, true) => link(left, right),
                (false, true, true, false) | (true, false, false, true) => link(top, bottom),
                // saddles, resolved by the cell's mean value
                (true, false, true, false) | (false, true, false, true) => {
                    let center = (v[[r, c]] + v[[r, c + 1]] + v[[r + 1, c + 1]] + v[[r + 1, c]])
                        / 4.0
                        >= threshold;
                    // center on tl's side: tr and bl are cut off, else tl and br
                    if center == tl {
                        link(top, right);
                        link(bottom, left);
                    } else {
                        link(left, top);
                        link(right, bottom);
                    }
                }
            }
        }
    }

    let mut visited: BTreeSet<Edge> = BTreeSet::new();
    let mut rings = Vec::new();
    for &start in links.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut ring = Vec::new();
        let mut current = start;
        loop {
            visited.insert(current);
            ring.push(crossing(grid, current, threshold));
            let next = links
                .get(&current)
                .and_then(|ns| ns.iter().find(|n| !visited.contains(n)).copied());
            match next {
                Some(n) => current = n,
                None => break,
            }
        }
        if ring.len() >= 3 {
            ring.push(ring[0]);
            rings.push(ring);
        }
    }
    rings
}

/// Linear interpolation of the threshold crossing along a grid edge.
fn crossing(grid: &DensityGrid, edge: Edge, threshold: f64) -> Point {
    let (a, b) = match edge {
        Edge::H(r, c) => ((r, c), (r, c + 1)),
        Edge::V(r, c) => ((r, c), (r + 1, c)),
    };
    let va = grid.values[[a.0, a.1]];
    let vb = grid.values[[b.0, b.1]];
    let pa = grid.position(a.0, a.1);
    let pb = grid.position(b.0, b.1);

    let t = if (vb - va).abs() > f64::EPSILON {
        ((threshold - va) / (vb - va)).clamp(0.0, 1.0)
    } else {
        0.5
    };
    Point::new(pa.x + t * (pb.x - pa.x), pa.y + t * (pb.y - pa.y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted(points: &[(f64, f64)]) -> Vec<(Point, f64)> {
        points.iter().map(|&(x, y)| (Point::new(x, y), 1.0)).collect()
    }

    #[test]
    fn fewer_than_three_points_have_no_contours() {
        let points = weighted(&[(100.0, 100.0), (120.0, 100.0)]);
        assert!(density_contours(&points, Bounds::default(), &ContourOptions::default()).is_empty());
    }

    #[test]
    fn thresholds_are_evenly_spaced_below_max() {
        let points = weighted(&[(400.0, 300.0), (410.0, 300.0), (400.0, 310.0)]);
        let options = ContourOptions {
            levels: 4,
            ..ContourOptions::default()
        };
        let contours = density_contours(&points, Bounds::default(), &options);
        assert_eq!(contours.len(), 4);
        let step = contours[0].threshold;
        for (l, contour) in contours.iter().enumerate() {
            assert!((contour.threshold - step * (l + 1) as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn rings_are_closed_and_inside_bounds() {
        let bounds = Bounds::new(400.0, 300.0);
        let points = weighted(&[(5.0, 5.0), (12.0, 8.0), (200.0, 150.0), (210.0, 160.0)]);
        let contours = density_contours(&points, bounds, &ContourOptions::default());
        assert!(!contours.is_empty());
        for contour in &contours {
            for ring in &contour.rings {
                assert!(ring.len() >= 4);
                assert_eq!(ring.first(), ring.last());
                for p in ring {
                    assert!(bounds.contains(*p), "{p:?} outside canvas");
                }
            }
        }
    }

    #[test]
    fn separated_blobs_give_separate_rings() {
        let points = weighted(&[
            (100.0, 100.0),
            (105.0, 100.0),
            (100.0, 105.0),
            (650.0, 450.0),
            (655.0, 450.0),
            (650.0, 455.0),
        ]);
        let contours = density_contours(&points, Bounds::default(), &ContourOptions::default());
        // the highest level only surrounds the two dense cores
        let top = contours.last().unwrap();
        assert_eq!(top.rings.len(), 2);
    }

    #[test]
    fn default_canvas_keeps_requested_cell_size() {
        assert_eq!(grid_cell_size(Bounds::default(), 8.0), 8.0);
    }

    #[test]
    fn huge_canvas_gets_a_bounded_grid() {
        let bounds = Bounds::new(1.0e6, 1.0e6);
        let cell = grid_cell_size(bounds, 8.0);
        assert!(cell > 8.0);
        assert!(padded_nodes(bounds, cell) <= MAX_GRID_NODES as f64);

        let points = weighted(&[(5.0e5, 5.0e5), (5.0e5 + 10.0, 5.0e5), (5.0e5, 5.0e5 + 10.0)]);
        let options = ContourOptions {
            bandwidth: 30_000.0,
            ..ContourOptions::default()
        };
        let contours = density_contours(&points, bounds, &options);
        assert!(!contours.is_empty());
        for ring in contours.iter().flat_map(|c| &c.rings) {
            assert!(ring.iter().all(|p| bounds.contains(*p)));
        }
    }

    #[test]
    fn heavier_points_raise_density() {
        let light = weighted(&[(400.0, 300.0), (410.0, 300.0), (400.0, 310.0)]);
        let heavy: Vec<(Point, f64)> = light.iter().map(|(p, _)| (*p, 1.5)).collect();
        let options = ContourOptions::default();
        let a = density_contours(&light, Bounds::default(), &options);
        let b = density_contours(&heavy, Bounds::default(), &options);
        assert!(b[0].threshold > a[0].threshold);
    }
}
