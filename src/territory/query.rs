//! Point location against a built territory.

use super::types::{Cluster, Point, TerritoryData};
use super::voronoi::convex_contains;

/// Tolerance for points on a shared cell edge.
const EDGE_EPS: f64 = 1e-7;

/// The cluster whose Voronoi cell contains `(x, y)`.
///
/// `None` when there is no tessellation (fewer than two clusters) or the
/// point lies outside the canvas. On a shared edge the lower cluster index
/// wins. A point inside the canvas that misses every cell through rounding
/// goes to the nearest centroid.
pub fn locate(territory: &TerritoryData, x: f64, y: f64) -> Option<&Cluster> {
    let tessellation = territory.tessellation.as_ref()?;
    let p = Point::new(x, y);
    if !(x.is_finite() && y.is_finite()) || !territory.bounds.contains(p) {
        return None;
    }

    let hit = tessellation
        .cells
        .iter()
        .find(|cell| convex_contains(&cell.polygon, p, EDGE_EPS))
        .or_else(|| {
            tracing::debug!(x, y, "point outside every cell, using nearest site");
            tessellation
                .cells
                .iter()
                .min_by(|a, b| a.site.distance_squared(&p).total_cmp(&b.site.distance_squared(&p)))
        })?;

    let cluster = territory.clusters.get(hit.cluster_index);
    debug_assert!(cluster.is_some(), "cell refers to missing cluster {}", hit.cluster_index);
    cluster
}
