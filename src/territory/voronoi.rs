//! Voronoi tessellation of the canvas by cluster centroid.
//!
//! Each cell starts as the canvas rectangle and is clipped by the
//! perpendicular bisector against every other site. The result is convex.

use super::types::{Bounds, Point, Tessellation, TerritoryCell};

/// Vertices within this distance of a bisector count as on it.
const EPS_CLIP: f64 = 1e-9;
/// Sites closer than this (squared) are treated as coincident.
const EPS_COINCIDENT: f64 = 1e-18;

/// The half-plane of points at least as close to `site` as to `other`.
#[derive(Debug, Clone, Copy)]
struct HalfPlane {
    normal: Point,
    offset: f64,
}

impl HalfPlane {
    fn bisector(site: Point, other: Point) -> Self {
        let normal = Point::new(site.x - other.x, site.y - other.y);
        let mid = Point::new((site.x + other.x) / 2.0, (site.y + other.y) / 2.0);
        Self {
            normal,
            offset: normal.x * mid.x + normal.y * mid.y,
        }
    }

    /// Positive on the `site` side, zero on the bisector.
    fn signed_distance(&self, p: Point) -> f64 {
        self.normal.x * p.x + self.normal.y * p.y - self.offset
    }
}

/// Tessellate `bounds` by `sites`. `None` with fewer than two sites.
///
/// Cell `i` belongs to `sites[i]`. Coincident sites both receive the shared
/// region; [`super::query::locate`] resolves the overlap by order.
pub fn tessellate(sites: &[Point], bounds: Bounds) -> Option<Tessellation> {
    if sites.len() < 2 {
        return None;
    }

    let cells = sites
        .iter()
        .enumerate()
        .filter_map(|(i, &site)| {
            let mut polygon = bounds.corners();
            for (j, &other) in sites.iter().enumerate() {
                if i == j || site.distance_squared(&other) < EPS_COINCIDENT {
                    continue;
                }
                polygon = clip(&polygon, HalfPlane::bisector(site, other));
                if polygon.len() < 3 {
                    tracing::debug!(cluster_index = i, "voronoi cell clipped away");
                    return None;
                }
            }
            Some(TerritoryCell {
                cluster_index: i,
                site,
                polygon,
            })
        })
        .collect();

    Some(Tessellation { cells })
}

/// Sutherland-Hodgman clip of a convex polygon against one half-plane.
fn clip(polygon: &[Point], plane: HalfPlane) -> Vec<Point> {
    let n = polygon.len();
    let mut out = Vec::with_capacity(n + 1);

    for i in 0..n {
        let current = polygon[i];
        let next = polygon[(i + 1) % n];
        let d_current = plane.signed_distance(current);
        let d_next = plane.signed_distance(next);
        let current_inside = d_current >= -EPS_CLIP;
        let next_inside = d_next >= -EPS_CLIP;

        if current_inside {
            out.push(current);
        }
        if current_inside != next_inside {
            let t = d_current / (d_current - d_next);
            out.push(Point::new(
                current.x + t * (next.x - current.x),
                current.y + t * (next.y - current.y),
            ));
        }
    }

    out.dedup_by(|a, b| a.distance_squared(b) < EPS_CLIP * EPS_CLIP);
    if out.len() > 1 && out[0].distance_squared(&out[out.len() - 1]) < EPS_CLIP * EPS_CLIP {
        out.pop();
    }
    out
}

/// Shoelace area, positive for the winding of [`Bounds::corners`].
pub fn polygon_area(polygon: &[Point]) -> f64 {
    let n = polygon.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let a = polygon[i];
            let b = polygon[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice / 2.0
}

/// Boundary-inclusive containment test for a convex polygon of either winding.
pub fn convex_contains(polygon: &[Point], p: Point, eps: f64) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (mut positive, mut negative) = (false, false);
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        let scale = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt().max(1.0);
        if cross > eps * scale {
            positive = true;
        } else if cross < -eps * scale {
            negative = true;
        }
        if positive && negative {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Bounds {
        Bounds::new(800.0, 600.0)
    }

    #[test]
    fn fewer_than_two_sites_have_no_tessellation() {
        assert!(tessellate(&[], bounds()).is_none());
        assert!(tessellate(&[Point::new(10.0, 10.0)], bounds()).is_none());
    }

    #[test]
    fn two_sites_split_the_canvas_at_the_bisector() {
        let sites = [Point::new(200.0, 300.0), Point::new(600.0, 300.0)];
        let tess = tessellate(&sites, bounds()).unwrap();
        assert_eq!(tess.cells.len(), 2);

        let left = &tess.cells[0];
        assert!(left.polygon.iter().all(|p| p.x <= 400.0 + 1e-9));
        assert!((polygon_area(&left.polygon) - 400.0 * 600.0).abs() < 1e-6);
        assert!((polygon_area(&tess.cells[1].polygon) - 400.0 * 600.0).abs() < 1e-6);
    }

    #[test]
    fn cells_cover_the_canvas() {
        let sites = [
            Point::new(120.0, 80.0),
            Point::new(650.0, 150.0),
            Point::new(400.0, 500.0),
            Point::new(90.0, 560.0),
        ];
        let tess = tessellate(&sites, bounds()).unwrap();
        let total: f64 = tess.cells.iter().map(|c| polygon_area(&c.polygon)).sum();
        assert!((total - 800.0 * 600.0).abs() < 1e-6, "total {total}");
        for cell in &tess.cells {
            assert!(convex_contains(&cell.polygon, cell.site, 1e-9));
        }
    }

    #[test]
    fn coincident_sites_share_a_cell() {
        let sites = [
            Point::new(300.0, 300.0),
            Point::new(300.0, 300.0),
            Point::new(700.0, 300.0),
        ];
        let tess = tessellate(&sites, bounds()).unwrap();
        assert_eq!(tess.cells.len(), 3);
        assert_eq!(tess.cells[0].polygon, tess.cells[1].polygon);
    }

    #[test]
    fn containment_is_boundary_inclusive() {
        let square = Bounds::new(10.0, 10.0).corners();
        assert!(convex_contains(&square, Point::new(5.0, 5.0), 1e-9));
        assert!(convex_contains(&square, Point::new(0.0, 5.0), 1e-9));
        assert!(convex_contains(&square, Point::new(10.0, 10.0), 1e-9));
        assert!(!convex_contains(&square, Point::new(10.5, 5.0), 1e-9));

        let mut reversed = square.clone();
        reversed.reverse();
        assert!(convex_contains(&reversed, Point::new(5.0, 5.0), 1e-9));
    }
}
