//! Territory data model.
//!
//! [`Material`] is the caller's input. Everything else is produced by a build
//! and collected into the immutable [`TerritoryData`] snapshot.

use serde::{Deserialize, Serialize};

/// A short note to be mapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: String,
    pub content: String,
    /// Creation time as milliseconds since the Unix epoch.
    #[serde(alias = "createdAt")]
    pub created_at: i64,
}

/// A position in canvas space (pixels, origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_squared(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Arithmetic mean of the given points, or `None` for an empty input.
    pub fn mean<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Point> {
        let (mut sx, mut sy, mut n) = (0.0, 0.0, 0usize);
        for p in points {
            sx += p.x;
            sy += p.y;
            n += 1;
        }
        (n > 0).then(|| Point::new(sx / n as f64, sy / n as f64))
    }
}

/// Canvas size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub width: f64,
    pub height: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

impl Bounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Finite and strictly positive in both dimensions.
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: Point) -> bool {
        (0.0..=self.width).contains(&p.x) && (0.0..=self.height).contains(&p.y)
    }

    /// Corners starting at the origin, counter-clockwise in x-right, y-up terms.
    pub fn corners(&self) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(self.width, 0.0),
            Point::new(self.width, self.height),
            Point::new(0.0, self.height),
        ]
    }
}

/// A material placed on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialPoint {
    pub id: String,
    pub position: Point,
    pub cluster_id: String,
    /// Recency × depth weight, always > 0.
    pub weight: f64,
}

/// A finer grouping inside a [`Cluster`], used for level-of-detail display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCluster {
    pub id: String,
    /// Back-reference to the owning cluster's id.
    pub parent_id: String,
    pub label: String,
    pub member_ids: Vec<String>,
    pub centroid_position: Point,
}

/// A topical territory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub label: String,
    pub member_ids: Vec<String>,
    /// Mean member embedding. Not renormalized; empty for a single-material corpus.
    pub centroid_vector: Vec<f32>,
    pub centroid_position: Point,
    /// Largest first.
    pub sub_clusters: Vec<SubCluster>,
}

/// One density iso-level: every closed ring where the estimated density equals `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub threshold: f64,
    pub rings: Vec<Vec<Point>>,
}

/// The Voronoi cell owned by one cluster, clipped to the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritoryCell {
    /// Index into [`TerritoryData::clusters`].
    pub cluster_index: usize,
    pub site: Point,
    /// Convex polygon with the same winding as [`Bounds::corners`].
    pub polygon: Vec<Point>,
}

/// Planar subdivision of the canvas by nearest cluster centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tessellation {
    pub cells: Vec<TerritoryCell>,
}

/// Immutable result of one territory build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritoryData {
    /// UUID v7 of the build that produced this snapshot.
    pub build_id: String,
    /// Milliseconds since the Unix epoch.
    pub generated_at: i64,
    pub points: Vec<MaterialPoint>,
    /// Descending member count.
    pub clusters: Vec<Cluster>,
    pub contours: Vec<Contour>,
    /// `None` with fewer than two clusters.
    pub tessellation: Option<Tessellation>,
    pub bounds: Bounds,
}

impl TerritoryData {
    /// Snapshot for an empty corpus.
    pub fn empty(bounds: Bounds) -> Self {
        Self {
            build_id: uuid::Uuid::now_v7().to_string(),
            generated_at: chrono::Utc::now().timestamp_millis(),
            points: Vec::new(),
            clusters: Vec::new(),
            contours: Vec::new(),
            tessellation: None,
            bounds,
        }
    }

    pub fn cluster(&self, id: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id == id)
    }

    pub fn point(&self, id: &str) -> Option<&MaterialPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    /// The cluster whose territory contains `(x, y)`.
    pub fn locate(&self, x: f64, y: f64) -> Option<&Cluster> {
        super::query::locate(self, x, y)
    }
}
