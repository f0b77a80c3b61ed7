//! Territory mapping: the data model, the build pipeline and point location.

pub mod builder;
pub mod contour;
pub mod query;
pub mod snapshot;
pub mod types;
pub mod voronoi;
pub mod weight;

pub use builder::{layout_territory, TerritoryBuilder, TerritoryDraft, TerritoryOptions};
pub use contour::ContourOptions;
pub use query::locate;
pub use snapshot::{BuildTicket, LatestTerritory};
pub use types::{
    Bounds, Cluster, Contour, Material, MaterialPoint, Point, SubCluster, Tessellation,
    TerritoryCell, TerritoryData,
};
