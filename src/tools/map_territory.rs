//! MCP `map_territory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One note to place on the map.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MaterialParam {
    #[schemars(description = "Stable identifier of the note")]
    pub id: String,

    #[schemars(description = "Text content of the note")]
    pub content: String,

    #[schemars(description = "Creation time in milliseconds since the Unix epoch")]
    #[serde(alias = "createdAt")]
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MapTerritoryParams {
    #[schemars(description = "Notes to cluster, label and lay out")]
    pub materials: Vec<MaterialParam>,

    #[schemars(description = "Canvas width in pixels. Defaults to the configured width (800).")]
    pub width: Option<f64>,

    #[schemars(description = "Canvas height in pixels. Defaults to the configured height (600).")]
    pub height: Option<f64>,
}
