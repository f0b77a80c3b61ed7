use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LocateTerritoryParams {
    #[schemars(description = "Canvas x coordinate in pixels")]
    pub x: f64,

    #[schemars(description = "Canvas y coordinate in pixels")]
    pub y: f64,
}
