use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `clear_label_cache` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ClearLabelCacheParams {
    /// Safety gate against accidental calls.
    #[schemars(description = "Must be true to clear cached cluster labels")]
    pub confirm: bool,
}
