pub mod clear_label_cache;
pub mod locate_territory;
pub mod map_territory;

use clear_label_cache::ClearLabelCacheParams;
use locate_territory::LocateTerritoryParams;
use map_territory::MapTerritoryParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use std::sync::Arc;

use territory_map::config::TerritoryConfig;
use territory_map::territory::{Bounds, LatestTerritory, Material, TerritoryBuilder};

/// The territory MCP tool handler. Holds the builder (embedding cache, label
/// cache), the latest published map and config, and exposes the tools via
/// the `#[tool_router]` macro.
#[derive(Clone)]
pub struct TerritoryTools {
    tool_router: ToolRouter<Self>,
    builder: Arc<TerritoryBuilder>,
    latest: Arc<LatestTerritory>,
    config: Arc<TerritoryConfig>,
}

#[tool_router]
impl TerritoryTools {
    pub fn new(
        builder: Arc<TerritoryBuilder>,
        latest: Arc<LatestTerritory>,
        config: Arc<TerritoryConfig>,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            builder,
            latest,
            config,
        }
    }

    /// Build a territory map from notes and remember it for `locate_territory`.
    #[tool(description = "Cluster notes by meaning, label each cluster, lay them out in 2D and return the territory map (points, clusters, density contours, Voronoi cells) as JSON. The result becomes the current map for locate_territory.")]
    async fn map_territory(
        &self,
        Parameters(params): Parameters<MapTerritoryParams>,
    ) -> Result<String, String> {
        let bounds = Bounds::new(
            params.width.unwrap_or(self.config.territory.width),
            params.height.unwrap_or(self.config.territory.height),
        );
        if !bounds.is_valid() {
            return Err("width and height must be positive".into());
        }

        let materials: Vec<Material> = params
            .materials
            .into_iter()
            .map(|m| Material {
                id: m.id,
                content: m.content,
                created_at: m.created_at,
            })
            .collect();

        tracing::info!(
            materials = materials.len(),
            width = bounds.width,
            height = bounds.height,
            "map_territory called"
        );

        let ticket = self.latest.begin();
        let data = self
            .builder
            .build(materials, bounds)
            .await
            .map_err(|e| format!("territory build failed: {e}"))?;

        let json = serde_json::to_string(&data).map_err(|e| format!("serialization failed: {e}"))?;
        if !self.latest.publish(ticket, data) {
            tracing::info!("a newer map was published meanwhile; returning this one without storing it");
        }
        Ok(json)
    }

    /// Resolve a canvas coordinate to the territory that owns it.
    #[tool(description = "Find which cluster's territory contains the canvas point (x, y) on the current map. Returns the cluster, or null when the point is off the canvas or the map has fewer than two clusters.")]
    async fn locate_territory(
        &self,
        Parameters(params): Parameters<LocateTerritoryParams>,
    ) -> Result<String, String> {
        let data = self
            .latest
            .current()
            .ok_or("no territory map yet; call map_territory first")?;

        let cluster = data.locate(params.x, params.y);
        tracing::info!(
            x = params.x,
            y = params.y,
            cluster = cluster.map(|c| c.id.as_str()).unwrap_or("none"),
            "locate_territory called"
        );

        Ok(serde_json::json!({
            "build_id": data.build_id,
            "cluster": cluster.map(|c| serde_json::json!({
                "id": c.id,
                "label": c.label,
                "member_ids": c.member_ids,
                "centroid_position": c.centroid_position,
                "sub_clusters": c.sub_clusters.iter().map(|s| serde_json::json!({
                    "id": s.id,
                    "label": s.label,
                    "member_count": s.member_ids.len(),
                })).collect::<Vec<_>>(),
            })),
        })
        .to_string())
    }

    /// Forget every cached cluster label.
    #[tool(description = "Clear cached cluster labels so the next map_territory call relabels every cluster. Requires confirm=true.")]
    async fn clear_label_cache(
        &self,
        Parameters(params): Parameters<ClearLabelCacheParams>,
    ) -> Result<String, String> {
        if !params.confirm {
            return Err("set confirm=true to clear the label cache".into());
        }
        let cleared = self.builder.labeler().cache().clear();
        tracing::info!(cleared, "label cache cleared");
        Ok(serde_json::json!({ "cleared": cleared }).to_string())
    }
}

#[tool_handler]
impl ServerHandler for TerritoryTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Territory maps notes by meaning. Call map_territory with notes to get \
                 labeled clusters and a 2D layout, then locate_territory to resolve a \
                 canvas point to its cluster."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
