//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that wire up the
//! embedding cache, label cache, territory builder and MCP tool handler into a
//! running server.

use crate::tools::TerritoryTools;
use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::Arc;
use territory_map::config::TerritoryConfig;
use territory_map::label::LabelCache;
use territory_map::territory::{LatestTerritory, TerritoryBuilder};

/// Shared setup: open the embedding cache, load the model and create the
/// builder. One label cache and one latest-map cell serve every session.
fn setup_shared_state(
    config: TerritoryConfig,
) -> Result<(
    Arc<TerritoryBuilder>,
    Arc<LatestTerritory>,
    Arc<TerritoryConfig>,
)> {
    let labels = Arc::new(LabelCache::new());
    let builder = TerritoryBuilder::from_config(&config, labels, true)?;
    tracing::info!(model = %config.embedding.model, "embedding provider ready");

    Ok((
        Arc::new(builder),
        Arc::new(LatestTerritory::new()),
        Arc::new(config),
    ))
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: TerritoryConfig) -> Result<()> {
    tracing::info!("starting territory MCP server on stdio");

    let (builder, latest, config) = setup_shared_state(config)?;

    let tools = TerritoryTools::new(builder, latest, config);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over streamable HTTP, mounted at `/mcp`.
pub async fn serve_http(config: TerritoryConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting territory MCP server on HTTP");

    let (builder, latest, config) = setup_shared_state(config)?;

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || {
            Ok(TerritoryTools::new(
                builder.clone(),
                latest.clone(),
                config.clone(),
            ))
        },
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    Ok(())
}
