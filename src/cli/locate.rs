use anyhow::{Context, Result};
use std::path::Path;

use territory_map::territory::TerritoryData;

/// Print the cluster owning `(x, y)` in a saved territory, or `null`.
pub fn locate(territory: &Path, x: f64, y: f64) -> Result<()> {
    let raw = std::fs::read_to_string(territory)
        .with_context(|| format!("failed to read territory file: {}", territory.display()))?;
    let data: TerritoryData =
        serde_json::from_str(&raw).context("file is not a territory produced by `territory build`")?;

    match data.locate(x, y) {
        Some(cluster) => {
            println!("{}", serde_json::to_string_pretty(cluster)?);
            eprintln!("({x}, {y}) -> {} [{}]", cluster.label, cluster.id);
        }
        None => {
            println!("null");
            if data.tessellation.is_none() {
                eprintln!("territory has fewer than two clusters; nothing to locate");
            } else {
                eprintln!("({x}, {y}) is outside the canvas");
            }
        }
    }
    Ok(())
}
