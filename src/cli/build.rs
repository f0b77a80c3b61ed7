use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use territory_map::config::TerritoryConfig;
use territory_map::label::LabelCache;
use territory_map::territory::{Bounds, Material, TerritoryBuilder, TerritoryData};

/// Accepted input shapes: a bare array of materials, or an object wrapping one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaterialsFile {
    Bare(Vec<Material>),
    Wrapped { materials: Vec<Material> },
}

impl MaterialsFile {
    fn into_materials(self) -> Vec<Material> {
        match self {
            MaterialsFile::Bare(materials) | MaterialsFile::Wrapped { materials } => materials,
        }
    }
}

pub struct BuildArgs {
    /// `-` reads from stdin.
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub pretty: bool,
    pub no_labels: bool,
}

/// Build a territory from a materials file and write it as JSON.
pub async fn build(config: &TerritoryConfig, args: BuildArgs) -> Result<()> {
    let bounds = Bounds::new(
        args.width.unwrap_or(config.territory.width),
        args.height.unwrap_or(config.territory.height),
    );
    anyhow::ensure!(
        bounds.is_valid(),
        "canvas must have a positive width and height, got {}x{}",
        bounds.width,
        bounds.height
    );

    let materials = read_materials(&args.input)?;
    let builder = TerritoryBuilder::from_config(config, Arc::new(LabelCache::new()), !args.no_labels)?;

    let spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::default_spinner().template("{spinner} {msg} [{elapsed}]")?,
    );
    spinner.set_message(format!("mapping {} materials", materials.len()));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let data = builder.build(materials, bounds).await;
    spinner.finish_and_clear();
    let data = data?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&data)?
    } else {
        serde_json::to_string(&data)?
    };
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    print_summary(&data);
    Ok(())
}

fn read_materials(input: &Path) -> Result<Vec<Material>> {
    let raw = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read materials from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("failed to read materials file: {}", input.display()))?
    };

    let file: MaterialsFile =
        serde_json::from_str(&raw).context("materials must be a JSON array of {id, content, created_at}")?;
    Ok(file.into_materials())
}

fn print_summary(data: &TerritoryData) {
    eprintln!(
        "{} points, {} clusters, {} contours",
        data.points.len(),
        data.clusters.len(),
        data.contours.len()
    );
    for cluster in &data.clusters {
        eprintln!("  {:<32} {:>4}", cluster.label, cluster.member_ids.len());
        for sub in &cluster.sub_clusters {
            eprintln!("    {:<30} {:>4}", sub.label, sub.member_ids.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_and_wrapped_inputs() {
        let bare = r#"[{"id":"a","content":"x","created_at":1}]"#;
        let wrapped = r#"{"materials":[{"id":"a","content":"x","createdAt":1}]}"#;

        let a: MaterialsFile = serde_json::from_str(bare).unwrap();
        let b: MaterialsFile = serde_json::from_str(wrapped).unwrap();
        assert_eq!(a.into_materials(), b.into_materials());
    }

    #[test]
    fn reads_materials_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.json");
        std::fs::write(
            &path,
            r#"[{"id":"a","content":"one","created_at":1},{"id":"b","content":"two","created_at":2}]"#,
        )
        .unwrap();

        let materials = read_materials(&path).unwrap();
        assert_eq!(materials.len(), 2);
        assert_eq!(materials[1].id, "b");
    }

    #[test]
    fn rejects_malformed_input() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, r#"{"notes":[]}"#).unwrap();
        assert!(read_materials(&path).is_err());
    }
}
