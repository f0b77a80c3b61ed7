pub mod build;
pub mod locate;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use territory_map::config::{expand_tilde, EmbeddingConfig};
use territory_map::embedding::local::model_paths;
use tokio::io::AsyncWriteExt;

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Fetch the sentence embedding model and tokenizer into the configured
/// cache directory. Files already present are left alone.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let (model_path, tokenizer_path) = model_paths(config);
    let cache_dir = expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    if model_path.exists() {
        eprintln!("model present: {}", model_path.display());
    } else {
        eprintln!("fetching {} model (~90MB)", config.model);
        download_file(MODEL_URL, &model_path).await?;
        eprintln!("  -> {}", model_path.display());
    }

    if tokenizer_path.exists() {
        eprintln!("tokenizer present: {}", tokenizer_path.display());
    } else {
        eprintln!("fetching tokenizer");
        download_file(TOKENIZER_URL, &tokenizer_path).await?;
        eprintln!("  -> {}", tokenizer_path.display());
    }

    eprintln!("embedding model ready");
    Ok(())
}

/// Stream `url` into `dest` through a sibling `.part` file, renamed on success.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => ProgressBar::new(size).with_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.green/white} {bytes}/{total_bytes} {bytes_per_sec}")?
                .progress_chars("=> "),
        ),
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    let mut response = response;
    while let Some(chunk) = response.chunk().await.context("download interrupted")? {
        file.write_all(&chunk)
            .await
            .with_context(|| format!("failed writing {}", tmp_path.display()))?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .with_context(|| format!("failed to move download into {}", dest.display()))?;

    pb.finish_and_clear();
    Ok(())
}
