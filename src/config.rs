use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TerritoryConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub clustering: ClusteringConfig,
    pub layout: LayoutConfig,
    pub territory: CanvasConfig,
    pub labeling: LabelingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding cached embedding vectors.
    pub cache_db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusteringConfig {
    pub max_iterations: usize,
    pub sub_max_iterations: usize,
    pub seed: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LayoutConfig {
    pub seed: u64,
    pub padding: f64,
    pub max_neighbors: usize,
    pub max_epochs: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: f64,
    pub height: f64,
    pub contour_cell_size: f64,
    pub contour_bandwidth: f64,
    pub contour_levels: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LabelingConfig {
    /// When false, every label comes from the local keyword heuristic.
    pub enabled: bool,
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the bearer key.
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub temperature: f32,
}

impl Default for TerritoryConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            clustering: ClusteringConfig::default(),
            layout: LayoutConfig::default(),
            territory: CanvasConfig::default(),
            labeling: LabelingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 8790,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let cache_db_path = default_territory_dir()
            .join("embeddings.db")
            .to_string_lossy()
            .into_owned();
        Self { cache_db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_territory_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            sub_max_iterations: 10,
            seed: 42,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            padding: 40.0,
            max_neighbors: 15,
            max_epochs: 200,
        }
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            contour_cell_size: 8.0,
            contour_bandwidth: 30.0,
            contour_levels: 10,
        }
    }
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "TERRITORY_LABEL_API_KEY".into(),
            timeout_ms: 5000,
            temperature: 0.2,
        }
    }
}

/// Returns `~/.territory/`
pub fn default_territory_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".territory")
}

/// Returns the default config file path: `~/.territory/config.toml`
pub fn default_config_path() -> PathBuf {
    default_territory_dir().join("config.toml")
}

/// Something worth reporting about how the config was loaded. Loading
/// happens before logging is set up, so callers log these afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNotice {
    /// No file at this path; built-in defaults were used.
    DefaultsUsed(PathBuf),
    /// `TERRITORY_SEED` held something other than a `u64`.
    IgnoredSeed(String),
}

impl ConfigNotice {
    pub fn log(&self) {
        match self {
            ConfigNotice::DefaultsUsed(path) => {
                tracing::info!(path = %path.display(), "no config file, using defaults")
            }
            ConfigNotice::IgnoredSeed(value) => {
                tracing::warn!(value = %value, "ignoring non-numeric TERRITORY_SEED")
            }
        }
    }
}

impl TerritoryConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<(Self, Vec<ConfigNotice>)> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<(Self, Vec<ConfigNotice>)> {
        let path = path.as_ref();
        let mut notices = Vec::new();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            notices.push(ConfigNotice::DefaultsUsed(path.to_path_buf()));
            TerritoryConfig::default()
        };

        notices.extend(config.apply_env_overrides());
        Ok((config, notices))
    }

    /// Apply environment variable overrides (TERRITORY_CACHE_DB, TERRITORY_LOG_LEVEL,
    /// TERRITORY_LABEL_ENDPOINT, TERRITORY_SEED).
    fn apply_env_overrides(&mut self) -> Option<ConfigNotice> {
        if let Ok(val) = std::env::var("TERRITORY_CACHE_DB") {
            self.storage.cache_db_path = val;
        }
        if let Ok(val) = std::env::var("TERRITORY_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("TERRITORY_LABEL_ENDPOINT") {
            self.labeling.endpoint = val;
            self.labeling.enabled = true;
        }
        let val = std::env::var("TERRITORY_SEED").ok()?;
        match val.parse::<u64>() {
            Ok(seed) => {
                self.clustering.seed = seed;
                self.layout.seed = seed;
                None
            }
            Err(_) => Some(ConfigNotice::IgnoredSeed(val)),
        }
    }

    /// Resolve the embedding cache path, expanding `~` if needed.
    pub fn resolved_cache_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.cache_db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
