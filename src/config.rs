use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::matcher::SelectionPolicy;
use crate::segment::DEFAULT_MIN_FRAGMENT_LENGTH;
use crate::semantic::DEFAULT_MODEL;

const CONFIG_FILE: &str = "config.yaml";

/// Catalog rows per embedding call during bootstrap
const DEFAULT_EMBED_BATCH_SIZE: usize = 256;
const DEFAULT_SKILLS_THRESHOLD: f32 = 0.6;
const DEFAULT_OCCUPATIONS_THRESHOLD: f32 = 0.55;
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8000;
/// Big extraction batches take a while on CPU
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 1200;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationStrategy {
    #[default]
    Delimiter,
    Span,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default)]
    pub strategy: SegmentationStrategy,

    /// Shortest fragment kept by the delimiter strategy (characters)
    #[serde(default = "default_min_fragment_length")]
    pub min_fragment_length: usize,

    /// Recognizer command for the span strategy, e.g. ["python3", "ner.py"]
    #[serde(default)]
    pub command: Vec<String>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            strategy: SegmentationStrategy::Delimiter,
            min_fragment_length: DEFAULT_MIN_FRAGMENT_LENGTH,
            command: vec![],
        }
    }
}

fn default_min_fragment_length() -> usize {
    DEFAULT_MIN_FRAGMENT_LENGTH
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub name: String,
    /// CSV path, relative to the config directory unless absolute
    pub path: String,
    /// Minimum similarity, exclusive, in [0.0, 1.0]
    pub threshold: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Embedding model name (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Where catalog embedding matrices are cached. Defaults to `<base>/cache`.
    #[serde(default)]
    pub cache_dir: Option<String>,

    #[serde(default)]
    pub selection_policy: SelectionPolicy,

    #[serde(default)]
    pub segmentation: SegmentationConfig,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    #[serde(default = "default_catalogs")]
    pub catalogs: Vec<CatalogConfig>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            cache_dir: None,
            selection_policy: SelectionPolicy::default(),
            segmentation: SegmentationConfig::default(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            catalogs: default_catalogs(),
            server: ServerConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_embed_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}

fn default_catalogs() -> Vec<CatalogConfig> {
    vec![
        CatalogConfig {
            name: "skills".to_string(),
            path: "skills.csv".to_string(),
            threshold: DEFAULT_SKILLS_THRESHOLD,
        },
        CatalogConfig {
            name: "occupations".to_string(),
            path: "occupations.csv".to_string(),
            threshold: DEFAULT_OCCUPATIONS_THRESHOLD,
        },
    ]
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }

        if self.embed_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embed_batch_size must be greater than 0".to_string(),
            ));
        }

        let seg = &self.segmentation;
        if seg.min_fragment_length == 0 {
            return Err(ConfigError::Invalid(
                "segmentation.min_fragment_length must be greater than 0".to_string(),
            ));
        }
        if seg.strategy == SegmentationStrategy::Span && seg.command.is_empty() {
            return Err(ConfigError::Invalid(
                "segmentation.command is required for the span strategy".to_string(),
            ));
        }

        if self.catalogs.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one catalog must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for (idx, catalog) in self.catalogs.iter().enumerate() {
            let idx = idx + 1;
            if catalog.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("catalog #{idx} has no name")));
            }
            if !names.insert(catalog.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "catalog '{}' is configured twice",
                    catalog.name
                )));
            }
            if !(0.0..=1.0).contains(&catalog.threshold) {
                return Err(ConfigError::Invalid(format!(
                    "catalogs.{}.threshold must be between 0.0 and 1.0, got {}",
                    catalog.name, catalog.threshold
                )));
            }
        }

        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults if it doesn't exist.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        Self::load_from(&base_path.join(CONFIG_FILE))
    }

    /// Load a config file, writing defaults if it doesn't exist.
    ///
    /// Relative paths inside the config resolve against the file's directory.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if !path.exists() {
            log::info!("Creating default config at {}", path.display());
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            std::fs::write(path, serde_yml::to_string(&Self::default())?).map_err(io_err)?;
        }

        let config_str = std::fs::read_to_string(path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        config.validate()?;

        Ok(config)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => self.resolve(dir),
            None => self.base_path.join("cache"),
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.base_path.join("models")
    }

    /// Resolve a config-relative path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// Apply `name=value` threshold overrides from the command line.
    pub fn apply_threshold_overrides(&mut self, overrides: &[String]) -> Result<(), ConfigError> {
        for item in overrides {
            let (name, value) = item.split_once('=').ok_or_else(|| {
                ConfigError::Invalid(format!("threshold override '{item}' is not name=value"))
            })?;
            let value: f32 = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("threshold override '{item}' is not a number"))
            })?;

            let catalog = self
                .catalogs
                .iter_mut()
                .find(|c| c.name == name.trim())
                .ok_or_else(|| ConfigError::Invalid(format!("unknown catalog '{name}'")))?;
            catalog.threshold = value;
        }

        self.validate()
    }
}
