use crate::embed::LoadOptions;
use crate::error::{EmbedError, Result};
use directories::BaseDirs;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Overrides the data root (default `~/.semantic-embed`)
pub const HOME_ENV: &str = "SEMANTIC_EMBED_HOME";
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub models: PathBuf,
    pub config: PathBuf,
}

impl Paths {
    pub fn new(root_override: Option<PathBuf>) -> Result<Self> {
        let root = match root_override {
            Some(path) => path,
            None => {
                let base = BaseDirs::new().ok_or_else(|| EmbedError::Config {
                    path: "~".to_string(),
                    reason: "missing home dir".to_string(),
                })?;
                base.home_dir().join(".semantic-embed")
            }
        };

        Ok(Self {
            models: root.join("models"),
            config: root.join("config.toml"),
            root,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserConfig {
    /// Model used when none is given on the command line
    pub model: Option<String>,
    /// Where model weights are cached. Default: `<root>/models`.
    pub cache_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub max_length: Option<usize>,
    /// ONNX Runtime threads. Default: available parallelism.
    pub threads: Option<usize>,
}

impl UserConfig {
    pub fn load(paths: &Paths) -> Result<Self> {
        let path = &paths.config;
        if !path.exists() {
            return Ok(Self::default());
        }
        let invalid = |reason: String| EmbedError::Config {
            path: path.display().to_string(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let config: UserConfig = toml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Values supplied on the command line; each one beats the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub max_length: Option<usize>,
}

/// Everything one invocation needs to know after merging sources
#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub load: LoadOptions,
}

impl Settings {
    pub fn resolve(paths: &Paths, config: &UserConfig, overrides: Overrides) -> Self {
        let model = overrides
            .model
            .unwrap_or_else(|| config.model().to_string());
        let cache_dir = overrides
            .cache_dir
            .or_else(|| config.cache_dir.clone())
            .unwrap_or_else(|| paths.models.clone());
        Self {
            model,
            load: LoadOptions {
                cache_dir: Some(cache_dir),
                max_length: overrides.max_length.or(config.max_length),
                batch_size: overrides.batch_size.or(config.batch_size),
                threads: config.threads,
            },
        }
    }
}
