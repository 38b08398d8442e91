use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {message}")]
    Invalid { message: String },
}

/// Runtime settings for organising and face clustering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Lowercase file extensions treated as photos
    pub extensions: Vec<String>,
    /// Path keywords that put a photo into an event subfolder
    pub event_keywords: Vec<String>,
    /// Place names recorded in the manifest when found in a path
    pub locations: Vec<String>,
    /// DBSCAN neighbourhood radius over face embeddings
    pub cluster_tolerance: f32,
    pub min_samples: usize,
    /// Maximum embedding distance for thumbnail re-identification
    pub match_threshold: f32,
    /// Bounding box (pixels) of a face thumbnail
    pub thumbnail_size: u32,
    /// External face embedder, as program followed by its arguments
    pub embedder: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "heic", "webp", "tiff", "bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            event_keywords: [
                "wedding",
                "holiday",
                "birthday",
                "party",
                "graduation",
                "honeymoon",
                "trip",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            locations: [
                "paris", "london", "tokyo", "new york", "cork", "dublin", "rome", "berlin",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            cluster_tolerance: 0.5,
            min_samples: 1,
            match_threshold: 0.6,
            thumbnail_size: 200,
            embedder: None,
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/sortrs/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sortrs").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `explicit` if given, else the default file when it exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if self.extensions.is_empty() {
            return invalid("extensions must not be empty");
        }
        if !(self.cluster_tolerance > 0.0) {
            return invalid("cluster_tolerance must be positive");
        }
        if self.min_samples == 0 {
            return invalid("min_samples must be at least 1");
        }
        if !(self.match_threshold > 0.0) {
            return invalid("match_threshold must be positive");
        }
        if self.thumbnail_size == 0 {
            return invalid("thumbnail_size must be non-zero");
        }
        if matches!(&self.embedder, Some(cmd) if cmd.is_empty()) {
            return invalid("embedder command must name a program");
        }
        Ok(())
    }

    pub fn is_photo(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}
