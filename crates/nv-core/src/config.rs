//! Configuration handling for .notevault/config.json

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_BATCH_SIZE, DEFAULT_CACHE_CAPACITY, DEFAULT_DIM, DEFAULT_MAX_FILE_SIZE,
    DEFAULT_MIN_CHUNK_CHARS, DEFAULT_MODEL, DEFAULT_WINDOW_SIZE, NvError, Result, discover,
};

/// Configuration stored in .notevault/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Embedding model name (fastembed model ID)
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_dim")]
    pub dimension: usize,

    /// Files processed concurrently per indexing batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Fixed window size in characters for unstructured content
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Minimum trimmed chunk length in characters
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,

    /// Maximum number of cached query results
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Maximum file size to index (bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// File extensions to include (empty = built-in allowlist)
    #[serde(default)]
    pub include_extensions: Vec<String>,

    /// File extensions to exclude
    #[serde(default)]
    pub exclude_extensions: Vec<String>,

    /// Directory names to skip, on top of hidden entries, node_modules and .git
    #[serde(default)]
    pub ignore_dirs: Vec<String>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_dim() -> usize {
    DEFAULT_DIM
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_min_chunk_chars() -> usize {
    DEFAULT_MIN_CHUNK_CHARS
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            dimension: default_dim(),
            batch_size: default_batch_size(),
            window_size: default_window_size(),
            min_chunk_chars: default_min_chunk_chars(),
            cache_capacity: default_cache_capacity(),
            max_file_size: default_max_file_size(),
            include_extensions: Vec::new(),
            exclude_extensions: Vec::new(),
            ignore_dirs: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from the .notevault directory.
    pub fn load(root: &Path) -> Result<Self> {
        let path = discover::config_path(root);
        let config: Self = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save config to the .notevault directory.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = discover::config_path(root);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the indexer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(NvError::Config("dimension must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(NvError::Config("batch_size must be positive".into()));
        }
        if self.window_size == 0 {
            return Err(NvError::Config("window_size must be positive".into()));
        }
        Ok(())
    }
}
