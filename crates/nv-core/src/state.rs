//! Persisted index state: per-file bookkeeping and run statistics
//! stored in .notevault/vault_state.json

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{INDEX_VERSION, Result};

/// What the index knows about one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    /// Modification time at the last index attempt (ms since epoch)
    pub mtime: u64,
    /// Content checksum, `None` when the file could not be read
    pub checksum: Option<String>,
    pub indexed: bool,
    pub chunk_count: usize,
    /// When the file was last indexed (ms since epoch)
    pub last_indexed: u64,
}

/// Aggregate statistics of the last indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_files: usize,
    pub indexed_files: usize,
    pub total_chunks: usize,
    pub errors: usize,
    #[serde(default)]
    pub pruned: usize,
    pub last_index_time: Option<u64>,
}

/// The single persisted state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexState {
    pub version: String,
    /// Vault-relative path -> file state
    #[serde(default)]
    pub files: BTreeMap<String, SourceFile>,
    #[serde(default)]
    pub stats: IndexStats,
    #[serde(default)]
    pub last_index_time: Option<u64>,
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            files: BTreeMap::new(),
            stats: IndexStats::default(),
            last_index_time: None,
        }
    }
}

impl IndexState {
    /// Load from disk, defaulting when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => Ok(Self::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save to disk.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Whether this state was written by the current format version.
    pub fn is_compatible(&self) -> bool {
        self.version == INDEX_VERSION
    }

    /// Number of files currently marked indexed.
    pub fn indexed_count(&self) -> usize {
        self.files.values().filter(|f| f.indexed).count()
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
