//! Chunk catalog stored as JSON lines in .notevault/vault_index.jsonl
//!
//! Line order defines vector order in the vector store, so the catalog is
//! always rewritten in full together with `embeddings.bin`.

use std::path::{Path, PathBuf};

use crate::{Chunk, Result};

/// Line-oriented chunk metadata store.
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    path: PathBuf,
}

impl IndexCatalog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file is an empty catalog; malformed
    /// lines are skipped with a warning.
    pub async fn load(&self) -> Result<Vec<Chunk>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse(&content))
    }

    /// Overwrite the catalog with `chunks`, one JSON object per line.
    pub async fn save(&self, chunks: &[Chunk]) -> Result<()> {
        let content = serialize(chunks)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Number of non-empty lines, without parsing them.
    pub async fn line_count(&self) -> Result<usize> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(content.lines().filter(|l| !l.trim().is_empty()).count())
    }
}

/// Drop every record of `file_path`, keeping the others in order.
pub fn filter_out_file(chunks: Vec<Chunk>, file_path: &str) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|c| c.file_path != file_path)
        .collect()
}

fn parse(content: &str) -> Vec<Chunk> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str::<Chunk>(line) {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                tracing::warn!("skipping malformed catalog line {}: {}", n + 1, e);
                None
            }
        })
        .collect()
}

fn serialize(chunks: &[Chunk]) -> Result<String> {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(&serde_json::to_string(chunk)?);
        out.push('\n');
    }
    Ok(out)
}
