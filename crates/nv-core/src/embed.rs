//! Embedding generation
//!
//! The indexer and the search engine only see the [`Embedder`] capability.
//! [`FastEmbedder`] is the fastembed-backed implementation used by the CLI.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::{Config, NvError, Result};

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of the vectors this embedder is expected to return.
    fn dimension(&self) -> usize;

    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Wrapper around fastembed for generating embeddings.
pub struct FastEmbedder {
    model: TextEmbedding,
    dimension: usize,
}

impl FastEmbedder {
    /// Create a new embedder with the model specified in config.
    pub fn new(config: &Config) -> Result<Self> {
        let model_type = match config.model.as_str() {
            "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            "all-MiniLM-L12-v2" => EmbeddingModel::AllMiniLML12V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "paraphrase-MiniLM-L12-v2" => EmbeddingModel::ParaphraseMLMiniLML12V2,
            other => {
                return Err(NvError::Embedding(format!(
                    "Unknown model: {}. Supported: all-MiniLM-L6-v2, all-MiniLM-L12-v2, bge-small-en-v1.5, paraphrase-MiniLM-L12-v2",
                    other
                )));
            }
        };

        let model =
            TextEmbedding::try_new(InitOptions::new(model_type).with_show_download_progress(true))
                .map_err(|e| NvError::Embedding(e.to_string()))?;

        Ok(Self {
            model,
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self
            .model
            .embed(vec![text], None)
            .map_err(|e| NvError::Embedding(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| NvError::Embedding("No embedding generated".to_string()))
    }
}

/// Force a vector to exactly `dimension` values, truncating or zero-padding.
pub fn fit_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() != dimension {
        tracing::warn!(
            expected = dimension,
            actual = vector.len(),
            "embedding dimension mismatch, adjusting"
        );
        vector.resize(dimension, 0.0);
    }
    vector
}
