//! nv-core: Semantic indexing and retrieval for note vaults
//!
//! This library turns a directory of notes and source files into a
//! persistent, incrementally maintained collection of chunks with
//! fixed-dimension embeddings, and answers similarity-ranked queries
//! against it.

pub mod catalog;
pub mod change;
pub mod chunk;
pub mod config;
pub mod consts;
pub mod discover;
pub mod embed;
pub mod extract;
pub mod index;
pub mod search;
pub mod state;
pub mod store;

pub use catalog::IndexCatalog;
pub use chunk::{Chunk, ChunkMetadata, ChunkType, Span};
pub use config::Config;
pub use consts::*;
pub use discover::find_vault_root;
pub use embed::{Embedder, FastEmbedder};
pub use index::{
    FileOutcome, IndexManager, IndexOptions, IndexProgress, IndexValidation, SkipReason,
};
pub use search::{
    ScoredChunk, SearchEngine, SearchFilters, SearchOptions, SearchStats, cosine_similarity,
};
pub use state::{IndexState, IndexStats, SourceFile};
pub use store::VectorStore;

#[derive(Debug, thiserror::Error)]
pub enum NvError {
    #[error("Not in a vault (no .notevault folder found)")]
    NotInVault,

    #[error("Already initialized: {0}")]
    AlreadyInitialized(std::path::PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("An indexing run is already in progress")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, NvError>;
