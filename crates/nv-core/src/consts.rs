/// The name of the index folder inside a vault
pub const INDEX_DIR: &str = ".notevault";

/// Catalog file: one JSON chunk record per line
pub const CATALOG_FILE: &str = "vault_index.jsonl";

/// Vector store file: concatenated little-endian f32 vectors
pub const VECTORS_FILE: &str = "embeddings.bin";

/// Per-file index state
pub const STATE_FILE: &str = "vault_state.json";

/// Persisted format version; a mismatch forces a full rebuild
pub const INDEX_VERSION: &str = "1.0.0";

/// Default embedding model (fastembed model ID)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension for all-MiniLM-L6-v2
pub const DEFAULT_DIM: usize = 384;

/// Files embedded concurrently per indexing batch
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Fixed window size in characters for unstructured content
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

/// Chunks shorter than this (after trimming) are dropped
pub const DEFAULT_MIN_CHUNK_CHARS: usize = 50;

/// Maximum number of cached query results
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Default max file size (1MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Allowed drift in bytes between expected and actual vector file size
pub const VALIDATION_TOLERANCE_BYTES: u64 = 1000;

/// Default minimum cosine similarity for search results
pub const DEFAULT_THRESHOLD: f32 = 0.3;

/// Default number of search results
pub const DEFAULT_LIMIT: usize = 20;

/// Similarity floor for find-similar
pub const SIMILAR_THRESHOLD: f32 = 0.3;

/// Default number of find-similar results
pub const DEFAULT_SIMILAR_LIMIT: usize = 10;
