//! Search functionality
//!
//! The engine keeps the whole catalog and vector buffer in memory and
//! scores queries by exact cosine similarity. Results can be boosted by
//! lexical overlap, file recency and file name matches, and are cached per
//! query in a bounded FIFO cache. The in-memory copy is only refreshed by
//! [`SearchEngine::reload`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;

use crate::embed::fit_dimension;
use crate::extract::extension_of;
use crate::state::now_millis;
use crate::{
    Chunk, ChunkType, Config, DEFAULT_LIMIT, DEFAULT_THRESHOLD, Embedder, IndexCatalog, Result,
    SIMILAR_THRESHOLD, VectorStore, discover,
};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;
const WEEK_MS: u64 = 7 * DAY_MS;

/// Structural filters applied before similarity scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SearchFilters {
    /// Regex (or plain substring) matched against the vault-relative path
    pub file_path: Option<String>,
    /// File extension, with or without the leading dot
    pub file_type: Option<String>,
    pub chunk_type: Option<ChunkType>,
}

/// Options for [`SearchEngine::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub threshold: f32,
    pub limit: usize,
    pub filters: SearchFilters,
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            limit: DEFAULT_LIMIT,
            filters: SearchFilters::default(),
            rerank: true,
        }
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Raw cosine similarity
    pub similarity: f32,
    /// Similarity after rerank boosts (equal to `similarity` without rerank)
    pub score: f32,
}

/// Summary of what the engine has in memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    pub total_chunks: usize,
    pub total_files: usize,
    pub chunk_types: BTreeMap<ChunkType, usize>,
    pub cache_size: usize,
    pub loaded: bool,
}

/// Cosine similarity of two vectors.
///
/// Returns `0.0` when the lengths differ or either vector has zero
/// magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    threshold: u32,
    limit: usize,
    rerank: bool,
    filters: SearchFilters,
}

impl CacheKey {
    fn new(query: &str, options: &SearchOptions) -> Self {
        Self {
            query: query.to_string(),
            threshold: options.threshold.to_bits(),
            limit: options.limit,
            rerank: options.rerank,
            filters: options.filters.clone(),
        }
    }
}

/// Bounded result cache evicted in insertion order (FIFO). A hit does not
/// refresh an entry's position.
///
/// Every clear starts a new generation. Results computed against an
/// earlier generation are not stored.
struct QueryCache {
    capacity: usize,
    generation: u64,
    entries: HashMap<CacheKey, Arc<Vec<ScoredChunk>>>,
    order: VecDeque<CacheKey>,
}

impl QueryCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            generation: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<Vec<ScoredChunk>>> {
        self.entries.get(key).cloned()
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn insert(&mut self, generation: u64, key: CacheKey, results: Arc<Vec<ScoredChunk>>) {
        if generation != self.generation {
            return;
        }
        if self.entries.insert(key.clone(), results).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.entries.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Filters compiled once per query.
struct CompiledFilters<'a> {
    path_pattern: Option<(Regex, &'a str)>,
    extension: Option<String>,
    chunk_type: Option<ChunkType>,
}

impl<'a> CompiledFilters<'a> {
    fn compile(filters: &'a SearchFilters) -> Result<Self> {
        let path_pattern = match filters.file_path.as_deref() {
            Some(pattern) => Some((Regex::new(pattern)?, pattern)),
            None => None,
        };
        Ok(Self {
            path_pattern,
            extension: filters
                .file_type
                .as_deref()
                .map(|t| t.trim_start_matches('.').to_lowercase()),
            chunk_type: filters.chunk_type,
        })
    }

    fn matches(&self, chunk: &Chunk) -> bool {
        if let Some((re, raw)) = &self.path_pattern {
            if !(re.is_match(&chunk.file_path) || chunk.file_path.contains(raw)) {
                return false;
            }
        }
        if let Some(ext) = &self.extension {
            if extension_of(Path::new(&chunk.file_path)) != *ext {
                return false;
            }
        }
        if let Some(chunk_type) = self.chunk_type {
            if chunk.chunk_type != chunk_type {
                return false;
            }
        }
        true
    }
}

/// Distinct lowercase query words of at least three characters.
fn query_words(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Multiplicative boost for a hit: lexical overlap, recency, file name.
fn rerank_boost(chunk: &Chunk, words: &[String], now: u64) -> f32 {
    let mut boost = 1.0;

    let text = chunk.text.to_lowercase();
    let overlap = words.iter().filter(|w| text.contains(w.as_str())).count();
    boost += 0.1 * overlap as f32;

    let age = now.saturating_sub(chunk.metadata.mtime);
    if age < WEEK_MS {
        boost += 0.05;
        if age < DAY_MS {
            boost += 0.1;
        }
    }

    let name = chunk.metadata.file_name.to_lowercase();
    if words.iter().any(|w| name.contains(w.as_str())) {
        boost += 0.15;
    }

    boost
}

fn sort_by_score(results: &mut [ScoredChunk]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[derive(Debug, Default)]
struct LoadedIndex {
    chunks: Vec<Chunk>,
    vectors: VectorStore,
    loaded: bool,
}

/// Searcher for querying the index.
pub struct SearchEngine {
    catalog: IndexCatalog,
    vectors_path: PathBuf,
    dimension: usize,
    embedder: Arc<dyn Embedder>,
    index: RwLock<Arc<LoadedIndex>>,
    cache: Mutex<QueryCache>,
}

impl SearchEngine {
    /// Create an engine for the vault at `root`. Nothing is read until
    /// [`load_index`](Self::load_index).
    pub fn new(root: &Path, config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            catalog: IndexCatalog::new(discover::catalog_path(root)),
            vectors_path: discover::vectors_path(root),
            dimension: config.dimension,
            embedder,
            index: RwLock::new(Arc::new(LoadedIndex::default())),
            cache: Mutex::new(QueryCache::new(config.cache_capacity)),
        }
    }

    /// Create and load an engine for the vault at `root`.
    pub async fn open(root: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let config = Config::load(root)?;
        let engine = Self::new(root, &config, embedder);
        engine.load_index().await?;
        Ok(engine)
    }

    /// Read catalog and vectors into memory. Missing files load as an
    /// empty index.
    pub async fn load_index(&self) -> Result<()> {
        let chunks = self.catalog.load().await?;
        let vectors = VectorStore::load(&self.vectors_path).await?;
        if !vectors.matches_catalog(&chunks) {
            tracing::warn!(
                chunks = chunks.len(),
                bytes = vectors.len(),
                "vector store does not match catalog"
            );
        }
        tracing::debug!("loaded {} chunks", chunks.len());

        *self.index.write() = Arc::new(LoadedIndex {
            chunks,
            vectors,
            loaded: true,
        });
        Ok(())
    }

    /// Reload from disk and drop cached results.
    pub async fn reload(&self) -> Result<()> {
        self.load_index().await?;
        self.clear_cache();
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_loaded(&self) -> bool {
        self.index.read().loaded
    }

    fn snapshot(&self) -> Arc<LoadedIndex> {
        self.index.read().clone()
    }

    /// Search for chunks matching the query.
    ///
    /// Never fails: a missing index, an embedding failure or a malformed
    /// filter yields an empty list.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Arc<Vec<ScoredChunk>> {
        match self.try_search(query, options).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("search for {:?} failed: {}", query, e);
                Arc::new(Vec::new())
            }
        }
    }

    /// Like [`search`](Self::search), but surfaces errors.
    pub async fn try_search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Arc<Vec<ScoredChunk>>> {
        // Read before the snapshot so a reload in between discards the result.
        let generation = self.cache.lock().generation();
        let index = self.snapshot();
        if !index.loaded || index.chunks.is_empty() {
            return Ok(Arc::new(Vec::new()));
        }

        let key = CacheKey::new(query, options);
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(hit);
        }

        let filters = CompiledFilters::compile(&options.filters)?;
        let query_vector = fit_dimension(self.embedder.embed(query).await?, self.dimension);

        let mut results: Vec<ScoredChunk> = index
            .chunks
            .iter()
            .filter(|chunk| filters.matches(chunk))
            .filter_map(|chunk| {
                let vector = index.vectors.vector_of(chunk)?;
                let similarity = cosine_similarity(&query_vector, &vector);
                (similarity >= options.threshold).then(|| ScoredChunk {
                    chunk: chunk.clone(),
                    similarity,
                    score: similarity,
                })
            })
            .collect();
        sort_by_score(&mut results);

        if options.rerank {
            let words = query_words(query);
            let now = now_millis();
            for result in &mut results {
                result.score = result.similarity * rerank_boost(&result.chunk, &words, now);
            }
            sort_by_score(&mut results);
        }
        results.truncate(options.limit);

        let results = Arc::new(results);
        self.cache.lock().insert(generation, key, results.clone());
        Ok(results)
    }

    /// Chunks most similar to the chunk `chunk_id`, excluding itself.
    pub fn find_similar(&self, chunk_id: &str, limit: usize) -> Vec<ScoredChunk> {
        let index = self.snapshot();
        let Some(target) = index.chunks.iter().find(|c| c.id == chunk_id) else {
            return Vec::new();
        };
        let Some(target_vector) = index.vectors.vector_of(target) else {
            return Vec::new();
        };

        let mut results: Vec<ScoredChunk> = index
            .chunks
            .iter()
            .filter(|c| c.id != chunk_id)
            .filter_map(|chunk| {
                let vector = index.vectors.vector_of(chunk)?;
                let similarity = cosine_similarity(&target_vector, &vector);
                (similarity >= SIMILAR_THRESHOLD).then(|| ScoredChunk {
                    chunk: chunk.clone(),
                    similarity,
                    score: similarity,
                })
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(limit);
        results
    }

    /// Look up a chunk by id.
    pub fn chunk(&self, chunk_id: &str) -> Option<Chunk> {
        self.snapshot()
            .chunks
            .iter()
            .find(|c| c.id == chunk_id)
            .cloned()
    }

    pub fn stats(&self) -> SearchStats {
        let index = self.snapshot();
        let mut chunk_types = BTreeMap::new();
        for chunk in &index.chunks {
            *chunk_types.entry(chunk.chunk_type).or_insert(0) += 1;
        }
        let files: HashSet<&str> = index.chunks.iter().map(|c| c.file_path.as_str()).collect();

        SearchStats {
            total_chunks: index.chunks.len(),
            total_files: files.len(),
            chunk_types,
            cache_size: self.cache_len(),
            loaded: index.loaded,
        }
    }
}
