//! Indexing logic: scan the vault, detect changes, chunk, embed, persist
//!
//! [`IndexManager`] is the only writer of the catalog, the vector store and
//! the state file. Every mutation of those three goes through one async
//! mutex, so concurrent single-file updates cannot interleave their
//! full-catalog rewrites. Whole-vault runs are additionally guarded by a
//! busy flag and rejected with [`NvError::Busy`] while one is active.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use ignore::WalkBuilder;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::catalog::filter_out_file;
use crate::change::{checksum, mtime_millis, should_reindex};
use crate::chunk::ContentChunker;
use crate::embed::fit_dimension;
use crate::state::now_millis;
use crate::{
    Chunk, ChunkMetadata, Config, Embedder, IndexCatalog, IndexState, IndexStats, NvError, Result,
    SourceFile, VectorStore, discover, extract,
};

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

/// Progress emitted after each batch of a vault run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexProgress {
    /// Files processed so far
    pub processed: usize,
    /// Files in this run
    pub total: usize,
    /// Chunks written so far in this run
    pub chunks: usize,
    /// Whole-number completion percentage
    pub percent: u8,
}

/// Options for a vault run.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Re-index files even when unchanged
    pub force: bool,
    /// Receives one event per batch; dropping the receiver stops the events
    pub progress: Option<mpsc::UnboundedSender<IndexProgress>>,
}

/// Why a file was not (re-)indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unchanged,
    Empty,
    NoChunks,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Empty => "empty",
            Self::NoChunks => "no_chunks",
        }
    }
}

/// Result of indexing a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed { chunk_count: usize },
    Skipped(SkipReason),
}

impl FileOutcome {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed { .. })
    }
}

/// Verdict of [`IndexManager::validate_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl IndexValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    /// Turn an invalid verdict into [`NvError::Validation`].
    pub fn into_result(self) -> Result<()> {
        match self.reason {
            Some(reason) if !self.valid => Err(NvError::Validation(reason)),
            _ => Ok(()),
        }
    }
}

/// Clears the busy flag when a vault run ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| NvError::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The index manager orchestrates file discovery, embedding, and storage.
pub struct IndexManager {
    root: PathBuf,
    config: Config,
    embedder: Arc<dyn Embedder>,
    chunker: ContentChunker,
    catalog: IndexCatalog,
    vectors_path: PathBuf,
    state_path: PathBuf,
    /// Writer lock for catalog, vectors and state
    state: Mutex<IndexState>,
    running: AtomicBool,
}

impl IndexManager {
    /// Open the index of the vault at `root`, loading its config.
    pub async fn open(root: PathBuf, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let config = Config::load(&root)?;
        Self::with_config(root, config, embedder).await
    }

    /// Open the index of the vault at `root` with an explicit config.
    pub async fn with_config(
        root: PathBuf,
        config: Config,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.dimension {
            warn!(
                model = embedder.dimension(),
                configured = config.dimension,
                "embedder dimension differs from config, vectors will be fitted"
            );
        }
        tokio::fs::create_dir_all(discover::index_dir(&root)).await?;

        let state_path = discover::state_path(&root);
        let state = match IndexState::load(&state_path).await {
            Ok(state) => state,
            Err(e) => {
                warn!("unreadable index state, starting fresh: {}", e);
                IndexState {
                    version: String::new(),
                    ..IndexState::default()
                }
            }
        };

        Ok(Self {
            catalog: IndexCatalog::new(discover::catalog_path(&root)),
            vectors_path: discover::vectors_path(&root),
            state_path,
            chunker: ContentChunker::from_config(&config),
            state: Mutex::new(state),
            running: AtomicBool::new(false),
            root,
            config,
            embedder,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a vault run is in progress.
    pub fn is_indexing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Statistics persisted by the last vault run.
    pub async fn stats(&self) -> IndexStats {
        self.state.lock().await.stats.clone()
    }

    /// Snapshot of the persisted state.
    pub async fn state(&self) -> IndexState {
        self.state.lock().await.clone()
    }

    /// Check that the persisted files exist, carry the current version, and
    /// that the vector file size agrees with the catalog length. Only
    /// reports; remediation is up to the caller.
    pub async fn validate_index(&self) -> IndexValidation {
        for path in [self.catalog.path(), &self.vectors_path, &self.state_path] {
            if !path.exists() {
                return IndexValidation::invalid(format!("missing {}", path.display()));
            }
        }

        let state = match IndexState::load(&self.state_path).await {
            Ok(state) => state,
            Err(e) => return IndexValidation::invalid(format!("unreadable state: {e}")),
        };
        if !state.is_compatible() {
            return IndexValidation::invalid(format!(
                "version mismatch: found {:?}, expected {:?}",
                state.version,
                crate::INDEX_VERSION
            ));
        }

        let lines = match self.catalog.line_count().await {
            Ok(lines) => lines,
            Err(e) => return IndexValidation::invalid(format!("unreadable catalog: {e}")),
        };
        let actual = match tokio::fs::metadata(&self.vectors_path).await {
            Ok(meta) => meta.len(),
            Err(e) => return IndexValidation::invalid(format!("unreadable vectors: {e}")),
        };
        let expected = (lines * self.config.dimension * 4) as u64;
        if expected.abs_diff(actual) > crate::VALIDATION_TOLERANCE_BYTES {
            return IndexValidation::invalid(format!(
                "vector file is {actual} bytes, expected {expected} for {lines} chunks"
            ));
        }

        IndexValidation::ok()
    }

    /// Index one file, replacing all of its previous chunks.
    ///
    /// Failures are counted in the persisted error statistics and returned.
    pub async fn index_file(&self, path: &Path, force: bool) -> Result<FileOutcome> {
        match self.index_one(path, force).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let mut state = self.state.lock().await;
                state.stats.errors += 1;
                if let Err(save_err) = state.save(&self.state_path).await {
                    warn!("failed to record index error: {}", save_err);
                }
                Err(e)
            }
        }
    }

    /// Remove a file's chunks and state entry.
    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        let key = discover::relative_key(&self.root, &self.resolve(path));
        let mut state = self.state.lock().await;
        let chunks = self.catalog.load().await?;
        let store = VectorStore::load(&self.vectors_path).await?;
        let (chunks, store) = store.rebuild_with(filter_out_file(chunks, &key), Vec::new());
        self.persist(&mut state, &chunks, &store, |state| {
            state.files.remove(&key);
        })
        .await
    }

    /// Index every supported file in the vault.
    ///
    /// Returns [`NvError::Busy`] if another vault run is active. An index
    /// written by a different format version is rebuilt from scratch.
    pub async fn index_vault(&self, options: IndexOptions) -> Result<IndexStats> {
        let _guard = BusyGuard::acquire(&self.running)?;

        let compatible = self.state.lock().await.is_compatible();
        if !compatible {
            info!("index format changed, rebuilding");
            self.reset().await?;
            return self.run_vault(true, options.progress).await;
        }

        self.run_vault(options.force, options.progress).await
    }

    /// Back up the catalog and vectors, clear everything, and re-index the
    /// whole vault.
    pub async fn rebuild_index(
        &self,
        progress: Option<mpsc::UnboundedSender<IndexProgress>>,
    ) -> Result<IndexStats> {
        let _guard = BusyGuard::acquire(&self.running)?;

        for path in [self.catalog.path(), self.vectors_path.as_path()] {
            if !path.exists() {
                continue;
            }
            let backup = discover::backup_path(path);
            if let Err(e) = tokio::fs::copy(path, &backup).await {
                warn!("failed to back up {}: {}", path.display(), e);
            }
        }

        self.reset().await?;
        self.run_vault(true, progress).await
    }

    /// Drop chunks and state entries of files not in `live`.
    ///
    /// Returns how many files were removed.
    pub async fn prune_deleted(&self, live: &HashSet<String>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let chunks = self.catalog.load().await?;

        let mut stale: HashSet<String> = state
            .files
            .keys()
            .filter(|key| !live.contains(*key))
            .cloned()
            .collect();
        stale.extend(
            chunks
                .iter()
                .filter(|c| !live.contains(&c.file_path))
                .map(|c| c.file_path.clone()),
        );
        if stale.is_empty() {
            return Ok(0);
        }

        let survivors: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !stale.contains(&c.file_path))
            .collect();
        let store = VectorStore::load(&self.vectors_path).await?;
        let (chunks, store) = store.rebuild_with(survivors, Vec::new());
        self.persist(&mut state, &chunks, &store, |state| {
            state.files.retain(|key, _| !stale.contains(key));
        })
        .await?;

        info!("pruned {} deleted files", stale.len());
        Ok(stale.len())
    }

    async fn run_vault(
        &self,
        force: bool,
        mut progress: Option<mpsc::UnboundedSender<IndexProgress>>,
    ) -> Result<IndexStats> {
        let files = self.scan().await?;
        let total = files.len();
        info!(root = %self.root.display(), files = total, force, "indexing vault");

        let mut stats = IndexStats {
            total_files: total,
            ..IndexStats::default()
        };
        let mut processed = 0;
        let mut chunks_written = 0;

        for batch in files.chunks(self.config.batch_size) {
            let results = join_all(batch.iter().map(|path| self.index_one(path, force))).await;

            for (path, result) in batch.iter().zip(results) {
                processed += 1;
                match result {
                    Ok(FileOutcome::Indexed { chunk_count }) => {
                        stats.indexed_files += 1;
                        chunks_written += chunk_count;
                    }
                    Ok(FileOutcome::Skipped(reason)) => {
                        debug!("skipped {}: {}", path.display(), reason.as_str());
                    }
                    Err(e) => {
                        warn!("Failed to index {}: {}", path.display(), e);
                        stats.errors += 1;
                    }
                }
            }

            if let Some(tx) = &progress {
                let event = IndexProgress {
                    processed,
                    total,
                    chunks: chunks_written,
                    percent: (processed * 100 / total.max(1)) as u8,
                };
                if tx.send(event).is_err() {
                    debug!("progress receiver dropped");
                    progress = None;
                }
            }
        }

        let live: HashSet<String> = files
            .iter()
            .map(|p| discover::relative_key(&self.root, p))
            .collect();
        stats.pruned = self.prune_deleted(&live).await?;

        let mut state = self.state.lock().await;
        let now = now_millis();
        stats.total_chunks = state.files.values().map(|f| f.chunk_count).sum();
        stats.last_index_time = Some(now);
        state.stats = stats.clone();
        state.last_index_time = Some(now);
        state.save(&self.state_path).await?;

        info!(
            indexed = stats.indexed_files,
            errors = stats.errors,
            chunks = stats.total_chunks,
            "indexing complete"
        );
        Ok(stats)
    }

    /// Index one file without recording failures.
    async fn index_one(&self, path: &Path, force: bool) -> Result<FileOutcome> {
        let path = self.resolve(path);
        let key = discover::relative_key(&self.root, &path);

        let metadata = tokio::fs::metadata(&path).await?;
        let mtime = mtime_millis(&metadata);
        let bytes = tokio::fs::read(&path).await;
        let sum = bytes.as_ref().ok().map(|b| checksum(b));

        let persisted = self.state.lock().await.files.get(&key).cloned();
        if !should_reindex(persisted.as_ref(), mtime, sum.as_deref(), force) {
            return Ok(FileOutcome::Skipped(SkipReason::Unchanged));
        }

        let content = String::from_utf8(bytes?)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if content.trim().is_empty() {
            self.replace_file(&key, mtime, sum, Vec::new()).await?;
            return Ok(FileOutcome::Skipped(SkipReason::Empty));
        }

        let file_meta = ChunkMetadata {
            mtime,
            size: metadata.len(),
            checksum: sum.clone(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            heading: None,
        };
        let chunks = self.chunker.chunk(&key, &content, &file_meta);
        if chunks.is_empty() {
            self.replace_file(&key, mtime, sum, Vec::new()).await?;
            return Ok(FileOutcome::Skipped(SkipReason::NoChunks));
        }

        // Every chunk must embed before anything is written.
        let mut fresh = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = self.embedder.embed(&chunk.text).await?;
            fresh.push((chunk, fit_dimension(vector, self.config.dimension)));
        }
        let chunk_count = fresh.len();
        self.replace_file(&key, mtime, sum, fresh).await?;

        debug!("indexed {} ({} chunks)", key, chunk_count);
        Ok(FileOutcome::Indexed { chunk_count })
    }

    /// Swap a file's chunks for `fresh` and record it as indexed.
    ///
    /// An empty `fresh` clears the file from the index while keeping its
    /// state entry, so an unchanged empty file is skipped next time.
    async fn replace_file(
        &self,
        key: &str,
        mtime: u64,
        checksum: Option<String>,
        fresh: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<()> {
        let chunk_count = fresh.len();
        let mut state = self.state.lock().await;
        let existing = self.catalog.load().await?;
        let store = VectorStore::load(&self.vectors_path).await?;
        let (chunks, store) = store.rebuild_with(filter_out_file(existing, key), fresh);
        self.persist(&mut state, &chunks, &store, |state| {
            state.files.insert(
                key.to_string(),
                SourceFile {
                    mtime,
                    checksum,
                    indexed: true,
                    chunk_count,
                    last_indexed: now_millis(),
                },
            );
        })
        .await
    }

    /// Write catalog, vectors and state together. Callers hold the lock.
    async fn persist(
        &self,
        state: &mut IndexState,
        chunks: &[Chunk],
        store: &VectorStore,
        update: impl FnOnce(&mut IndexState),
    ) -> Result<()> {
        self.catalog.save(chunks).await?;
        store.save(&self.vectors_path).await?;
        update(state);
        state.save(&self.state_path).await
    }

    /// Truncate catalog and vectors and reset state to defaults.
    async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = IndexState::default();
        self.persist(&mut state, &[], &VectorStore::new(), |_| {}).await
    }

    /// Supported files under the vault root, sorted.
    async fn scan(&self) -> Result<Vec<PathBuf>> {
        let root = self.root.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let ignore_dirs = config.ignore_dirs.clone();
            let walker = WalkBuilder::new(&root)
                .standard_filters(false)
                .hidden(true) // Skip hidden files and folders, .notevault included
                .filter_entry(move |entry| {
                    let name = entry.file_name().to_string_lossy();
                    !(SKIPPED_DIRS.contains(&name.as_ref())
                        || ignore_dirs.iter().any(|d| d == name.as_ref()))
                })
                .build();

            let mut files = Vec::new();
            for entry in walker.flatten() {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                let path = entry.path();
                if !extract::should_index(path, &config) {
                    continue;
                }
                match entry.metadata() {
                    Ok(meta) if meta.len() > config.max_file_size => {
                        debug!("skipping large file {}", path.display());
                    }
                    _ => files.push(path.to_path_buf()),
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|e| NvError::Index(e.to_string()))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    const DIM: usize = 8;

    /// Deterministic embedder: letter histogram, fails on "EXPLODE".
    struct LetterEmbedder {
        calls: AtomicUsize,
        output_dim: usize,
    }

    impl LetterEmbedder {
        fn new() -> Self {
            Self::with_output(DIM)
        }

        fn with_output(output_dim: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                output_dim,
            }
        }
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        fn dimension(&self) -> usize {
            self.output_dim
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("EXPLODE") {
                return Err(NvError::Embedding("model failure".into()));
            }
            let mut v = vec![0.0; self.output_dim];
            for b in text.bytes().filter(|b| b.is_ascii_alphabetic()) {
                v[(b.to_ascii_lowercase() - b'a') as usize % self.output_dim] += 1.0;
            }
            Ok(v)
        }
    }

    fn para(word: &str) -> String {
        format!("{word} is a paragraph long enough to pass the fifty character floor.")
    }

    async fn manager(root: &Path, embedder: Arc<LetterEmbedder>) -> IndexManager {
        let config = Config {
            dimension: DIM,
            ..Config::default()
        };
        IndexManager::with_config(root.to_path_buf(), config, embedder)
            .await
            .unwrap()
    }

    fn vector_len(root: &Path) -> u64 {
        std::fs::metadata(discover::vectors_path(root)).unwrap().len()
    }

    #[tokio::test]
    async fn test_unchanged_file_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), para("alpha")).unwrap();
        let embedder = Arc::new(LetterEmbedder::new());
        let manager = manager(temp.path(), embedder.clone()).await;

        let first = manager.index_file(Path::new("a.md"), false).await.unwrap();
        assert_eq!(first, FileOutcome::Indexed { chunk_count: 1 });
        let len = vector_len(temp.path());
        assert_eq!(len, (DIM * 4) as u64);

        let second = manager.index_file(Path::new("a.md"), false).await.unwrap();
        assert_eq!(second, FileOutcome::Skipped(SkipReason::Unchanged));
        assert_eq!(vector_len(temp.path()), len);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let forced = manager.index_file(Path::new("a.md"), true).await.unwrap();
        assert!(forced.is_indexed());
    }

    #[tokio::test]
    async fn test_reindex_replaces_file_chunks() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a.md");
        std::fs::write(&a, format!("{}\n\n{}", para("one"), para("two"))).unwrap();
        std::fs::write(temp.path().join("b.md"), para("bee")).unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;

        manager.index_file(&a, false).await.unwrap();
        manager.index_file(Path::new("b.md"), false).await.unwrap();

        std::fs::write(&a, para("three")).unwrap();
        manager.index_file(&a, true).await.unwrap();

        let chunks = manager.catalog.load().await.unwrap();
        let a_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.file_path == "a.md").collect();
        assert_eq!(a_chunks.len(), 1);
        assert!(a_chunks[0].text.starts_with("three"));
        assert_eq!(chunks.len(), 2);
        assert_eq!(vector_len(temp.path()), (2 * DIM * 4) as u64);

        let store = VectorStore::load(&manager.vectors_path).await.unwrap();
        assert!(store.matches_catalog(&chunks));
    }

    #[tokio::test]
    async fn test_empty_and_tiny_files() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("empty.md"), "  \n\n ").unwrap();
        std::fs::write(temp.path().join("tiny.md"), "too short").unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;

        let empty = manager.index_file(Path::new("empty.md"), false).await.unwrap();
        assert_eq!(empty, FileOutcome::Skipped(SkipReason::Empty));
        let tiny = manager.index_file(Path::new("tiny.md"), false).await.unwrap();
        assert_eq!(tiny, FileOutcome::Skipped(SkipReason::NoChunks));

        let state = manager.state().await;
        assert_eq!(state.files.len(), 2);
        assert!(state.files.values().all(|f| f.chunk_count == 0));
        assert!(manager.catalog.load().await.unwrap().is_empty());

        let again = manager.index_file(Path::new("empty.md"), false).await.unwrap();
        assert_eq!(again, FileOutcome::Skipped(SkipReason::Unchanged));
    }

    #[tokio::test]
    async fn test_emptied_file_loses_its_chunks() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a.md");
        std::fs::write(&a, format!("{}\n\n{}", para("one"), para("two"))).unwrap();
        std::fs::write(temp.path().join("b.md"), para("bee")).unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;
        manager.index_vault(IndexOptions::default()).await.unwrap();
        assert_eq!(manager.catalog.load().await.unwrap().len(), 3);

        std::fs::write(&a, "\n   \n").unwrap();
        let outcome = manager.index_file(&a, false).await.unwrap();
        assert_eq!(outcome, FileOutcome::Skipped(SkipReason::Empty));

        let chunks = manager.catalog.load().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_path, "b.md");
        assert_eq!(vector_len(temp.path()), (DIM * 4) as u64);
        assert_eq!(manager.state().await.files["a.md"].chunk_count, 0);

        // Shrunk below the chunk floor: the old chunks go too.
        std::fs::write(&a, para("back")).unwrap();
        manager.index_file(&a, false).await.unwrap();
        std::fs::write(&a, "a stub").unwrap();
        let outcome = manager.index_file(&a, false).await.unwrap();
        assert_eq!(outcome, FileOutcome::Skipped(SkipReason::NoChunks));
        let chunks = manager.catalog.load().await.unwrap();
        assert!(chunks.iter().all(|c| c.file_path != "a.md"));
        let store = VectorStore::load(&manager.vectors_path).await.unwrap();
        assert!(store.matches_catalog(&chunks));
    }

    #[tokio::test]
    async fn test_embedding_failure_persists_nothing() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("ok.md"), para("fine")).unwrap();
        std::fs::write(
            temp.path().join("bad.md"),
            format!("{}\n\n{}", para("good"), para("EXPLODE")),
        )
        .unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;
        manager.index_file(Path::new("ok.md"), false).await.unwrap();

        let result = manager.index_file(Path::new("bad.md"), false).await;
        assert!(matches!(result, Err(NvError::Embedding(_))));

        let chunks = manager.catalog.load().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_path, "ok.md");
        let state = manager.state().await;
        assert_eq!(state.stats.errors, 1);
        assert!(!state.files.contains_key("bad.md"));
    }

    #[tokio::test]
    async fn test_mismatched_dimension_is_clamped() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), para("wide")).unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::with_output(20))).await;

        manager.index_file(Path::new("a.md"), false).await.unwrap();
        let chunks = manager.catalog.load().await.unwrap();
        assert_eq!(chunks[0].embedding_length, DIM);
        assert_eq!(vector_len(temp.path()), (DIM * 4) as u64);
    }

    #[tokio::test]
    async fn test_concurrent_single_file_updates() {
        let temp = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c", "d"] {
            std::fs::write(temp.path().join(format!("{name}.md")), para(name)).unwrap();
        }
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;

        let (a, b, c, d) = tokio::join!(
            manager.index_file(Path::new("a.md"), false),
            manager.index_file(Path::new("b.md"), false),
            manager.index_file(Path::new("c.md"), false),
            manager.index_file(Path::new("d.md"), false),
        );
        for result in [a, b, c, d] {
            assert!(result.unwrap().is_indexed());
        }

        let chunks = manager.catalog.load().await.unwrap();
        assert_eq!(chunks.len(), 4);
        let store = VectorStore::load(&manager.vectors_path).await.unwrap();
        assert!(store.matches_catalog(&chunks));
    }

    #[tokio::test]
    async fn test_vault_run_scans_and_reports_progress() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        for i in 0..7 {
            std::fs::write(root.join(format!("n{i}.md")), para(&format!("note{i}"))).unwrap();
        }
        std::fs::create_dir_all(root.join("node_modules")).unwrap();
        std::fs::write(root.join("node_modules/x.md"), para("vendored")).unwrap();
        std::fs::create_dir_all(root.join(".hidden")).unwrap();
        std::fs::write(root.join(".hidden/y.md"), para("secret")).unwrap();
        std::fs::write(root.join("image.png"), para("binary")).unwrap();

        let manager = manager(root, Arc::new(LetterEmbedder::new())).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stats = manager
            .index_vault(IndexOptions {
                force: false,
                progress: Some(tx),
            })
            .await
            .unwrap();

        assert_eq!(stats.total_files, 7);
        assert_eq!(stats.indexed_files, 7);
        assert_eq!(stats.total_chunks, 7);
        assert_eq!(stats.errors, 0);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].processed, 5);
        assert_eq!(events[1].processed, 7);
        assert_eq!(events[1].percent, 100);

        let persisted = manager.stats().await;
        assert_eq!(persisted, stats);
        assert!(!manager.is_indexing());
    }

    #[tokio::test]
    async fn test_vault_run_counts_errors_and_continues() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("bad.md"), para("EXPLODE")).unwrap();
        std::fs::write(temp.path().join("good.md"), para("fine")).unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;

        let stats = manager.index_vault(IndexOptions::default()).await.unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.indexed_files, 1);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_while_busy() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;

        manager.running.store(true, Ordering::Release);
        let result = manager.index_vault(IndexOptions::default()).await;
        assert!(matches!(result, Err(NvError::Busy)));
        let result = manager.rebuild_index(None).await;
        assert!(matches!(result, Err(NvError::Busy)));

        manager.running.store(false, Ordering::Release);
        assert!(manager.index_vault(IndexOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_deleted_files_are_pruned() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("keep.md"), para("keep")).unwrap();
        std::fs::write(temp.path().join("gone.md"), para("gone")).unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;
        manager.index_vault(IndexOptions::default()).await.unwrap();

        std::fs::remove_file(temp.path().join("gone.md")).unwrap();
        let stats = manager.index_vault(IndexOptions::default()).await.unwrap();

        assert_eq!(stats.pruned, 1);
        assert_eq!(stats.total_chunks, 1);
        let chunks = manager.catalog.load().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_path, "keep.md");
        assert!(!manager.state().await.files.contains_key("gone.md"));
    }

    #[tokio::test]
    async fn test_remove_file() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), para("a")).unwrap();
        std::fs::write(temp.path().join("b.md"), para("b")).unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;
        manager.index_vault(IndexOptions::default()).await.unwrap();

        manager.remove_file(Path::new("a.md")).await.unwrap();
        let chunks = manager.catalog.load().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].embedding_offset, 0);
        assert_eq!(vector_len(temp.path()), (DIM * 4) as u64);
    }

    #[tokio::test]
    async fn test_validate_index() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), para("valid")).unwrap();
        let manager = manager(temp.path(), Arc::new(LetterEmbedder::new())).await;

        let verdict = manager.validate_index().await;
        assert!(!verdict.valid);
        assert!(verdict.reason.unwrap().starts_with("missing"));

        manager.index_vault(IndexOptions::default()).await.unwrap();
        assert!(manager.validate_index().await.valid);
        assert!(manager.validate_index().await.into_result().is_ok());

        // Truncated vectors: off by far more than the tolerance.
        let catalog = manager.catalog.load().await.unwrap();
        let mut padded = catalog.clone();
        for i in 0..40 {
            let mut extra = catalog[0].clone();
            extra.id = format!("extra-{i}");
            padded.push(extra);
        }
        manager.catalog.save(&padded).await.unwrap();
        let verdict = manager.validate_index().await;
        assert!(!verdict.valid);
        assert!(matches!(
            verdict.into_result(),
            Err(NvError::Validation(_))
        ));
        manager.catalog.save(&catalog).await.unwrap();

        let mut state = manager.state().await;
        state.version = "0.0.1".into();
        state.save(&manager.state_path).await.unwrap();
        let verdict = manager.validate_index().await;
        assert!(verdict.reason.unwrap().starts_with("version mismatch"));
    }

    #[tokio::test]
    async fn test_rebuild_writes_backups() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), para("rebuild")).unwrap();
        let embedder = Arc::new(LetterEmbedder::new());
        let manager = manager(temp.path(), embedder.clone()).await;
        manager.index_vault(IndexOptions::default()).await.unwrap();
        let before = std::fs::read(discover::vectors_path(temp.path())).unwrap();

        let stats = manager.rebuild_index(None).await.unwrap();
        assert_eq!(stats.indexed_files, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        let backup = discover::backup_path(&discover::vectors_path(temp.path()));
        assert_eq!(std::fs::read(backup).unwrap(), before);
        assert!(discover::backup_path(&discover::catalog_path(temp.path())).exists());
        assert_eq!(std::fs::read(discover::vectors_path(temp.path())).unwrap(), before);
    }

    #[tokio::test]
    async fn test_incompatible_state_triggers_rebuild() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.md"), para("old")).unwrap();
        let embedder = Arc::new(LetterEmbedder::new());
        {
            let manager = manager(temp.path(), embedder.clone()).await;
            manager.index_vault(IndexOptions::default()).await.unwrap();
            let mut state = manager.state().await;
            state.version = "0.1.0".into();
            state.save(&manager.state_path).await.unwrap();
        }

        let manager = manager(temp.path(), embedder.clone()).await;
        let stats = manager.index_vault(IndexOptions::default()).await.unwrap();
        assert_eq!(stats.indexed_files, 1);
        assert!(manager.state().await.is_compatible());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }
}
