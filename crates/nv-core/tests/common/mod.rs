#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use nv_core::{Config, Embedder, IndexManager, Result, SearchEngine, discover};

pub const DIM: usize = 16;

/// Bag-of-words embedder: each word lands in a bucket picked from its
/// bytes. Identical texts get identical vectors.
pub struct WordEmbedder {
    calls: AtomicUsize,
}

impl WordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for WordEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0; DIM];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % DIM] += 1.0;
        }
        Ok(vector)
    }
}

/// A fresh vault with a config sized for [`WordEmbedder`].
pub fn vault() -> tempfile::TempDir {
    let temp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(discover::index_dir(temp.path())).unwrap();
    Config {
        dimension: DIM,
        ..Config::default()
    }
    .save(temp.path())
    .unwrap();
    temp
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub async fn manager(root: &Path, embedder: Arc<WordEmbedder>) -> IndexManager {
    IndexManager::open(root.to_path_buf(), embedder).await.unwrap()
}

pub async fn engine(root: &Path, embedder: Arc<WordEmbedder>) -> SearchEngine {
    SearchEngine::open(root, embedder).await.unwrap()
}

pub fn vectors_len(root: &Path) -> u64 {
    std::fs::metadata(discover::vectors_path(root)).unwrap().len()
}
