//! Flat binary vector store
//!
//! All chunk vectors live in one buffer of little-endian `f32` values, in
//! catalog order. A chunk addresses its vector by byte offset and length.
//! There is no in-place update: replacing a file's chunks goes through
//! [`VectorStore::rebuild_with`], which copies every surviving vector into
//! a fresh buffer and rewrites offsets. That makes each write O(total
//! chunks in the vault).

use std::path::Path;

use crate::{Chunk, Result};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// In-memory image of `embeddings.bin`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    bytes: Vec<u8>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from disk; a missing file is an empty store.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Self { bytes }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the file at `path` with this buffer.
    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, &self.bytes).await?;
        Ok(())
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read `length` floats starting at byte `offset`.
    ///
    /// Returns `None` when the range does not fit inside the buffer; callers
    /// skip such records instead of failing.
    pub fn extract(&self, offset: u64, length: usize) -> Option<Vec<f32>> {
        self.range(offset, length).map(decode)
    }

    fn range(&self, offset: u64, length: usize) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(length.checked_mul(F32_BYTES)?)?;
        self.bytes.get(start..end)
    }

    /// The vector of a catalog record.
    pub fn vector_of(&self, chunk: &Chunk) -> Option<Vec<f32>> {
        self.extract(chunk.embedding_offset, chunk.embedding_length)
    }

    /// Build a new store from the chunks to keep plus freshly embedded ones.
    ///
    /// `survivors` carry their offsets into *this* buffer; their vectors are
    /// copied over in order, followed by `fresh` vectors. Every returned
    /// chunk has its `embedding_offset` and `embedding_length` rewritten to
    /// its position in the new buffer. Survivors whose vector cannot be
    /// read are dropped.
    pub fn rebuild_with(
        &self,
        survivors: Vec<Chunk>,
        fresh: Vec<(Chunk, Vec<f32>)>,
    ) -> (Vec<Chunk>, VectorStore) {
        // Survivors can only copy what this buffer holds.
        let fresh_bytes: usize = fresh.iter().map(|(_, v)| v.len() * F32_BYTES).sum();
        let mut bytes = Vec::with_capacity(self.bytes.len().saturating_add(fresh_bytes));
        let mut chunks = Vec::with_capacity(survivors.len() + fresh.len());

        for mut chunk in survivors {
            let Some(slice) = self.range(chunk.embedding_offset, chunk.embedding_length) else {
                tracing::warn!(
                    chunk = %chunk.id,
                    offset = chunk.embedding_offset,
                    length = chunk.embedding_length,
                    "vector out of range, dropping chunk"
                );
                continue;
            };
            chunk.embedding_offset = bytes.len() as u64;
            bytes.extend_from_slice(slice);
            chunks.push(chunk);
        }

        for (mut chunk, vector) in fresh {
            chunk.embedding_offset = bytes.len() as u64;
            chunk.embedding_length = vector.len();
            bytes.extend_from_slice(&encode(&vector));
            chunks.push(chunk);
        }

        (chunks, VectorStore { bytes })
    }

    /// Whether the buffer length equals the sum of the catalog's vector sizes.
    pub fn matches_catalog(&self, chunks: &[Chunk]) -> bool {
        chunks
            .iter()
            .try_fold(0usize, |total, c| {
                c.embedding_length
                    .checked_mul(F32_BYTES)
                    .and_then(|n| total.checked_add(n))
            })
            .is_some_and(|expected| expected == self.bytes.len())
    }
}

/// Encode floats as little-endian bytes.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * F32_BYTES);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian bytes back into floats.
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(F32_BYTES)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkMetadata, ChunkType, Span};

    fn chunk(path: &str, index: usize) -> Chunk {
        let span = Span {
            start: index * 10,
            end: index * 10 + 10,
        };
        Chunk {
            id: Chunk::make_id(path, index, span),
            file_path: path.to_string(),
            chunk_index: index,
            text: format!("{path} {index}"),
            span,
            chunk_type: ChunkType::Generic,
            metadata: ChunkMetadata {
                mtime: 0,
                size: 0,
                checksum: None,
                file_name: path.to_string(),
                heading: None,
            },
            embedding_offset: 0,
            embedding_length: 0,
        }
    }

    #[test]
    fn test_encoding_is_little_endian() {
        assert_eq!(encode(&[1.0]), vec![0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(decode(&[0x00, 0x00, 0x80, 0x3f]), vec![1.0]);
    }

    #[test]
    fn test_extract_out_of_bounds_is_none() {
        let store = VectorStore {
            bytes: encode(&[1.0, 2.0, 3.0]),
        };
        assert_eq!(store.extract(4, 2), Some(vec![2.0, 3.0]));
        assert_eq!(store.extract(4, 3), None);
        assert_eq!(store.extract(100, 1), None);
        assert_eq!(store.extract(u64::MAX, 1), None);
    }

    #[test]
    fn test_rebuild_appends_and_rewrites_offsets() {
        let (chunks, store) = VectorStore::new().rebuild_with(
            Vec::new(),
            vec![
                (chunk("a.md", 0), vec![1.0, 1.0]),
                (chunk("b.md", 0), vec![2.0, 2.0]),
                (chunk("c.md", 0), vec![3.0, 3.0]),
            ],
        );
        assert_eq!(store.len(), 24);
        assert_eq!(
            chunks.iter().map(|c| c.embedding_offset).collect::<Vec<_>>(),
            vec![0, 8, 16]
        );

        // Replace b.md: survivors keep their old offsets going in.
        let survivors: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| c.file_path != "b.md")
            .collect();
        let (chunks, store) = store.rebuild_with(
            survivors,
            vec![
                (chunk("b.md", 0), vec![4.0, 4.0]),
                (chunk("b.md", 1), vec![5.0, 5.0]),
            ],
        );

        assert_eq!(store.len(), 32);
        assert!(store.matches_catalog(&chunks));
        let order: Vec<&str> = chunks.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(order, vec!["a.md", "c.md", "b.md", "b.md"]);
        assert_eq!(store.vector_of(&chunks[0]), Some(vec![1.0, 1.0]));
        assert_eq!(store.vector_of(&chunks[1]), Some(vec![3.0, 3.0]));
        assert_eq!(store.vector_of(&chunks[3]), Some(vec![5.0, 5.0]));
        for pair in chunks.windows(2) {
            assert!(pair[0].embedding_offset < pair[1].embedding_offset);
        }
    }

    #[test]
    fn test_rebuild_drops_unreadable_survivors() {
        let store = VectorStore {
            bytes: encode(&[1.0, 2.0]),
        };
        let mut broken = chunk("x.md", 0);
        broken.embedding_offset = 64;
        broken.embedding_length = 2;
        let mut good = chunk("y.md", 0);
        good.embedding_length = 2;

        let (chunks, rebuilt) = store.rebuild_with(vec![broken, good], Vec::new());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_path, "y.md");
        assert_eq!(rebuilt.len(), 8);
    }

    #[test]
    fn test_rebuild_survives_absurd_lengths() {
        let store = VectorStore {
            bytes: encode(&[1.0, 2.0]),
        };
        let mut huge = chunk("x.md", 0);
        huge.embedding_length = usize::MAX / 2;
        let mut far = chunk("z.md", 0);
        far.embedding_offset = u64::MAX;
        far.embedding_length = 1;
        let mut good = chunk("y.md", 0);
        good.embedding_length = 2;

        let (chunks, rebuilt) =
            store.rebuild_with(vec![huge.clone(), far, good], vec![(chunk("n.md", 0), vec![3.0])]);
        let paths: Vec<&str> = chunks.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(paths, vec!["y.md", "n.md"]);
        assert_eq!(rebuilt.len(), 12);
        assert!(rebuilt.matches_catalog(&chunks));
        assert!(!rebuilt.matches_catalog(&[huge.clone(), huge]));
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = VectorStore::load(&temp.path().join("embeddings.bin"))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("embeddings.bin");
        let store = VectorStore {
            bytes: encode(&[0.25, -1.5]),
        };
        store.save(&path).await.unwrap();

        let loaded = VectorStore::load(&path).await.unwrap();
        assert_eq!(loaded, store);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);
    }
}
